mod change;
mod merge;
mod pipeline;
mod status;

pub use change::{classify, StatusChangeKind};
pub use merge::merge;
pub use pipeline::{Feed, FeedType, GroupKey, Pipeline, PipelineId};
pub use status::{Activity, Build, BuildResult, Status};
