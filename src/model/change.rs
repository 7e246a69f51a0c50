use serde::{Deserialize, Serialize};

use super::status::{Activity, Status};

/// How one polled status relates to the previously known one.
///
/// Consumed by the notification layer; derived on every merge, never
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusChangeKind {
    Start,
    Completion,
    Other,
    NoChange,
}

/// Classifies the transition from `previous` to `current`.
///
/// The branches are ordered; the first match wins:
/// 1. leaving Sleeping is a build start,
/// 2. Building to Sleeping is a completion,
/// 3. unchanged activity is a completion when the last-build label moved,
///    otherwise no change,
/// 4. anything else is an indeterminate transition.
pub fn classify(previous: &Status, current: &Status) -> StatusChangeKind {
    if previous.activity == Activity::Sleeping && current.activity != Activity::Sleeping {
        return StatusChangeKind::Start;
    }
    if previous.activity == Activity::Building && current.activity == Activity::Sleeping {
        return StatusChangeKind::Completion;
    }
    if previous.activity == current.activity {
        if current.last_label() != previous.last_label() {
            return StatusChangeKind::Completion;
        }
        return StatusChangeKind::NoChange;
    }
    StatusChangeKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Build;

    fn status(activity: Activity, label: Option<&str>) -> Status {
        Status {
            activity,
            last_build: label.map(|l| Build {
                label: Some(l.to_string()),
                ..Build::default()
            }),
            ..Status::default()
        }
    }

    #[test]
    fn test_every_activity_pair() {
        use Activity::{Building, Other, Sleeping};
        use StatusChangeKind as Kind;

        let cases = [
            (Sleeping, Sleeping, Kind::NoChange),
            (Sleeping, Building, Kind::Start),
            (Sleeping, Other, Kind::Start),
            (Building, Sleeping, Kind::Completion),
            (Building, Building, Kind::NoChange),
            (Building, Other, Kind::Other),
            (Other, Sleeping, Kind::Other),
            (Other, Building, Kind::Other),
            (Other, Other, Kind::NoChange),
        ];

        for (prev, cur, expected) in cases {
            assert_eq!(
                classify(&status(prev, None), &status(cur, None)),
                expected,
                "{prev:?} -> {cur:?}"
            );
        }
    }

    #[test]
    fn test_label_change_within_same_activity_is_a_completion() {
        let prev = status(Activity::Sleeping, Some("41"));
        let cur = status(Activity::Sleeping, Some("42"));
        assert_eq!(classify(&prev, &cur), StatusChangeKind::Completion);
    }

    #[test]
    fn test_label_appearing_counts_as_change() {
        let prev = status(Activity::Other, None);
        let cur = status(Activity::Other, Some("1"));
        assert_eq!(classify(&prev, &cur), StatusChangeKind::Completion);
    }

    #[test]
    fn test_same_label_same_activity_is_no_change() {
        let prev = status(Activity::Sleeping, Some("42"));
        let cur = status(Activity::Sleeping, Some("42"));
        assert_eq!(classify(&prev, &cur), StatusChangeKind::NoChange);
    }

    #[test]
    fn test_start_wins_over_label_comparison() {
        // Branch order matters: Sleeping -> Building is a start even if
        // the last-build label changed at the same time.
        let prev = status(Activity::Sleeping, Some("41"));
        let cur = status(Activity::Building, Some("42"));
        assert_eq!(classify(&prev, &cur), StatusChangeKind::Start);
    }

    #[test]
    fn test_total_over_absent_builds() {
        let prev = Status::default();
        let cur = Status::default();
        assert_eq!(classify(&prev, &cur), StatusChangeKind::NoChange);
    }
}
