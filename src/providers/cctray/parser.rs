use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::FeedError;
use crate::model::{Activity, Build, BuildResult, Status};

/// Parsed CCTray status document: a flat list of project records.
///
/// The format is a single XML element per project carrying everything as
/// string attributes. Parsing is deliberately lenient: unknown elements
/// and attributes are ignored and a record missing attributes still
/// yields a (partial) status, so one odd project cannot take down the
/// whole feed.
#[derive(Debug, Default)]
pub struct StatusDocument {
    projects: Vec<ProjectRecord>,
}

#[derive(Debug, Default)]
struct ProjectRecord {
    name: String,
    activity: Option<String>,
    last_build_status: Option<String>,
    last_build_label: Option<String>,
    last_build_time: Option<String>,
    web_url: Option<String>,
}

impl StatusDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, FeedError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut projects = Vec::new();
        let mut saw_element = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    saw_element = true;
                    if e.local_name().as_ref() == b"Project" {
                        projects.push(read_project(e));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(FeedError::MalformedPayload(err.to_string())),
            }
            buf.clear();
        }

        if !saw_element {
            return Err(FeedError::MalformedPayload(
                "document contained no XML elements".to_string(),
            ));
        }

        Ok(Self { projects })
    }

    /// Status for the project the server knows as `name`. `None` is a
    /// legitimate outcome (the server does not list this project), not a
    /// parse error.
    pub fn status_for(&self, name: &str) -> Option<Status> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .map(ProjectRecord::to_status)
    }

    /// All project names in the document, in server order. Used by
    /// dynamic feed sync to expand a feed into managed pipelines.
    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name.clone()).collect()
    }
}

fn read_project(element: &BytesStart<'_>) -> ProjectRecord {
    let mut record = ProjectRecord::default();

    for attr in element.attributes().flatten() {
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        match attr.key.local_name().as_ref() {
            b"name" => record.name = value,
            b"activity" => record.activity = Some(value),
            b"lastBuildStatus" => record.last_build_status = Some(value),
            b"lastBuildLabel" => record.last_build_label = Some(value),
            b"lastBuildTime" => record.last_build_time = Some(value),
            b"webUrl" => record.web_url = Some(value),
            _ => {}
        }
    }

    record
}

impl ProjectRecord {
    fn to_status(&self) -> Status {
        let activity = match self.activity.as_deref() {
            Some("Sleeping") => Activity::Sleeping,
            Some("Building") => Activity::Building,
            _ => Activity::Other,
        };

        let current_build = (activity == Activity::Building).then(Build::default);

        let has_last_build = self.last_build_status.is_some()
            || self.last_build_label.is_some()
            || self.last_build_time.is_some();
        let last_build = has_last_build.then(|| Build {
            result: match self.last_build_status.as_deref() {
                Some("Success") => BuildResult::Success,
                Some("Failure") | Some("Exception") => BuildResult::Failure,
                _ => BuildResult::Unknown,
            },
            label: self.last_build_label.clone(),
            timestamp: self.last_build_time.as_deref().and_then(parse_timestamp),
            ..Build::default()
        });

        Status {
            activity,
            current_build,
            last_build,
            web_url: self.web_url.clone(),
        }
    }
}

/// Parses the timestamp formats CCTray servers emit.
///
/// A bare `YYYY-MM-DDTHH:MM:SS` carries no timezone and is interpreted
/// as local time. Values with an explicit offset are accepted in both
/// RFC 3339 form (`Z`, `+08:00`) and the colon-free `+0800` form; the
/// latter path rejects fractional seconds, so those are stripped before
/// retrying.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let stripped = strip_fraction(raw);
    if let Ok(parsed) = DateTime::parse_from_str(&stripped, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(&stripped, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = Local.from_local_datetime(&naive).earliest() {
            return Some(local.with_timezone(&Utc));
        }
    }

    None
}

fn strip_fraction(raw: &str) -> String {
    match raw.find('.') {
        Some(dot) => {
            let rest = &raw[dot + 1..];
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            format!("{}{}", &raw[..dot], &rest[digits..])
        }
        None => raw.to_string(),
    }
}
