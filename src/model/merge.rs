use chrono::{DateTime, Utc};

use super::status::{Activity, Status};

/// Folds a freshly fetched status into the previously known one,
/// deriving the timing fields the servers do not report themselves.
///
/// Three rules, applied to a copy of `incoming`:
/// - entering Building with no server-supplied start time stamps the
///   current build with `now` (CCTray servers never report one),
/// - leaving Building computes the finished build's duration from the
///   remembered start time when the payload carries none,
/// - an unchanged last-build label carries the previously derived
///   duration forward, so a derived value is never lost to a payload
///   that omits it.
///
/// Pure; `now` is a parameter so the rules are testable without a clock.
pub fn merge(previous: &Status, incoming: Status, now: DateTime<Utc>) -> Status {
    let mut next = incoming;

    let was_building = previous.activity == Activity::Building;
    let is_building = next.activity == Activity::Building;

    if !was_building && is_building {
        if let Some(build) = next.current_build.as_mut() {
            if build.timestamp.is_none() {
                build.timestamp = Some(now);
            }
        }
    }

    if was_building && !is_building {
        if let Some(build) = next.last_build.as_mut() {
            if build.duration.is_none() {
                let started = previous.current_build.as_ref().and_then(|b| b.timestamp);
                if let Some(started) = started {
                    build.duration = Some((now - started).num_seconds());
                }
            }
        }
    }

    if let (Some(prev_last), Some(last)) = (&previous.last_build, next.last_build.as_mut()) {
        if last.duration.is_none() && last.label == prev_last.label {
            last.duration = prev_last.duration;
        }
    }

    next
}
