use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

/**
The classifier attached to events captured through the log interceptor.

Custom gameplay events carry no severity.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Exception,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Exception => "Exception",
        })
    }
}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            s if s.eq_ignore_ascii_case("info") => Ok(Severity::Info),
            s if s.eq_ignore_ascii_case("warning") => Ok(Severity::Warning),
            s if s.eq_ignore_ascii_case("error") => Ok(Severity::Error),
            s if s.eq_ignore_ascii_case("exception") => Ok(Severity::Exception),
            _ => Err(ParseSeverityError {}),
        }
    }
}

/**
An error attempting to parse a [`Severity`].
*/
#[derive(Debug)]
pub struct ParseSeverityError {}

impl fmt::Display for ParseSeverityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the input was not a valid severity")
    }
}

impl std::error::Error for ParseSeverityError {}

/**
One occurrence of a named happening.

Events are value records; the queue may fold repeated occurrences of the
same logical event into one entry by bumping [`Event::occurrences`], as
decided by the configured [`DedupPolicy`].
*/
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub name: String,
    pub recorded_at: DateTime<Utc>,
    /**
    The context the event occurred in, typically the active scene or level.
    */
    pub level: String,
    #[serde(rename = "log_type", skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub occurrences: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>, level: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            recorded_at: Utc::now(),
            level: level.into(),
            severity: None,
            stack_trace: None,
            occurrences: 1,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_properties(
        mut self,
        properties: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.properties = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /**
    Fold a newer occurrence of the same logical event into this one.

    The occurrence count goes up by one and the newest timestamp, stack
    trace, and properties win; the name, level, and severity that formed
    the dedup key are kept.
    */
    pub fn merge(&mut self, newer: Event) {
        self.occurrences += 1;
        self.recorded_at = newer.recorded_at;
        self.stack_trace = newer.stack_trace;
        self.properties = newer.properties;
    }
}

/**
The key deciding when two events describe the same logical happening.

The backend historically used two different keys, so the policy is
configurable rather than guessed; see [`crate::Setup::dedup`].
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /**
    Events match when their name, level, and severity are all equal.
    */
    #[default]
    NameLevelSeverity,
    /**
    Events match when their name, severity, and stack trace are all equal.

    This is the key the legacy protocol used.
    */
    NameSeverityStackTrace,
}

impl DedupPolicy {
    pub fn is_duplicate(&self, a: &Event, b: &Event) -> bool {
        match self {
            DedupPolicy::NameLevelSeverity => {
                a.name == b.name && a.level == b.level && a.severity == b.severity
            }
            DedupPolicy::NameSeverityStackTrace => {
                a.name == b.name && a.severity == b.severity && a.stack_trace == b.stack_trace
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_roundtrip() {
        for severity in [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Exception,
        ] {
            let fmt = severity.to_string();

            let parsed: Severity = fmt.parse().unwrap();

            assert_eq!(severity, parsed, "{}", fmt);
        }
    }

    #[test]
    fn merge_keeps_key_refreshes_payload() {
        let mut event = Event::new("enemy hit", "Level1")
            .with_severity(Severity::Warning)
            .with_properties([("combo", "2")]);

        let newer = Event::new("enemy hit", "Level1")
            .with_severity(Severity::Warning)
            .with_stack_trace("trace")
            .with_properties([("combo", "3")]);
        let newer_ts = newer.recorded_at;

        event.merge(newer);

        assert_eq!(2, event.occurrences);
        assert_eq!(newer_ts, event.recorded_at);
        assert_eq!(Some("trace".to_owned()), event.stack_trace);
        assert_eq!(Some("3"), event.properties.get("combo").map(|v| &**v));
    }

    #[test]
    fn dedup_policies_disagree_on_stack_traces() {
        let a = Event::new("boom", "Level1").with_severity(Severity::Error);
        let b = Event::new("boom", "Level1")
            .with_severity(Severity::Error)
            .with_stack_trace("trace");

        assert!(DedupPolicy::NameLevelSeverity.is_duplicate(&a, &b));
        assert!(!DedupPolicy::NameSeverityStackTrace.is_duplicate(&a, &b));
    }
}
