// SPDX-License-Identifier: Apache-2.0

//! The record model carried on the bus between collectors and the pipeline.
//!
//! Every collector emits fully-formed records: the timestamp is set at
//! emission time and downstream stages never synthesize one.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Kind labels used by sink data-type filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Log,
    Metric,
    Trace,
    Event,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Log => write!(f, "log"),
            RecordKind::Metric => write!(f, "metric"),
            RecordKind::Trace => write!(f, "trace"),
            RecordKind::Event => write!(f, "event"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single observation emitted by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Log {
        /// Originating file path.
        source: String,
        /// The raw line.
        message: String,
        timestamp: String,
        level: String,
        /// Flat map: static fields, static tags, and parser-extracted fields
        /// merged together, the shape JSON log receivers expect.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        fields: Map<String, Value>,
    },
    Metric {
        name: String,
        kind: MetricKind,
        value: f64,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, String>,
        unit: String,
        timestamp: String,
    },
    Issue {
        id: String,
        severity: Severity,
        category: String,
        title: String,
        description: String,
        pattern_name: String,
        context: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggested_fix: Option<String>,
        auto_fixable: bool,
        source: String,
        timestamp: String,
    },
    Event {
        id: String,
        event_type: String,
        category: String,
        severity: Severity,
        title: String,
        description: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        data: Map<String, Value>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        tags: BTreeMap<String, String>,
        timestamp: String,
    },
}

impl Record {
    /// The kind label sink filters match against. Issues travel as events,
    /// the label the downstream platform files them under.
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Log { .. } => RecordKind::Log,
            Record::Metric { .. } => RecordKind::Metric,
            Record::Issue { .. } => RecordKind::Event,
            Record::Event { .. } => RecordKind::Event,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Record::Log { timestamp, .. } => timestamp,
            Record::Metric { timestamp, .. } => timestamp,
            Record::Issue { timestamp, .. } => timestamp,
            Record::Event { timestamp, .. } => timestamp,
        }
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2025-03-01T12:00:00.123Z`.
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_serializes_tagged_and_flat() {
        let mut fields = Map::new();
        fields.insert("env".to_string(), Value::String("prod".to_string()));

        let rec = Record::Log {
            source: "/var/log/app.log".to_string(),
            message: "hello".to_string(),
            timestamp: now_rfc3339(),
            level: "info".to_string(),
            fields,
        };

        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["type"], "log");
        assert_eq!(v["message"], "hello");
        assert_eq!(v["fields"]["env"], "prod");
    }

    #[test]
    fn issue_filters_as_event() {
        let rec = Record::Issue {
            id: "pattern-oom-1".to_string(),
            severity: Severity::Critical,
            category: "memory".to_string(),
            title: "Pattern detected: oom".to_string(),
            description: String::new(),
            pattern_name: "oom".to_string(),
            context: Map::new(),
            suggested_fix: None,
            auto_fixable: false,
            source: "/var/log/kern.log".to_string(),
            timestamp: now_rfc3339(),
        };

        assert_eq!(RecordKind::Event, rec.kind());
    }

    #[test]
    fn timestamp_is_millisecond_utc() {
        let ts = now_rfc3339();
        // 2025-03-01T12:00:00.123Z
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2025-03-01T12:00:00.123Z".len());
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
