// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::LogPatternConfig;
use crate::record::{now_rfc3339, Record, Severity};

/// A compiled issue-detection rule. Immutable after startup.
pub struct PatternRule {
    pub name: String,
    pub regex: Regex,
    pub severity: Severity,
    pub category: String,
    pub description: String,
    pub suggested_fix: Option<String>,
}

/// The full rule set scanned against every processed line.
#[derive(Default)]
pub struct PatternSet {
    rules: Vec<PatternRule>,
}

impl PatternSet {
    /// Compile the configured rules once. Rules that fail to compile are
    /// logged and skipped; startup continues with the rest.
    pub fn compile(configs: &[LogPatternConfig]) -> Self {
        let mut rules = Vec::with_capacity(configs.len());

        for cfg in configs {
            let regex = match Regex::new(&cfg.pattern) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(
                        pattern = %cfg.name,
                        regex = %cfg.pattern,
                        error = %e,
                        "Invalid pattern, skipping rule"
                    );
                    continue;
                }
            };

            rules.push(PatternRule {
                name: cfg.name.clone(),
                regex,
                severity: parse_severity(&cfg.severity),
                category: cfg.category.clone(),
                description: cfg.description.clone(),
                suggested_fix: cfg.auto_fix.clone(),
            });
        }

        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scan a line against every rule. Each match yields one Issue record in
    /// addition to the original Log record; matches never suppress the line.
    pub fn scan(&self, line: &str, source: &str, log_fields: &Map<String, Value>) -> Vec<Record> {
        let mut issues = Vec::new();

        for rule in &self.rules {
            if !rule.regex.is_match(line) {
                continue;
            }

            let mut context = Map::new();
            context.insert("line".to_string(), Value::String(line.to_string()));
            context.insert("file".to_string(), Value::String(source.to_string()));
            context.insert(
                "log_fields".to_string(),
                Value::Object(log_fields.clone()),
            );

            issues.push(Record::Issue {
                id: format!("pattern-{}-{}", rule.name, Utc::now().timestamp()),
                severity: rule.severity,
                category: rule.category.clone(),
                title: format!("Pattern detected: {}", rule.name),
                description: rule.description.clone(),
                pattern_name: rule.name.clone(),
                context,
                suggested_fix: rule.suggested_fix.clone(),
                auto_fixable: rule.suggested_fix.is_some(),
                source: source.to_string(),
                timestamp: now_rfc3339(),
            });
        }

        issues
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oom_rule() -> LogPatternConfig {
        LogPatternConfig {
            name: "oom".to_string(),
            pattern: "Out of memory".to_string(),
            severity: "critical".to_string(),
            category: "memory".to_string(),
            description: "Kernel OOM killer fired".to_string(),
            auto_fix: None,
        }
    }

    #[test]
    fn matching_line_emits_one_issue() {
        let set = PatternSet::compile(&[oom_rule()]);

        let issues = set.scan(
            "Out of memory: Kill process 1234",
            "/var/log/kern.log",
            &Map::new(),
        );

        assert_eq!(issues.len(), 1);
        match &issues[0] {
            Record::Issue {
                severity,
                pattern_name,
                context,
                source,
                ..
            } => {
                assert_eq!(*severity, Severity::Critical);
                assert_eq!(pattern_name, "oom");
                assert_eq!(source, "/var/log/kern.log");
                assert_eq!(context["line"], "Out of memory: Kill process 1234");
                assert_eq!(context["file"], "/var/log/kern.log");
            }
            other => panic!("expected Issue, got {:?}", other),
        }
    }

    #[test]
    fn non_matching_line_emits_nothing() {
        let set = PatternSet::compile(&[oom_rule()]);
        assert!(set.scan("all quiet", "/var/log/app.log", &Map::new()).is_empty());
    }

    #[test]
    fn each_matching_rule_fires_once() {
        let mut disk = oom_rule();
        disk.name = "memfull".to_string();
        disk.pattern = "memory".to_string();
        disk.severity = "warning".to_string();

        let set = PatternSet::compile(&[oom_rule(), disk]);
        let issues = set.scan("Out of memory again", "/var/log/kern.log", &Map::new());
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let mut bad = oom_rule();
        bad.pattern = "(unclosed".to_string();

        let set = PatternSet::compile(&[bad, oom_rule()]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn auto_fix_makes_issue_fixable() {
        let mut rule = oom_rule();
        rule.auto_fix = Some("restart the service".to_string());

        let set = PatternSet::compile(&[rule]);
        let issues = set.scan("Out of memory", "/var/log/x.log", &Map::new());
        match &issues[0] {
            Record::Issue {
                auto_fixable,
                suggested_fix,
                ..
            } => {
                assert!(auto_fixable);
                assert_eq!(suggested_fix.as_deref(), Some("restart the service"));
            }
            other => panic!("expected Issue, got {:?}", other),
        }
    }
}
