// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use serde_json::{Map, Value};

use super::Error;
use crate::config::ParserConfig;

/// Parser extracts structured fields from a raw log line. The line itself is
/// preserved as the record message; extracted fields land in the record's
/// flat field map.
pub trait Parser: Send + Sync {
    /// Parse the line into a field map. A line the parser cannot handle is
    /// not an error worth surfacing per-line; it yields no fields.
    fn parse(&self, line: &str) -> Map<String, Value>;
}

/// Build a parser from its configuration. `grok` is accepted in config for
/// compatibility but is not implemented; callers get None and a warning.
pub fn build_parser(name: &str, config: &ParserConfig) -> Result<Option<Box<dyn Parser>>, Error> {
    match config.kind.as_str() {
        "regex" => {
            let pattern = config
                .pattern
                .as_ref()
                .ok_or_else(|| Error::Config(format!("parser '{}': regex pattern required", name)))?;
            Ok(Some(Box::new(RegexParser::new(pattern)?)))
        }
        "json" => Ok(Some(Box::new(JsonParser))),
        "grok" => {
            tracing::warn!(parser = name, "grok parser is not implemented, lines pass through unparsed");
            Ok(None)
        }
        other => Err(Error::Config(format!(
            "parser '{}': unknown type '{}'",
            name, other
        ))),
    }
}

/// Extracts named capture groups into fields.
pub struct RegexParser {
    regex: Regex,
    /// Names of the capture groups (excluding the full match)
    group_names: Vec<String>,
}

impl RegexParser {
    /// The pattern must contain at least one named capture group using the
    /// `(?P<name>...)` syntax.
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid regex pattern: {}", e)))?;

        let group_names: Vec<String> = regex
            .capture_names()
            .skip(1) // the full match at index 0
            .flatten()
            .map(|s| s.to_string())
            .collect();

        if group_names.is_empty() {
            return Err(Error::Config(
                "regex pattern must contain at least one named capture group (use (?P<name>...) syntax)"
                    .to_string(),
            ));
        }

        Ok(Self { regex, group_names })
    }
}

impl Parser for RegexParser {
    fn parse(&self, line: &str) -> Map<String, Value> {
        let mut fields = Map::new();

        if let Some(captures) = self.regex.captures(line) {
            for name in &self.group_names {
                if let Some(m) = captures.name(name) {
                    fields.insert(name.clone(), Value::String(m.as_str().to_string()));
                }
            }
        }

        fields
    }
}

/// Parses the line as a JSON object and promotes its fields.
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, line: &str) -> Map<String, Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
