// Writer properties
// Typed access to the `[writers.properties]` table of a project file

use regex::Regex;
use rigtest_core::domain::{parse_outcome_list, Outcome};
use rigtest_core::port::{WriterError, WriterResult};
use std::collections::BTreeMap;

/// Properties configured for one writer, keyed case-insensitively
#[derive(Debug, Clone, Default)]
pub struct WriterProperties {
    writer: String,
    values: BTreeMap<String, String>,
}

impl WriterProperties {
    pub fn new(writer: &str, properties: &BTreeMap<String, String>) -> Self {
        Self {
            writer: writer.to_string(),
            values: properties
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }

    /// Fail on any property the writer does not understand
    pub fn check_known(&self, known: &[&str]) -> WriterResult<()> {
        for key in self.values.keys() {
            if !known.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                return Err(WriterError::Config(format!(
                    "unknown property \"{}\" for writer {}",
                    key, self.writer
                )));
            }
        }
        Ok(())
    }

    /// Non-empty string value
    pub fn string(&self, key: &str) -> Option<String> {
        self.values
            .get(&key.to_lowercase())
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> WriterResult<bool> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(self.invalid(key, &v, "a boolean")),
            },
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> WriterResult<u64> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| self.invalid(key, &v, "a whole number")),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> WriterResult<f64> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => match v.trim().parse::<f64>() {
                Ok(n) if n >= 0.0 => Ok(n),
                _ => Err(self.invalid(key, &v, "a non-negative number")),
            },
        }
    }

    /// Outcome list such as `NOT VERIFIED, REQUIRES INSPECTION` or `*`;
    /// an explicitly empty value selects nothing
    pub fn outcomes_or(&self, key: &str, default: &str) -> WriterResult<Vec<Outcome>> {
        let spec = self
            .values
            .get(&key.to_lowercase())
            .map(String::as_str)
            .unwrap_or(default);
        Ok(parse_outcome_list(spec)?)
    }

    pub fn regex(&self, key: &str) -> WriterResult<Option<Regex>> {
        self.string(key).map(|r| Regex::new(&r)).transpose().map_err(Into::into)
    }

    fn invalid(&self, key: &str, value: &str, expected: &str) -> WriterError {
        WriterError::Config(format!(
            "property \"{}\" of writer {} must be {}, not \"{}\"",
            key, self.writer, expected, value
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> WriterProperties {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WriterProperties::new("test", &map)
    }

    #[test]
    fn test_lookup_ignores_case() {
        let p = props(&[("maxarchives", "7"), ("includeTitle", "false")]);
        assert_eq!(p.u64_or("maxArchives", 50).unwrap(), 7);
        assert!(!p.bool_or("INCLUDETITLE", true).unwrap());
        assert!(p.check_known(&["maxArchives", "includeTitle"]).is_ok());
    }

    #[test]
    fn test_unknown_and_invalid_values() {
        let p = props(&[("colour", "red"), ("maxArchives", "lots")]);
        let err = p.check_known(&["maxArchives"]).unwrap_err();
        assert!(err.to_string().contains("colour"));
        assert!(p.u64_or("maxArchives", 1).is_err());
        assert!(props(&[("fileIncludesRegex", "(")]).regex("fileIncludesRegex").is_err());
    }

    #[test]
    fn test_outcome_lists() {
        let p = props(&[("includeNonFailureOutcomes", "")]);
        assert!(p.outcomes_or("includeNonFailureOutcomes", "*").unwrap().is_empty());
        assert_eq!(props(&[]).outcomes_or("x", "*").unwrap().len(), Outcome::ALL.len());
        assert!(props(&[("x", "NOPE")]).outcomes_or("x", "").is_err());
    }
}
