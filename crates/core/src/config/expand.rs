// Property Expansion
// `${name}`, `${env.NAME}`, `${$}` and a leading `~`

use crate::error::{AppError, Result};
use std::collections::BTreeMap;

/// Known property values, looked up case-insensitively
#[derive(Debug, Clone, Default)]
pub struct PropertyExpander {
    values: BTreeMap<String, String>,
}

enum Lookup {
    Found(String),
    /// Defined but not resolved yet
    Pending,
    Unknown,
}

impl PropertyExpander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Expand every reference in `input`
    ///
    /// # Errors
    /// AppError::Config for unknown properties, unset environment variables
    /// or an unterminated `${`
    pub fn expand(&self, input: &str) -> Result<String> {
        let expanded = expand_with(input, |name| match self.get(name) {
            Some(v) => Lookup::Found(v.to_string()),
            None => Lookup::Unknown,
        })?;
        Ok(expanded.unwrap_or_default())
    }

    /// Resolve `raw` properties that may refer to each other in any order,
    /// defining each one as it resolves
    pub fn define_all(&mut self, raw: &BTreeMap<String, String>) -> Result<()> {
        let mut pending: Vec<(&String, &String)> = raw.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut still_pending = Vec::new();
            for (name, value) in pending {
                let resolved = expand_with(value, |reference| {
                    if let Some(v) = self.get(reference) {
                        Lookup::Found(v.to_string())
                    } else if raw.keys().any(|k| k.eq_ignore_ascii_case(reference)) {
                        Lookup::Pending
                    } else {
                        Lookup::Unknown
                    }
                })
                .map_err(|e| AppError::Config(format!("property \"{}\": {}", name, e)))?;
                match resolved {
                    Some(v) => self.define(name, v),
                    None => still_pending.push((name, value)),
                }
            }
            if still_pending.len() == before {
                let names: Vec<_> = still_pending.iter().map(|(n, _)| n.as_str()).collect();
                return Err(AppError::Config(format!(
                    "circular property references between: {}",
                    names.join(", ")
                )));
            }
            pending = still_pending;
        }
        Ok(())
    }
}

/// Expand `${...}` references; None if a reference is still pending
fn expand_with<F>(input: &str, lookup: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Lookup,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            AppError::Config(format!("unterminated property reference in \"{}\"", input))
        })?;
        let name = after[..end].trim();

        if name == "$" {
            out.push('$');
        } else if let Some(var) = name.strip_prefix("env.") {
            let value = std::env::var(var).map_err(|_| {
                AppError::Config(format!("environment variable \"{}\" is not set", var))
            })?;
            out.push_str(&value);
        } else {
            match lookup(name) {
                Lookup::Found(v) => out.push_str(&v),
                Lookup::Pending => return Ok(None),
                Lookup::Unknown => {
                    return Err(AppError::Config(format!(
                        "unknown property reference ${{{}}}",
                        name
                    )))
                }
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    if out.starts_with('~') {
        out = shellexpand::tilde(&out).into_owned();
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_and_literal_dollar() {
        let mut exp = PropertyExpander::new();
        exp.define("outDirName", "out-linux");
        assert_eq!(
            exp.expand("logs/${OUTDIRNAME}/cost=${$}5").unwrap(),
            "logs/out-linux/cost=$5"
        );
        assert_eq!(exp.expand("no refs").unwrap(), "no refs");
    }

    #[test]
    fn test_env_references() {
        std::env::set_var("RIGTEST_EXPAND_TEST_VAR", "hello");
        let exp = PropertyExpander::new();
        assert_eq!(exp.expand("${env.RIGTEST_EXPAND_TEST_VAR}!").unwrap(), "hello!");
        assert!(exp.expand("${env.RIGTEST_EXPAND_TEST_UNSET}").is_err());
    }

    #[test]
    fn test_errors() {
        let exp = PropertyExpander::new();
        assert!(matches!(exp.expand("${missing}"), Err(AppError::Config(_))));
        assert!(matches!(exp.expand("${open"), Err(AppError::Config(_))));
    }

    #[test]
    fn test_define_all_resolves_out_of_order() {
        let mut exp = PropertyExpander::new();
        exp.define("testRootDir", "/tests");
        let raw: BTreeMap<String, String> = [
            ("appHome".to_string(), "${dataDir}/app".to_string()),
            ("dataDir".to_string(), "${testRootDir}/data".to_string()),
        ]
        .into_iter()
        .collect();

        exp.define_all(&raw).unwrap();
        assert_eq!(exp.get("apphome"), Some("/tests/data/app"));
    }

    #[test]
    fn test_define_all_detects_cycles() {
        let mut exp = PropertyExpander::new();
        let raw: BTreeMap<String, String> = [
            ("a".to_string(), "${b}".to_string()),
            ("b".to_string(), "${a}".to_string()),
        ]
        .into_iter()
        .collect();
        let err = exp.define_all(&raw).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn test_tilde() {
        let exp = PropertyExpander::new();
        let expanded = exp.expand("~/work").unwrap();
        assert!(!expanded.starts_with('~') || std::env::var("HOME").is_err());
    }
}
