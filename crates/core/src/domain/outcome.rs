// Test Outcome Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Outcome of a test, declared in precedence order (highest first).
///
/// When a test accumulates several outcomes the overall outcome is the one
/// with the highest precedence, so a single `Failed` beats any number of
/// `Passed` outcomes, and `Skipped` beats everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    Skipped,
    Blocked,
    DumpedCore,
    TimedOut,
    Failed,
    NotVerified,
    Inspect,
    Passed,
}

impl Outcome {
    /// All outcomes in precedence order
    pub const ALL: [Outcome; 8] = [
        Outcome::Skipped,
        Outcome::Blocked,
        Outcome::DumpedCore,
        Outcome::TimedOut,
        Outcome::Failed,
        Outcome::NotVerified,
        Outcome::Inspect,
        Outcome::Passed,
    ];

    /// Human-readable name used in every report format
    pub fn display_name(&self) -> &'static str {
        match self {
            Outcome::Skipped => "SKIPPED",
            Outcome::Blocked => "BLOCKED",
            Outcome::DumpedCore => "DUMPED CORE",
            Outcome::TimedOut => "TIMED OUT",
            Outcome::Failed => "FAILED",
            Outcome::NotVerified => "NOT VERIFIED",
            Outcome::Inspect => "REQUIRES INSPECTION",
            Outcome::Passed => "PASSED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::Blocked | Outcome::DumpedCore | Outcome::TimedOut | Outcome::Failed
        )
    }

    /// Parse a display name such as `"NOT VERIFIED"` (case-insensitive)
    pub fn from_display_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_uppercase();
        Outcome::ALL
            .iter()
            .copied()
            .find(|o| o.display_name() == wanted)
            .ok_or_else(|| DomainError::UnknownOutcome(name.trim().to_string()))
    }

    /// Highest-precedence outcome, or `NotVerified` if there is none
    pub fn combine<I>(outcomes: I) -> Outcome
    where
        I: IntoIterator<Item = Outcome>,
    {
        outcomes.into_iter().min().unwrap_or(Outcome::NotVerified)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Parse a comma-separated list of outcome display names.
///
/// `"*"` selects every outcome; an empty string selects none.
pub fn parse_outcome_list(spec: &str) -> Result<Vec<Outcome>> {
    if spec.trim() == "*" {
        return Ok(Outcome::ALL.to_vec());
    }
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Outcome::from_display_name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert_eq!(
            Outcome::combine([Outcome::Passed, Outcome::Failed, Outcome::NotVerified]),
            Outcome::Failed
        );
        assert_eq!(
            Outcome::combine([Outcome::TimedOut, Outcome::Blocked]),
            Outcome::Blocked
        );
        assert_eq!(Outcome::combine([]), Outcome::NotVerified);
    }

    #[test]
    fn test_failure_classification() {
        let failures: Vec<_> = Outcome::ALL.iter().filter(|o| o.is_failure()).collect();
        assert_eq!(
            failures,
            vec![
                &Outcome::Blocked,
                &Outcome::DumpedCore,
                &Outcome::TimedOut,
                &Outcome::Failed
            ]
        );
        assert!(!Outcome::Skipped.is_failure());
        assert!(!Outcome::Inspect.is_failure());
    }

    #[test]
    fn test_display_name_parsing() {
        assert_eq!(
            Outcome::from_display_name(" requires inspection ").unwrap(),
            Outcome::Inspect
        );
        assert_eq!(Outcome::from_display_name("TIMED OUT").unwrap(), Outcome::TimedOut);
        assert!(matches!(
            Outcome::from_display_name("BROKEN"),
            Err(DomainError::UnknownOutcome(_))
        ));
    }

    #[test]
    fn test_outcome_list() {
        assert_eq!(parse_outcome_list("*").unwrap().len(), 8);
        assert!(parse_outcome_list("").unwrap().is_empty());
        // INSPECT is the variant, not the display name
        assert!(parse_outcome_list("NOT VERIFIED, inspect").is_err());
        assert_eq!(
            parse_outcome_list("NOT VERIFIED, REQUIRES INSPECTION").unwrap(),
            vec![Outcome::NotVerified, Outcome::Inspect]
        );
    }
}
