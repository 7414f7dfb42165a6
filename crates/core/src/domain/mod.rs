// Domain Layer - Pure test-run entities

pub mod error;
pub mod outcome;
pub mod process;
pub mod result;
pub mod test_case;

// Re-exports
pub use error::DomainError;
pub use outcome::{parse_outcome_list, Outcome};
pub use process::{ExitInfo, ExitStatusCondition, ProcessMode, ProcessSpec};
pub use result::{to_forward_slashes, RunDetails, TestResult};
pub use test_case::TestCase;
