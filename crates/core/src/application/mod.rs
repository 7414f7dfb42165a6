// Application Layer - Use Cases and Business Logic

pub mod constants;
pub mod pipeline;
pub mod runner;
mod shutdown;
pub mod summary;
pub mod supervisor;

// Re-exports
pub use pipeline::ResultsPipeline;
pub use runner::{output_dir_for, MonitorHandlerFactory, RunOptions, RunSummary, TestRunner};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use summary::{LineStyle, SummaryLine, SummaryOptions, TestOutcomeSummaryGenerator};
pub use supervisor::ProcessSupervisor;
