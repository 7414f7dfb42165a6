// Configuration - project file loading and property expansion

pub mod expand;
pub mod project;

pub use expand::PropertyExpander;
pub use project::{LoadContext, ProjectConfig, ProjectSection, WriterConfig, ENV_OVERRIDE_PREFIX};
