pub mod config;
pub mod inspect;
pub mod logging;

pub use config::{AugmentingDefaults, ToolConfig};
