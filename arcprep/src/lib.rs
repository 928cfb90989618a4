pub mod auth;
pub mod azure;
pub mod checks;
pub mod config;
pub mod context;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod gpo;
pub mod installer;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod pwsh;
pub mod remediation;
pub mod report;
pub mod types;

pub use error::Error;
pub use error::Result;
