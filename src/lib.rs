pub mod attachment;
pub mod client;
pub mod config;
pub mod event;
pub mod logging;
pub mod merge;
pub mod reporter;
pub mod time;

pub use client::{ItemHandle, ItemStatus, LogLevel, ReportingClient};
pub use config::ReporterOptions;
pub use reporter::Reporter;
