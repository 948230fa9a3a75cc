//! Service layer: the chain watcher task and the report request path.
//!
//! [`ChainWatcher`] keeps memberships in step with the registry contract;
//! [`ReportService`] authenticates, rate-limits and stores reports.

pub mod report_service;
pub mod watcher;

pub use report_service::ReportService;
pub use watcher::{ChainWatcher, WatcherConfig, WatcherError};
