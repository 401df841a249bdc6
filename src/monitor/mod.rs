//! Background health-monitoring and reminder engine.
//!
//! Stages joined by traits:
//! ```text
//! Store → Scanner / Analyzer → Composer (provider chain) → Recorder (dedup + push)
//! ```
//! `TickRunner` runs one pass over every patient; `MonitorEngine` owns the
//! timer that drives it.

pub mod error;
pub mod types;
pub mod traits;
pub mod rules;
pub mod analyzer;
pub mod scanner;
pub mod composer;
pub mod providers;
pub mod push;
pub mod recorder;
pub mod runner;
pub mod engine;

#[cfg(test)]
pub(crate) mod testing;

pub use error::MonitorError;
pub use types::*;
pub use traits::*;
pub use rules::{AlertRule, Comparator, Severity};
pub use analyzer::RuleBasedAnalyzer;
pub use scanner::DueItemScanner;
pub use composer::NotificationComposer;
pub use providers::{build_providers, OllamaProvider, OpenAiCompatibleProvider};
pub use push::{build_push_gateway, HttpPushGateway, LogOnlyPushGateway};
pub use recorder::NotificationRecorder;
pub use runner::TickRunner;
pub use engine::MonitorEngine;
