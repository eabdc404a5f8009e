//! # ci-events-core
//!
//! Best-effort delivery of CI build events to a remote collector.
//!
//! This library provides:
//! - Event records and the JSON batch envelope
//! - A background delivery worker with retry, backoff and suspension
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use ci_events_core::Config;
//!
//! let config = Config::load().expect("failed to load config");
//! config.validate().expect("invalid configuration");
//! ```

// Re-export commonly used items at the crate root
pub use collector::{CiEvent, CiEventType, EventsService};
pub use config::Config;
pub use error::{Error, Result};

// Public modules
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
