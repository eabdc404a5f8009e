//! CI events collector client
//!
//! Buffers CI events in memory and delivers them, batched, to a collector's
//! events API from a single background thread.
//!
//! ## Delivery policy
//!
//! - Every cycle ships everything pending as one batch
//! - A non-200 answer is retried with a doubling pause, up to
//!   `max_send_retries` attempts
//! - Exhausted retries or a transport error drop all pending events and
//!   suspend delivery for `suspend_interval_secs`
//! - `activate()` lifts a suspension immediately
//!
//! Producers are never blocked by, or told about, delivery failures.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ci_events_core::collector::{
//!     CiEvent, CiEventType, ConfiguredServer, EventsService, HttpTransport,
//! };
//! use ci_events_core::Config;
//!
//! let config = Config::load().expect("failed to load config");
//! let server = ConfiguredServer::new(&config.server).expect("invalid server config");
//! let transport = HttpTransport::new(config.delivery.request_timeout()).expect("http client");
//!
//! let service = EventsService::start(config.delivery, Arc::new(server), Arc::new(transport))
//!     .expect("failed to start events service");
//! service.publish(CiEvent::new(CiEventType::Started, "nightly", "42"));
//! ```

mod buffer;
mod client;
mod events;
mod publisher;
mod server;
mod waiter;
mod worker;

pub use buffer::EventBuffer;
pub use client::{HttpTransport, Request, Response, Transport};
pub use events::{BuildResult, CiEvent, CiEventType, EventsBatch};
pub use publisher::{DeliveryStats, EventsService};
pub use server::{ConfiguredServer, EndpointConfig, ServerContext, ServerInfo};
pub use waiter::{WaitOutcome, Waiter};
pub use worker::DeliveryState;
