//! Hostlink Core - records, buffering, service contract and runtime
//!
//! This crate provides the building blocks of the Hostlink agent:
//!
//! - **Records**: schema-tagged, timestamped attribute maps
//! - **Buffer**: bounded in-memory queue shared by every collector
//! - **Sink**: chunked flushing with re-insertion of undelivered records
//! - **Services**: lifecycle contract, interval adapter and supervisor
//! - **Runtime**: collector registry, push loop, health records, hot reload
//! - **Config**: TOML configuration with environment overrides
//!
//! # Quick Start
//!
//! ```no_run
//! use hostlink_core::{AgentConfig, AgentRuntime, CollectorFactories};
//!
//! # async fn example() {
//! let runtime = AgentRuntime::builder(AgentConfig::default())
//!     .factories(CollectorFactories::default())
//!     .build();
//! runtime.start();
//! // ...
//! runtime.stop().await;
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod output;
pub mod record;
pub mod runtime;
pub mod service;
pub mod sink;

// Re-export commonly used types
pub use buffer::{EventBuffer, InMemoryBuffer};
pub use config::{AgentConfig, ConfigError, ConfigLoader, ConfigResult, SourceConfig};
pub use error::{AgentError, AgentResult};
pub use output::{ConsoleEventOutput, EventOutput};
pub use record::{Record, Value};
pub use runtime::{AgentRuntime, CollectorFactories, ConfigWatcher};
pub use service::{ErrorPolicy, IntervalRunner, IntervalService, Service, ServiceHost};
pub use sink::EventSink;

/// Agent version
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
