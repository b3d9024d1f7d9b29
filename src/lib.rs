//! case-agent - example agent for a remote case-management platform.
//!
//! The agent keeps an event pump running against the platform, gates startup
//! on connectivity, and runs a pool of workers that exercise the case and
//! source-file API end to end.
//!
//! ## Layout
//!
//! ```text
//! remote        RemoteCaseClient / EventSource seams, HTTP + in-memory impls
//! events        event types, dispatcher, handlers
//! connectivity  INIT/CONNECTING/UP/DOWN state machine + health monitor
//! polling       bounded poll-until-condition
//! scenario      the per-iteration CRUD workflow and cleanup
//! pool          staggered worker spawn
//! agent         startup wiring
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use case_agent::{Agent, AgentConfig, InMemoryCaseService};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let service = Arc::new(InMemoryCaseService::new());
//! let agent = Agent::new(AgentConfig::default(), service.clone(), service);
//! let running = agent.start().await?;
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

pub mod config;
pub mod model;

// Remote platform access
pub mod remote;

pub mod connectivity;
pub mod events;
pub mod polling;

// Example workload
pub mod pool;
pub mod scenario;

pub mod agent;
pub mod health;

pub use agent::{Agent, RunningAgent};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use model::{LegalCase, SourceFile, SourceFileStatus};
pub use remote::{EventSource, HttpCaseClient, InMemoryCaseService, RemoteCaseClient};
