//! Remote event infrastructure.
//!
//! ## Architecture
//!
//! ```text
//! EventSource::receive ──► EventDispatcher ──► handler (by EventType)
//!                                │                 │
//!                                │◄── Ok(()) ──────┘
//!                                ▼
//!                       EventSource::confirm(uuid)
//! ```
//!
//! Delivery is at-least-once: a handler error leaves the event unconfirmed and
//! the source redelivers it later. Confirm is idempotent, so handling a
//! duplicate is harmless.

pub mod dispatcher;
pub mod handlers;
pub mod types;

pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatchStats, EventDispatcher, EventDispatcherBuilder,
    EventHandler,
};
pub use handlers::{default_handlers, ExportDownloadHandler, NotificationHandler, PongHandler};
pub use types::{EventPayload, EventType, RemoteEvent};
