//! # Preciosa Service Worker
//!
//! Offline cache worker for the Preciosa PWA, together with the small host
//! runtime it needs outside a browser.
//!
//! ## Features
//!
//! - **Install**: pre-cache a pinned manifest, all-or-nothing
//! - **Activate**: drop every cache that is not the current version,
//!   broadcast `"update"`, claim open pages
//! - **Fetch**: network-first or cache-first, chosen by configuration
//! - **Message**: `{ "type": "SKIP_WAITING" }`
//! - **Push / notification click**: fixed notification, focus-or-open
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host runtime)
//!     │
//!     ├── ServiceWorkerRegistration (per scope)
//!     │       ├── installing / waiting / active (ServiceWorker)
//!     │       └── OfflineWorker ── DispatchTable ── handlers
//!     │
//!     └── Host
//!             ├── CacheStorage ── Cache ── Request → Response
//!             ├── Clients (open pages, message channels)
//!             ├── Notifications
//!             ├── Fetcher (network)
//!             └── BestEffort (fire-and-forget tasks)
//! ```

use thiserror::Error;

pub mod background;
pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod events;
pub mod notification;
pub mod offline;
pub mod registration;
pub mod strategy;
pub mod worker;

pub use background::BestEffort;
pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::WorkerConfig;
pub use container::{
    RegistrationSnapshot, ServiceWorkerContainer, ServiceWorkerEvent, WorkerSlot, WorkerSnapshot,
};
pub use dispatch::{DispatchTable, Handler};
pub use events::{
    ActivationReport, ClickOutcome, EventKind, EventOutcome, FetchEvent, MessageEvent,
    MessageOutcome, NotificationClickEvent, PushEvent, WorkerEvent,
};
pub use notification::{
    Notification, NotificationAction, NotificationConfig, NotificationId, NotificationOptions,
    Notifications,
};
pub use offline::OfflinePage;
pub use registration::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};
pub use strategy::FetchStrategy;
pub use worker::{Host, OfflineWorker};

/// Message posted to every page after activation.
pub const UPDATE_MESSAGE: &str = "update";

/// `type` field of the page message that skips the waiting phase.
pub const SKIP_WAITING: &str = "SKIP_WAITING";

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Handler for {expected} received a {got} event")]
    EventMismatch { expected: EventKind, got: EventKind },
}

impl From<preciosa_net::NetError> for ServiceWorkerError {
    fn from(e: preciosa_net::NetError) -> Self {
        Self::NetworkError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
