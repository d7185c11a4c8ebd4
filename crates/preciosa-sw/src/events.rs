//! Events delivered to a worker and what handling them produced.

use bytes::Bytes;
use preciosa_net::{Request, Response};
use serde_json::Value as JsonValue;

use crate::notification::NotificationId;

/// Kinds of event a worker can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    NotificationClick,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Install,
        EventKind::Activate,
        EventKind::Fetch,
        EventKind::Message,
        EventKind::Push,
        EventKind::NotificationClick,
    ];

    /// DOM event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Message => "message",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A request from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// Page that issued the request, if any.
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
        }
    }
}

/// A message posted by a page.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
    pub source: Option<String>,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self { data, source: None }
    }
}

/// A push from the platform push service. The payload is never parsed.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

/// The user clicked a notification or one of its actions.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: NotificationId,
    pub action: Option<String>,
}

/// Event delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchEvent),
    Message(MessageEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// What the activate handler did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Cache names deleted.
    pub deleted: Vec<String>,
    /// Clients the `"update"` broadcast reached.
    pub notified: usize,
    /// Clients that changed controller through claim.
    pub claimed: Vec<String>,
}

/// Result of a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkipWaiting,
    Ignored,
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was focused.
    Focused(String),
    /// A new window was opened.
    Opened(String),
}

/// What handling an event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed,
    Activated(ActivationReport),
    Response(Response),
    Message(MessageOutcome),
    NotificationShown(NotificationId),
    Clicked(ClickOutcome),
}
