//! Event dispatch table.
//!
//! Every supported event kind maps to exactly one handler. A kind without an
//! entry is not handled by the worker at all.

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::events::{EventKind, EventOutcome, WorkerEvent};
use crate::worker::OfflineWorker;
use crate::{Result, ServiceWorkerError};

/// A handler for one event kind.
pub type Handler =
    for<'a> fn(&'a OfflineWorker, WorkerEvent) -> BoxFuture<'a, Result<EventOutcome>>;

/// Event kind → handler.
#[derive(Clone)]
pub struct DispatchTable {
    handlers: BTreeMap<EventKind, Handler>,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

impl DispatchTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// The offline worker's handlers for all six lifecycle events.
    pub fn standard() -> Self {
        Self::empty()
            .with(EventKind::Install, on_install)
            .with(EventKind::Activate, on_activate)
            .with(EventKind::Fetch, on_fetch)
            .with(EventKind::Message, on_message)
            .with(EventKind::Push, on_push)
            .with(EventKind::NotificationClick, on_notification_click)
    }

    /// Register (or replace) the handler for `kind`.
    pub fn with(mut self, kind: EventKind, handler: Handler) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: EventKind) -> Option<Handler> {
        self.handlers.get(&kind).copied()
    }

    /// Handled event kinds, in lifecycle order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.handlers.keys().copied().collect()
    }

    /// Run the handler registered for `event`.
    pub async fn dispatch(
        &self,
        worker: &OfflineWorker,
        event: WorkerEvent,
    ) -> Result<EventOutcome> {
        let kind = event.kind();
        let handler = self
            .get(kind)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("no handler for {kind}")))?;
        handler(worker, event).await
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn mismatch(expected: EventKind, got: EventKind) -> ServiceWorkerError {
    ServiceWorkerError::EventMismatch { expected, got }
}

fn on_install(worker: &OfflineWorker, event: WorkerEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::Install = event else {
            return Err(mismatch(EventKind::Install, got));
        };
        worker.install().await?;
        Ok(EventOutcome::Installed)
    })
}

fn on_activate(worker: &OfflineWorker, event: WorkerEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::Activate = event else {
            return Err(mismatch(EventKind::Activate, got));
        };
        Ok(EventOutcome::Activated(worker.activate().await?))
    })
}

fn on_fetch(worker: &OfflineWorker, event: WorkerEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::Fetch(fetch) = event else {
            return Err(mismatch(EventKind::Fetch, got));
        };
        Ok(EventOutcome::Response(worker.fetch(&fetch).await?))
    })
}

fn on_message(worker: &OfflineWorker, event: WorkerEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::Message(message) = event else {
            return Err(mismatch(EventKind::Message, got));
        };
        Ok(EventOutcome::Message(worker.message(&message)))
    })
}

fn on_push(worker: &OfflineWorker, event: WorkerEvent) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::Push(push) = event else {
            return Err(mismatch(EventKind::Push, got));
        };
        Ok(EventOutcome::NotificationShown(worker.push(&push).await?))
    })
}

fn on_notification_click(
    worker: &OfflineWorker,
    event: WorkerEvent,
) -> BoxFuture<'_, Result<EventOutcome>> {
    Box::pin(async move {
        let got = event.kind();
        let WorkerEvent::NotificationClick(click) = event else {
            return Err(mismatch(EventKind::NotificationClick, got));
        };
        Ok(EventOutcome::Clicked(worker.notification_click(&click).await?))
    })
}
