//! Host runtime (navigator.serviceWorker).
//!
//! Owns the registrations and drives each worker through
//! installing → waiting → activating → active. Handlers run through the
//! worker's dispatch table; the registration lock is never held while a
//! handler is running.

use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use preciosa_net::{Fetcher, Request, Response};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientInbox, ClientMatchOptions, ClientType};
use crate::config::WorkerConfig;
use crate::events::{
    ActivationReport, ClickOutcome, EventOutcome, FetchEvent, MessageEvent, MessageOutcome,
    NotificationClickEvent, PushEvent, WorkerEvent,
};
use crate::notification::NotificationId;
use crate::registration::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
use crate::worker::{Host, OfflineWorker};
use crate::{Result, ServiceWorkerError};

/// Lifecycle notifications emitted by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker changed state.
    StateChange {
        scope: String,
        worker: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { scope: String, worker: ServiceWorkerId },
    /// A page got a new controller.
    ControllerChange {
        client_id: String,
        worker: ServiceWorkerId,
    },
}

/// Slot of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSlot {
    Installing,
    Waiting,
    Active,
}

/// One worker as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub cache_name: String,
    pub state: ServiceWorkerState,
}

impl From<&ServiceWorker> for WorkerSnapshot {
    fn from(sw: &ServiceWorker) -> Self {
        Self {
            id: sw.id().to_string(),
            cache_name: sw.worker.cache_name().to_string(),
            state: sw.state,
        }
    }
}

/// Point-in-time view of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationSnapshot {
    pub scope: Url,
    pub installing: Option<WorkerSnapshot>,
    pub waiting: Option<WorkerSnapshot>,
    pub active: Option<WorkerSnapshot>,
}

impl From<&ServiceWorkerRegistration> for RegistrationSnapshot {
    fn from(reg: &ServiceWorkerRegistration) -> Self {
        Self {
            scope: reg.scope.clone(),
            installing: reg.installing.as_ref().map(WorkerSnapshot::from),
            waiting: reg.waiting.as_ref().map(WorkerSnapshot::from),
            active: reg.active.as_ref().map(WorkerSnapshot::from),
        }
    }
}

/// Service worker container.
pub struct ServiceWorkerContainer {
    host: Host,

    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Event sender for lifecycle changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container with fresh host state on top of `fetcher`.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        Self::with_host(Host::new(fetcher))
    }

    pub fn with_host(host: Host) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                host,
                registrations: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, scope: &str, sw: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope.to_string(),
            worker: sw.id(),
            state: sw.state,
        });
    }

    // ---------- registration ----------

    /// Register a worker built from `config` and run its install.
    ///
    /// On success the worker is waiting, or already active if nothing
    /// prevented activation. On failure it is redundant and whatever was
    /// active before stays in control.
    pub async fn register(&self, config: WorkerConfig) -> Result<ServiceWorkerId> {
        let worker = build_worker(config, &self.host)?;
        let id = worker.id();
        let scope = worker.config().scope.to_string();
        info!(scope = %scope, worker = %id, cache = %worker.cache_name(), "Registering service worker");

        self.begin_install(&scope, &worker).await;
        let installed = match worker.dispatch(WorkerEvent::Install).await {
            Ok(_) => Ok(()),
            Err(e @ ServiceWorkerError::InstallFailed(_)) => Err(e),
            Err(e) => Err(ServiceWorkerError::InstallFailed(e.to_string())),
        };
        self.finish_install(&scope, id, installed).await?;

        self.try_activate(&scope).await?;
        Ok(id)
    }

    /// Bring back a worker installed in an earlier session.
    ///
    /// Its store, named by `config`, must already be in the host's cache
    /// storage. The install event is not dispatched again; the worker goes
    /// straight to installed and then activates like a fresh registration.
    pub async fn restore(&self, config: WorkerConfig) -> Result<ServiceWorkerId> {
        let worker = build_worker(config, &self.host)?;
        if !self.host.caches.read().await.has(worker.cache_name()) {
            return Err(ServiceWorkerError::NotFound(format!(
                "cache {}",
                worker.cache_name()
            )));
        }
        let id = worker.id();
        let scope = worker.config().scope.to_string();
        info!(scope = %scope, worker = %id, cache = %worker.cache_name(), "Restoring service worker");

        self.begin_install(&scope, &worker).await;
        self.finish_install(&scope, id, Ok(())).await?;

        self.try_activate(&scope).await?;
        Ok(id)
    }

    async fn begin_install(&self, scope: &str, worker: &Arc<OfflineWorker>) {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .entry(scope.to_string())
            .or_insert_with(|| ServiceWorkerRegistration::new(worker.config().scope.clone()));
        if let Some(replaced) = registration.begin_install(Arc::clone(worker)) {
            self.emit_state(scope, &replaced);
        }
        self.emit(ServiceWorkerEvent::UpdateFound {
            scope: scope.to_string(),
            worker: worker.id(),
        });
        if let Some(installing) = &registration.installing {
            self.emit_state(scope, installing);
        }
    }

    async fn finish_install(
        &self,
        scope: &str,
        id: ServiceWorkerId,
        installed: Result<()>,
    ) -> Result<()> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations.get_mut(scope).ok_or_else(|| {
            ServiceWorkerError::StateError(format!("{scope} unregistered during install"))
        })?;
        if registration.installing.as_ref().map(ServiceWorker::id) != Some(id) {
            return Err(ServiceWorkerError::StateError(format!(
                "{id} was superseded during install"
            )));
        }

        if let Err(e) = installed {
            if let Some(failed) = registration.install_failed() {
                self.emit_state(scope, &failed);
            }
            return Err(e);
        }

        if let Some(replaced) = registration.install_complete() {
            self.emit_state(scope, &replaced);
        }
        if let Some(waiting) = &registration.waiting {
            self.emit_state(scope, waiting);
        }
        Ok(())
    }

    /// Activate the waiting worker of `scope` if nothing holds it back:
    /// it asked to skip waiting, or no page is controlled by the active one.
    pub async fn try_activate(&self, scope: &str) -> Result<bool> {
        let (skip, previous) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let Some(waiting) = &registration.waiting else {
                return Ok(false);
            };
            (
                waiting.worker.skip_waiting_requested(),
                registration.active.as_ref().map(ServiceWorker::id),
            )
        };

        let ready = match previous {
            _ if skip => true,
            None => true,
            Some(active) => self.host.clients.read().await.controlled_by(active) == 0,
        };

        if !ready {
            debug!(scope = %scope, "Waiting worker held back");
            return Ok(false);
        }
        self.activate(scope).await?;
        Ok(true)
    }

    /// Promote the waiting worker of `scope` unconditionally and run its
    /// activate handler.
    pub async fn activate(&self, scope: &str) -> Result<ActivationReport> {
        let (worker, previous) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            if registration.waiting.is_none() {
                return Err(ServiceWorkerError::StateError(format!(
                    "no waiting worker for {scope}"
                )));
            }

            let previous = registration.activate();
            if let Some(old) = &previous {
                self.emit_state(scope, old);
            }
            let active = registration
                .active
                .as_ref()
                .ok_or_else(|| ServiceWorkerError::StateError("activation lost".to_string()))?;
            self.emit_state(scope, active);
            (Arc::clone(&active.worker), previous.map(|old| old.id()))
        };

        let report = match worker.dispatch(WorkerEvent::Activate).await {
            Ok(EventOutcome::Activated(report)) => report,
            Ok(other) => {
                warn!(?other, "Activate handler produced an unexpected outcome");
                ActivationReport::default()
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Activate handler failed");
                ActivationReport::default()
            }
        };

        let mut changed = report.claimed.clone();
        if let Some(old) = previous {
            changed.extend(self.host.clients.write().await.replace_controller(old, worker.id()));
        }
        for client_id in changed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker: worker.id(),
            });
        }

        let mut registrations = self.registrations.write().await;
        if let Some(registration) = registrations.get_mut(scope) {
            registration.activation_complete();
            if let Some(active) = &registration.active {
                self.emit_state(scope, active);
            }
        }
        info!(scope = %scope, worker = %worker.id(), "Service worker activated");
        Ok(report)
    }

    /// Scope of the registration covering `url`, longest match first.
    pub async fn get_registration(&self, url: &Url) -> Option<String> {
        self.registrations
            .read()
            .await
            .keys()
            .filter(|scope| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    /// All registered scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    pub async fn snapshot(&self, scope: &str) -> Option<RegistrationSnapshot> {
        self.registrations
            .read()
            .await
            .get(scope)
            .map(RegistrationSnapshot::from)
    }

    /// State of the worker in `slot`.
    pub async fn state(&self, scope: &str, slot: WorkerSlot) -> Option<ServiceWorkerState> {
        self.worker_in(scope, slot).await.map(|(_, state)| state)
    }

    async fn worker_in(
        &self,
        scope: &str,
        slot: WorkerSlot,
    ) -> Option<(Arc<OfflineWorker>, ServiceWorkerState)> {
        let registrations = self.registrations.read().await;
        let registration = registrations.get(scope)?;
        let sw = match slot {
            WorkerSlot::Installing => registration.installing.as_ref(),
            WorkerSlot::Waiting => registration.waiting.as_ref(),
            WorkerSlot::Active => registration.active.as_ref(),
        }?;
        Some((Arc::clone(&sw.worker), sw.state))
    }

    async fn active_worker(&self, scope: &str) -> Result<Arc<OfflineWorker>> {
        self.worker_in(scope, WorkerSlot::Active)
            .await
            .map(|(worker, _)| worker)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("no active worker for {scope}")))
    }

    /// Unregister `scope`. Clients keep running uncontrolled.
    pub async fn unregister(&self, scope: &str) -> bool {
        let Some(mut registration) = self.registrations.write().await.remove(scope) else {
            return false;
        };
        let ids: Vec<ServiceWorkerId> = [&registration.installing, &registration.waiting, &registration.active]
            .into_iter()
            .flatten()
            .map(ServiceWorker::id)
            .collect();
        registration.unregister();

        let mut clients = self.host.clients.write().await;
        let scope_url = registration.scope.clone();
        let controlled: Vec<String> = clients
            .match_all(
                &scope_url,
                &ClientMatchOptions {
                    include_uncontrolled: true,
                    client_type: ClientType::All,
                    controlled_by: None,
                },
            )
            .into_iter()
            .filter(|c| c.controller.is_some_and(|w| ids.contains(&w)))
            .map(|c| c.id.clone())
            .collect();
        for id in controlled {
            clients.release(&id);
        }
        info!(scope = %scope, "Service worker unregistered");
        true
    }

    // ---------- clients ----------

    /// Connect a page at `url`. It is controlled by the active worker of the
    /// registration covering it, if any.
    pub async fn connect_client(&self, url: Url, client_type: ClientType) -> (String, ClientInbox) {
        let controller = match self.get_registration(&url).await {
            Some(scope) => self
                .worker_in(&scope, WorkerSlot::Active)
                .await
                .map(|(worker, _)| worker.id()),
            None => None,
        };
        self.host
            .clients
            .write()
            .await
            .connect(url, client_type, controller)
    }

    /// Close a page. A worker held back by it may activate.
    pub async fn disconnect_client(&self, id: &str) -> Result<bool> {
        let Some(client) = self.host.clients.write().await.disconnect(id) else {
            return Ok(false);
        };
        debug!(client = %id, "Client disconnected");
        if let Some(scope) = self.get_registration(&client.url).await {
            self.try_activate(&scope).await?;
        }
        Ok(true)
    }

    /// Controller of a client.
    pub async fn controller(&self, client_id: &str) -> Option<ServiceWorkerId> {
        self.host.clients.read().await.get(client_id)?.controller
    }

    /// Channel of a window opened by a notification click.
    pub async fn take_window_inbox(&self, client_id: &str) -> Option<ClientInbox> {
        self.host.clients.write().await.take_opened_inbox(client_id)
    }

    // ---------- events ----------

    /// Post a page message to the worker in `slot`.
    pub async fn post_message(
        &self,
        scope: &str,
        slot: WorkerSlot,
        data: JsonValue,
        source: Option<String>,
    ) -> Result<MessageOutcome> {
        let (worker, _) = self
            .worker_in(scope, slot)
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("no {slot:?} worker for {scope}")))?;

        let outcome = match worker
            .dispatch(WorkerEvent::Message(MessageEvent { data, source }))
            .await?
        {
            EventOutcome::Message(outcome) => outcome,
            other => return Err(unexpected("message", &other)),
        };

        if outcome == MessageOutcome::SkipWaiting && slot == WorkerSlot::Waiting {
            self.try_activate(scope).await?;
        }
        Ok(outcome)
    }

    /// Route a page request through the controlling worker, or straight to the
    /// network when the page is uncontrolled.
    pub async fn fetch(&self, request: Request, client_id: Option<String>) -> Result<Response> {
        let controller = match &client_id {
            Some(id) => self.controller(id).await,
            None => None,
        };

        let worker = match controller {
            Some(worker_id) => self.find_worker(worker_id).await,
            None if client_id.is_none() => match self.get_registration(&request.url).await {
                Some(scope) => self.active_worker(&scope).await.ok(),
                None => None,
            },
            None => None,
        };

        let Some(worker) = worker else {
            debug!(url = %request.url, "Uncontrolled request, going to network");
            return Ok(self.host.fetcher.fetch(&request).await?);
        };

        let url = request.url.clone();
        let event = FetchEvent { request, client_id };
        match worker.dispatch(WorkerEvent::Fetch(event)).await {
            Ok(EventOutcome::Response(response)) => Ok(response),
            Ok(other) => Err(unexpected("fetch", &other)),
            Err(e) => {
                warn!(url = %url, error = %e, "Fetch handler failed");
                Err(e)
            }
        }
    }

    /// Deliver a push to the active worker of `scope`.
    pub async fn push(&self, scope: &str, data: Option<Bytes>) -> Result<NotificationId> {
        let worker = self.active_worker(scope).await?;
        match worker.dispatch(WorkerEvent::Push(PushEvent { data })).await {
            Ok(EventOutcome::NotificationShown(id)) => Ok(id),
            Ok(other) => Err(unexpected("push", &other)),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Push handler failed");
                Err(e)
            }
        }
    }

    /// Deliver a notification click to the active worker of `scope`.
    pub async fn click_notification(
        &self,
        scope: &str,
        notification: NotificationId,
        action: Option<String>,
    ) -> Result<ClickOutcome> {
        let worker = self.active_worker(scope).await?;
        let event = NotificationClickEvent {
            notification,
            action,
        };
        match worker.dispatch(WorkerEvent::NotificationClick(event)).await {
            Ok(EventOutcome::Clicked(outcome)) => Ok(outcome),
            Ok(other) => Err(unexpected("notificationclick", &other)),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Notification click handler failed");
                Err(e)
            }
        }
    }

    /// Wait for outstanding best-effort work.
    pub async fn settle(&self) {
        self.host.background.settle().await;
    }

    async fn find_worker(&self, id: ServiceWorkerId) -> Option<Arc<OfflineWorker>> {
        self.registrations
            .read()
            .await
            .values()
            .find_map(|reg| reg.find(id).map(|sw| Arc::clone(&sw.worker)))
    }
}

fn build_worker(config: WorkerConfig, host: &Host) -> Result<Arc<OfflineWorker>> {
    OfflineWorker::new(config, host.clone())
        .map(Arc::new)
        .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))
}

fn unexpected(event: &str, outcome: &EventOutcome) -> ServiceWorkerError {
    ServiceWorkerError::StateError(format!("{event} handler produced {outcome:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use preciosa_net::{MemoryFetcher, ResponseSource};

    const SCOPE: &str = "https://example.com/";

    fn config(version: u32) -> WorkerConfig {
        WorkerConfig::default()
            .with_scope(Url::parse(SCOPE).unwrap())
            .with_manifest(["./", "./index.html"])
            .with_version(version)
    }

    fn network() -> Arc<MemoryFetcher> {
        let net = Arc::new(MemoryFetcher::new());
        net.serve(SCOPE, "text/html", "home");
        net.serve("https://example.com/index.html", "text/html", "home");
        net
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let (container, mut events) = ServiceWorkerContainer::new(network());
        let id = container.register(config(1)).await.unwrap();

        let snapshot = container.snapshot(SCOPE).await.unwrap();
        let active = snapshot.active.unwrap();
        assert_eq!(active.id, id.to_string());
        assert_eq!(active.state, ServiceWorkerState::Activated);
        assert!(snapshot.waiting.is_none());

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::StateChange { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_get_registration_longest_scope() {
        let net = network();
        net.serve("https://example.com/app/", "text/html", "app");
        net.serve("https://example.com/app/index.html", "text/html", "app");
        let (container, _events) = ServiceWorkerContainer::new(net);
        container.register(config(1)).await.unwrap();
        container
            .register(config(1).with_scope(Url::parse("https://example.com/app/").unwrap()))
            .await
            .unwrap();

        let url = Url::parse("https://example.com/app/page.html").unwrap();
        assert_eq!(
            container.get_registration(&url).await.as_deref(),
            Some("https://example.com/app/")
        );
        assert_eq!(container.get_registrations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_registration() {
        let (container, _events) = ServiceWorkerContainer::new(network());
        let result = container.register(config(0)).await;
        assert!(matches!(result, Err(ServiceWorkerError::RegistrationFailed(_))));
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_releases_clients() {
        let (container, _events) = ServiceWorkerContainer::new(network());
        container.register(config(1)).await.unwrap();
        let (page, _inbox) = container
            .connect_client(Url::parse(SCOPE).unwrap(), ClientType::Window)
            .await;
        assert!(container.controller(&page).await.is_some());

        assert!(container.unregister(SCOPE).await);
        assert!(container.controller(&page).await.is_none());
        assert!(!container.unregister(SCOPE).await);
    }

    #[tokio::test]
    async fn test_restore_serves_from_existing_store() {
        let installed = network();
        let (first, _events) = ServiceWorkerContainer::new(installed);
        first.register(config(1)).await.unwrap();
        let caches = std::mem::take(&mut *first.host().caches.write().await);

        let offline = Arc::new(MemoryFetcher::new());
        offline.set_online(false);
        let (container, _events) =
            ServiceWorkerContainer::with_host(Host::with_caches(offline.clone(), caches));

        assert!(container.register(config(1)).await.is_err());
        let id = container.restore(config(1)).await.unwrap();
        assert_eq!(
            container.state(SCOPE, WorkerSlot::Active).await,
            Some(ServiceWorkerState::Activated)
        );

        let (page, _inbox) = container
            .connect_client(Url::parse(SCOPE).unwrap(), ClientType::Window)
            .await;
        assert_eq!(container.controller(&page).await, Some(id));
        let response = container
            .fetch(Request::navigate(Url::parse(SCOPE).unwrap()), Some(page))
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.text().unwrap(), "home");
    }

    #[tokio::test]
    async fn test_restore_requires_store() {
        let (container, _events) = ServiceWorkerContainer::new(network());
        let result = container.restore(config(3)).await;
        assert!(matches!(result, Err(ServiceWorkerError::NotFound(_))));
        assert!(container.get_registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncontrolled_fetch_goes_to_network() {
        let net = network();
        net.serve("https://other.org/x", "text/plain", "x");
        let (container, _events) = ServiceWorkerContainer::new(Arc::<MemoryFetcher>::clone(&net));

        let response = container
            .fetch(Request::parse("https://other.org/x").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "x");
        assert_eq!(net.calls_for("https://other.org/x"), 1);
    }
}
