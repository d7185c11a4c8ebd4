//! The offline cache worker and the host services it runs against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use preciosa_net::{Fetcher, Request, Response};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::background::BestEffort;
use crate::cache::{self, CacheStorage};
use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::config::WorkerConfig;
use crate::dispatch::DispatchTable;
use crate::events::{
    ActivationReport, ClickOutcome, EventOutcome, FetchEvent, MessageEvent, MessageOutcome,
    NotificationClickEvent, PushEvent, WorkerEvent,
};
use crate::notification::{NotificationId, Notifications};
use crate::registration::ServiceWorkerId;
use crate::{Result, ServiceWorkerError, SKIP_WAITING, UPDATE_MESSAGE};

// ==================== Host ====================

/// What the host runtime provides to every worker it runs.
#[derive(Clone)]
pub struct Host {
    /// Cache storage (caches global).
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Open pages.
    pub clients: Arc<RwLock<Clients>>,

    /// Notification tray.
    pub notifications: Arc<RwLock<Notifications>>,

    /// The network.
    pub fetcher: Arc<dyn Fetcher>,

    /// Fire-and-forget work started by any worker.
    pub background: BestEffort,
}

impl Host {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::with_caches(fetcher, CacheStorage::new())
    }

    /// Start from existing cache contents.
    pub fn with_caches(fetcher: Arc<dyn Fetcher>, caches: CacheStorage) -> Self {
        Self {
            caches: Arc::new(RwLock::new(caches)),
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(Notifications::new())),
            fetcher,
            background: BestEffort::new(),
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

// ==================== Worker ====================

/// One deployed version of the offline cache worker.
pub struct OfflineWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    cache_name: String,
    host: Host,
    table: DispatchTable,
    skip_waiting: AtomicBool,
}

impl std::fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name)
            .field("strategy", &self.config.strategy)
            .field("events", &self.table)
            .finish()
    }
}

impl OfflineWorker {
    /// Build a worker from a validated config.
    pub fn new(config: WorkerConfig, host: Host) -> Result<Self> {
        Self::with_table(config, host, DispatchTable::standard())
    }

    /// Build a worker with a custom dispatch table.
    pub fn with_table(config: WorkerConfig, host: Host, table: DispatchTable) -> Result<Self> {
        config.validate()?;
        let cache_name = config.cache_name();
        Ok(Self {
            id: ServiceWorkerId::new(),
            config: Arc::new(config),
            cache_name,
            host,
            table,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Name of the cache this version owns.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Ask the host to skip the waiting phase.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Deliver an event through the dispatch table.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
        self.table.dispatch(self, event).await
    }

    /// Look `request` up in this version's cache.
    pub async fn cached(&self, request: &Request) -> Option<Response> {
        self.host.caches.read().await.match_in(&self.cache_name, request)
    }

    // ---------- install ----------

    /// Open this version's cache and pin the whole manifest into it.
    pub async fn install(&self) -> Result<()> {
        info!(cache = %self.cache_name, "Service worker installing");

        let urls = self.config.manifest_urls()?;
        self.host.caches.write().await.open(&self.cache_name);
        debug!(cache = %self.cache_name, "Cache opened");

        match cache::add_all(&self.host.caches, &self.cache_name, self.host.fetcher.as_ref(), &urls)
            .await
        {
            Ok(count) => {
                info!(cache = %self.cache_name, count, "All resources cached");
                if self.config.skip_waiting_on_install {
                    self.skip_waiting();
                }
                Ok(())
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "Install failed");
                Err(ServiceWorkerError::InstallFailed(e.to_string()))
            }
        }
    }

    // ---------- activate ----------

    /// Delete stale caches, tell every page about the update, claim pages.
    pub async fn activate(&self) -> Result<ActivationReport> {
        info!(cache = %self.cache_name, "Service worker activating");
        let mut report = ActivationReport::default();

        let names = self.host.caches.read().await.keys();
        debug!(caches = ?names, "Caches found");
        for name in names.into_iter().filter(|n| *n != self.cache_name) {
            info!(cache = %name, "Deleting old cache");
            if self.host.caches.write().await.delete(&name) {
                report.deleted.push(name);
            } else {
                warn!(cache = %name, "Old cache already gone");
            }
        }

        {
            let clients = self.host.clients.read().await;
            let options = ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::All,
                controlled_by: None,
            };
            let open = clients.match_all(&self.config.scope, &options);
            info!(count = open.len(), "Notifying clients");
            for client in open {
                match client.post_message(JsonValue::from(UPDATE_MESSAGE)) {
                    Ok(()) => report.notified += 1,
                    Err(e) => warn!(client = %client.id, error = %e, "Update message not delivered"),
                }
            }
        }

        report.claimed = self
            .host
            .clients
            .write()
            .await
            .claim(self.id, &self.config.scope);

        info!(
            cache = %self.cache_name,
            deleted = report.deleted.len(),
            claimed = report.claimed.len(),
            "Service worker ready and active"
        );
        Ok(report)
    }

    // ---------- fetch ----------

    /// Answer a page request with the configured strategy.
    pub async fn fetch(&self, event: &FetchEvent) -> Result<Response> {
        debug!(
            url = %event.request.url,
            strategy = %self.config.strategy,
            client = ?event.client_id,
            "Fetch event"
        );
        self.config.strategy.respond(self, &event.request).await
    }

    // ---------- message ----------

    /// Handle a page message. Only `{ "type": "SKIP_WAITING" }` does anything.
    pub fn message(&self, event: &MessageEvent) -> MessageOutcome {
        debug!(data = %event.data, source = ?event.source, "Message received");

        let kind = event.data.get("type").and_then(JsonValue::as_str);
        if kind == Some(SKIP_WAITING) {
            info!("Skipping wait at client request");
            self.skip_waiting();
            MessageOutcome::SkipWaiting
        } else {
            MessageOutcome::Ignored
        }
    }

    // ---------- push ----------

    /// Show the configured notification. The payload is not read.
    pub async fn push(&self, event: &PushEvent) -> Result<NotificationId> {
        debug!(payload_len = event.data.as_ref().map_or(0, |d| d.len()), "Push received");

        let (title, options) = self.config.notification.descriptor(&self.config.scope)?;
        let id = self.host.notifications.write().await.show(title, options)?;
        info!(tag = %self.config.notification.tag, "Notification shown");
        Ok(id)
    }

    // ---------- notificationclick ----------

    /// Close the notification, then focus the app window or open one.
    pub async fn notification_click(&self, event: &NotificationClickEvent) -> Result<ClickOutcome> {
        debug!(action = ?event.action, "Notification clicked");
        if !self.host.notifications.write().await.close(event.notification) {
            debug!("Notification already closed");
        }

        let scope = &self.config.scope;
        let mut clients = self.host.clients.write().await;

        let options = ClientMatchOptions {
            include_uncontrolled: false,
            client_type: ClientType::Window,
            controlled_by: Some(self.id),
        };
        let existing = clients
            .match_all(scope, &options)
            .into_iter()
            .find(|c| c.url == *scope)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                clients.focus(&id)?;
                info!(client = %id, "Focused existing window");
                Ok(ClickOutcome::Focused(id))
            }
            None => {
                let id = clients.open_window(scope.clone(), Some(self.id));
                info!(client = %id, url = %scope, "Opened new window");
                Ok(ClickOutcome::Opened(id))
            }
        }
    }
}
