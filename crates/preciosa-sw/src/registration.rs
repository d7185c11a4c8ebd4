//! Registration state machine: installing → waiting → active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::worker::OfflineWorker;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// A service worker slot in a registration.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Current state.
    pub state: ServiceWorkerState,

    /// The worker running in this slot.
    pub worker: Arc<OfflineWorker>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(worker: Arc<OfflineWorker>) -> Self {
        Self {
            state: ServiceWorkerState::Parsed,
            worker,
            state_changed_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.worker.id()
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last update check time.
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// Start installing a new worker. A worker already installing is replaced.
    pub fn begin_install(&mut self, worker: Arc<OfflineWorker>) -> Option<ServiceWorker> {
        let mut slot = ServiceWorker::new(worker);
        slot.set_state(ServiceWorkerState::Installing);
        self.last_update_check = Some(Instant::now());
        let replaced = self.installing.replace(slot);
        replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Transition installing to waiting. A worker already waiting becomes redundant.
    pub fn install_complete(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        let replaced = self.waiting.replace(worker);
        replaced.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Discard the installing worker after a failed install.
    pub fn install_failed(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Promote the waiting worker to active (state `Activating`).
    /// Returns the previous active worker, now redundant.
    pub fn activate(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        let old = self.active.replace(worker);
        old.map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Finish activation of the active worker.
    pub fn activation_complete(&mut self) {
        if let Some(ref mut worker) = self.active {
            if worker.state == ServiceWorkerState::Activating {
                worker.set_state(ServiceWorkerState::Activated);
            }
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Find a worker in any slot.
    pub fn find(&self, id: ServiceWorkerId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id() == id)
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::worker::Host;
    use preciosa_net::MemoryFetcher;

    fn worker(version: u32) -> Arc<OfflineWorker> {
        let host = Host::new(Arc::new(MemoryFetcher::new()));
        let config = WorkerConfig::default().with_version(version);
        Arc::new(OfflineWorker::new(config, host).unwrap())
    }

    fn registration() -> ServiceWorkerRegistration {
        ServiceWorkerRegistration::new(Url::parse("http://localhost:8080/").unwrap())
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut registration = registration();
        assert!(registration.active.is_none());

        registration.begin_install(worker(1));
        assert_eq!(
            registration.installing.as_ref().unwrap().state,
            ServiceWorkerState::Installing
        );

        // Installing -> Installed
        registration.install_complete();
        assert!(registration.waiting.is_some());
        assert!(registration.installing.is_none());

        // Installed -> Activating -> Activated
        assert!(registration.activate().is_none());
        assert_eq!(
            registration.active.as_ref().unwrap().state,
            ServiceWorkerState::Activating
        );
        registration.activation_complete();
        assert!(registration.get_active().unwrap().is_active());
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_activate_replaces_old_worker() {
        let mut registration = registration();
        let first = worker(1);
        registration.begin_install(Arc::clone(&first));
        registration.install_complete();
        registration.activate();
        registration.activation_complete();

        registration.begin_install(worker(2));
        registration.install_complete();
        let old = registration.activate().unwrap();
        assert_eq!(old.id(), first.id());
        assert_eq!(old.state, ServiceWorkerState::Redundant);
    }

    #[test]
    fn test_install_failed_keeps_active() {
        let mut registration = registration();
        registration.begin_install(worker(1));
        registration.install_complete();
        registration.activate();
        registration.activation_complete();
        let active_id = registration.get_active().unwrap().id();

        registration.begin_install(worker(2));
        let failed = registration.install_failed().unwrap();
        assert_eq!(failed.state, ServiceWorkerState::Redundant);
        assert_eq!(registration.get_active().unwrap().id(), active_id);
        assert!(registration.waiting.is_none());
    }

    #[test]
    fn test_new_waiting_worker_replaces_old_waiting() {
        let mut registration = registration();
        registration.begin_install(worker(1));
        registration.install_complete();
        registration.begin_install(worker(2));
        let replaced = registration.install_complete().unwrap();
        assert_eq!(replaced.state, ServiceWorkerState::Redundant);
    }

    #[test]
    fn test_unregister() {
        let mut registration = registration();
        registration.begin_install(worker(1));
        registration.install_complete();
        registration.unregister();
        assert!(registration.waiting.is_none());
        assert!(registration.find(ServiceWorkerId::new()).is_none());
    }
}
