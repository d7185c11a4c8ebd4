//! Clients API: the pages a worker can see and talk to.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::registration::ServiceWorkerId;
use crate::{Result, ServiceWorkerError};

/// Receiving end of a page's message channel.
pub type ClientInbox = mpsc::UnboundedReceiver<JsonValue>;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,

    seq: u64,
    tx: mpsc::UnboundedSender<JsonValue>,
}

impl Client {
    /// Post message to client. Fails only if the page is gone.
    pub fn post_message(&self, message: JsonValue) -> Result<()> {
        self.tx.send(message).map_err(|_| {
            ServiceWorkerError::StateError(format!("client {} is closed", self.id))
        })
    }

    fn in_scope(&self, scope: &Url) -> bool {
        self.url.as_str().starts_with(scope.as_str())
    }
}

/// Options for clients.matchAll().
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by `controlled_by`.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
    /// Worker whose controlled clients are wanted.
    pub controlled_by: Option<ServiceWorkerId>,
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
    /// Inboxes of windows opened by a worker, until a page picks them up.
    opened: HashMap<String, ClientInbox>,
}

impl Clients {
    /// Create new clients registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page. Returns its id and the channel the worker posts to.
    pub fn connect(
        &mut self,
        url: Url,
        client_type: ClientType,
        controller: Option<ServiceWorkerId>,
    ) -> (String, ClientInbox) {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let id = format!("client-{seq}");
        let (tx, rx) = mpsc::unbounded_channel();

        debug!(client = %id, url = %url, ?controller, "Client connected");
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                url,
                client_type,
                focused: false,
                controller,
                seq,
                tx,
            },
        );
        (id, rx)
    }

    /// Remove a client.
    pub fn disconnect(&mut self, id: &str) -> Option<Client> {
        self.opened.remove(id);
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Match clients within `scope`, in connection order.
    pub fn match_all(&self, scope: &Url, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.in_scope(scope))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .filter(|c| {
                options.include_uncontrolled
                    || match options.controlled_by {
                        Some(worker) => c.controller == Some(worker),
                        None => c.controller.is_some(),
                    }
            })
            .collect();
        matched.sort_by_key(|c| c.seq);
        matched
    }

    /// Number of clients controlled by `worker`.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Post to one client.
    pub fn post_message(&self, id: &str, message: JsonValue) -> Result<()> {
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?
            .post_message(message)
    }

    /// Take control of every client in `scope`. Returns the ids whose
    /// controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> Vec<String> {
        let mut changed: Vec<&mut Client> = self
            .clients
            .values_mut()
            .filter(|c| c.in_scope(scope) && c.controller != Some(worker))
            .collect();
        changed.sort_by_key(|c| c.seq);

        changed
            .into_iter()
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect()
    }

    /// Hand every client of `old` over to `new`.
    pub fn replace_controller(&mut self, old: ServiceWorkerId, new: ServiceWorkerId) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if client.controller == Some(old) {
                client.controller = Some(new);
                changed.push(client.id.clone());
            }
        }
        changed.sort();
        changed
    }

    /// Drop the controller of a client.
    pub fn release(&mut self, id: &str) -> bool {
        match self.clients.get_mut(id) {
            Some(client) => client.controller.take().is_some(),
            None => false,
        }
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<()> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        Ok(())
    }

    /// Open a focused window at `url`, controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> String {
        let (id, inbox) = self.connect(url, ClientType::Window, controller);
        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.opened.insert(id.clone(), inbox);
        id
    }

    /// Take the inbox of a window opened with [`Clients::open_window`].
    pub fn take_opened_inbox(&mut self, id: &str) -> Option<ClientInbox> {
        self.opened.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://example.com/app/").unwrap()
    }

    fn page(path: &str) -> Url {
        scope().join(path).unwrap()
    }

    #[test]
    fn test_match_all_filters_scope_and_type() {
        let mut clients = Clients::new();
        let (a, _ra) = clients.connect(page("./"), ClientType::Window, None);
        let (_b, _rb) = clients.connect(page("./worker.js"), ClientType::Worker, None);
        let (_c, _rc) = clients.connect(
            Url::parse("https://example.com/other/").unwrap(),
            ClientType::Window,
            None,
        );

        let options = ClientMatchOptions {
            include_uncontrolled: true,
            ..Default::default()
        };
        let windows = clients.match_all(&scope(), &options);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].id, a);

        let all = clients.match_all(
            &scope(),
            &ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::All,
                controlled_by: None,
            },
        );
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_match_all_controlled_only() {
        let mut clients = Clients::new();
        let worker = ServiceWorkerId::new();
        let (_a, _ra) = clients.connect(page("./"), ClientType::Window, None);
        let (b, _rb) = clients.connect(page("./"), ClientType::Window, Some(worker));

        let options = ClientMatchOptions {
            controlled_by: Some(worker),
            ..Default::default()
        };
        let matched = clients.match_all(&scope(), &options);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, b);
    }

    #[test]
    fn test_post_message_delivers() {
        let mut clients = Clients::new();
        let (id, mut inbox) = clients.connect(page("./"), ClientType::Window, None);

        clients.post_message(&id, JsonValue::from("update")).unwrap();
        assert_eq!(inbox.try_recv().unwrap(), JsonValue::from("update"));
        assert!(inbox.try_recv().is_err());
    }

    #[test]
    fn test_post_message_to_closed_page_fails() {
        let mut clients = Clients::new();
        let (id, inbox) = clients.connect(page("./"), ClientType::Window, None);
        drop(inbox);

        let result = clients.post_message(&id, JsonValue::from("update"));
        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
    }

    #[test]
    fn test_claim() {
        let mut clients = Clients::new();
        let old = ServiceWorkerId::new();
        let new = ServiceWorkerId::new();
        let (a, _ra) = clients.connect(page("./"), ClientType::Window, None);
        let (b, _rb) = clients.connect(page("./"), ClientType::Window, Some(old));
        let (_c, _rc) = clients.connect(page("./"), ClientType::Window, Some(new));

        let changed = clients.claim(new, &scope());
        assert_eq!(changed, vec![a, b]);
        assert_eq!(clients.controlled_by(new), 3);
        assert!(clients.claim(new, &scope()).is_empty());
    }

    #[test]
    fn test_focus_and_open_window() {
        let mut clients = Clients::new();
        let (a, _ra) = clients.connect(page("./"), ClientType::Window, None);
        let (w, _rw) = clients.connect(page("./w.js"), ClientType::Worker, None);

        clients.focus(&a).unwrap();
        assert!(clients.get(&a).unwrap().focused);
        assert!(clients.focus(&w).is_err());

        let opened = clients.open_window(scope(), None);
        assert!(clients.get(&opened).unwrap().focused);
        assert!(!clients.get(&a).unwrap().focused);
        assert!(clients.take_opened_inbox(&opened).is_some());
        assert!(clients.take_opened_inbox(&opened).is_none());
    }

    #[test]
    fn test_release_drops_controller() {
        let mut clients = Clients::new();
        let worker = ServiceWorkerId::new();
        let (a, _ra) = clients.connect(page("./"), ClientType::Window, Some(worker));

        assert!(clients.release(&a));
        assert!(clients.get(&a).unwrap().controller.is_none());
        assert!(!clients.release(&a));
        assert_eq!(clients.controlled_by(worker), 0);
    }
}
