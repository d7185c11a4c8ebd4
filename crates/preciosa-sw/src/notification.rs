//! Notifications shown on push.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Notification settings as they appear in the worker config.
/// Icon paths are relative to the registration scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications sharing a tag replace each other.
    pub tag: String,
    /// Alert again when replacing a notification with the same tag.
    pub renotify: bool,
    pub actions: Vec<NotificationAction>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "Preciosa".to_string(),
            body: "Te extraño mi Anita preciosa 💕".to_string(),
            icon: "./icon.png".to_string(),
            badge: "./icon.png".to_string(),
            tag: "preciosa-notification".to_string(),
            renotify: true,
            actions: vec![NotificationAction {
                action: "abrir".to_string(),
                title: "Abrir App".to_string(),
            }],
        }
    }
}

impl NotificationConfig {
    /// Build the title and options to show, resolving icons against `scope`.
    pub fn descriptor(&self, scope: &Url) -> Result<(String, NotificationOptions)> {
        let resolve = |path: &str| -> Result<Option<Url>> {
            if path.is_empty() {
                return Ok(None);
            }
            scope
                .join(path)
                .map(Some)
                .map_err(|e| ServiceWorkerError::InvalidConfig(format!("icon {path}: {e}")))
        };

        let options = NotificationOptions {
            body: self.body.clone(),
            icon: resolve(&self.icon)?,
            badge: resolve(&self.badge)?,
            tag: self.tag.clone(),
            renotify: self.renotify,
            actions: self.actions.clone(),
        };
        Ok((self.title.clone(), options))
    }
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Option<Url>,
    pub badge: Option<Url>,
    pub tag: String,
    pub renotify: bool,
    pub actions: Vec<NotificationAction>,
}

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A notification on screen.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
    /// Whether showing it alerted the user (sound/vibration).
    pub alerted: bool,
    pub shown_at: Instant,
}

/// The host's notification tray.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: Vec<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification. One with the same non-empty tag is replaced and
    /// only alerts again if `renotify` is set.
    pub fn show(&mut self, title: String, options: NotificationOptions) -> Result<NotificationId> {
        if options.renotify && options.tag.is_empty() {
            return Err(ServiceWorkerError::StateError(
                "renotify requires a non-empty tag".to_string(),
            ));
        }

        let existing = if options.tag.is_empty() {
            None
        } else {
            self.shown.iter().position(|n| n.options.tag == options.tag)
        };

        let alerted = existing.is_none() || options.renotify;
        let notification = Notification {
            id: NotificationId::new(),
            title,
            options,
            alerted,
            shown_at: Instant::now(),
        };
        let id = notification.id;

        match existing {
            Some(index) => {
                debug!(tag = %notification.options.tag, alerted, "Notification replaced");
                self.shown[index] = notification;
            }
            None => self.shown.push(notification),
        }
        Ok(id)
    }

    /// Dismiss a notification.
    pub fn close(&mut self, id: NotificationId) -> bool {
        let before = self.shown.len();
        self.shown.retain(|n| n.id != id);
        self.shown.len() != before
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    pub fn all(&self) -> &[Notification] {
        &self.shown
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(tag: &str, renotify: bool) -> NotificationOptions {
        NotificationOptions {
            body: "hola".to_string(),
            icon: None,
            badge: None,
            tag: tag.to_string(),
            renotify,
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_descriptor_resolves_icons() {
        let scope = Url::parse("https://example.com/preciosa/").unwrap();
        let (title, options) = NotificationConfig::default().descriptor(&scope).unwrap();

        assert_eq!(title, "Preciosa");
        assert_eq!(
            options.icon.unwrap().as_str(),
            "https://example.com/preciosa/icon.png"
        );
        assert_eq!(options.tag, "preciosa-notification");
        assert_eq!(options.actions.len(), 1);
        assert_eq!(options.actions[0].action, "abrir");
    }

    #[test]
    fn test_same_tag_coalesces() {
        let mut tray = Notifications::new();
        let first = tray.show("a".into(), options("t", true)).unwrap();
        let second = tray.show("b".into(), options("t", true)).unwrap();

        assert_eq!(tray.len(), 1);
        assert!(tray.get(first).is_none());
        let shown = tray.get(second).unwrap();
        assert_eq!(shown.title, "b");
        assert!(shown.alerted);
    }

    #[test]
    fn test_replacement_without_renotify_is_silent() {
        let mut tray = Notifications::new();
        tray.show("a".into(), options("t", false)).unwrap();
        let second = tray.show("b".into(), options("t", false)).unwrap();
        assert!(!tray.get(second).unwrap().alerted);
    }

    #[test]
    fn test_untagged_notifications_stack() {
        let mut tray = Notifications::new();
        tray.show("a".into(), options("", false)).unwrap();
        tray.show("b".into(), options("", false)).unwrap();
        assert_eq!(tray.len(), 2);
    }

    #[test]
    fn test_renotify_requires_tag() {
        let mut tray = Notifications::new();
        assert!(tray.show("a".into(), options("", true)).is_err());
    }

    #[test]
    fn test_close() {
        let mut tray = Notifications::new();
        let id = tray.show("a".into(), options("t", false)).unwrap();
        assert!(tray.close(id));
        assert!(!tray.close(id));
        assert!(tray.is_empty());
    }
}
