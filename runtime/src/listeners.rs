//! Host environment events.
//!
//! The host application reports focus, visibility and connectivity changes to a
//! [`ListenerRegistry`]; plugins subscribe to the class of event they react to. A listener
//! registered twice under the same class is held once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback invoked when an event fires
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Class of host event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    /// Window regained focus
    Focus,
    /// Document became visible
    Visible,
    /// Network came back online
    Reconnect,
}

struct RegistryInner {
    listeners: Mutex<HashMap<EventClass, Vec<Listener>>>,
    visible: AtomicBool,
    online: AtomicBool,
}

impl RegistryInner {
    fn remove(&self, class: EventClass, listener: &Listener) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = listeners.get_mut(&class) {
            entries.retain(|existing| !Arc::ptr_eq(existing, listener));
            if entries.is_empty() {
                listeners.remove(&class);
            }
        }
    }
}

/// Registry of focus, visibility and reconnect listeners
///
/// Cheap to clone; clones share listeners and the visibility and connectivity flags.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                listeners: Mutex::new(HashMap::new()),
                visible: AtomicBool::new(true),
                online: AtomicBool::new(true),
            }),
        }
    }
}

impl ListenerRegistry {
    /// Create an empty registry; the host starts out visible and online
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `class`
    ///
    /// Registering the same `Arc` again is a no-op apart from returning another handle.
    pub fn subscribe(&self, class: EventClass, listener: Listener) -> Subscription {
        {
            let mut listeners = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let entries = listeners.entry(class).or_default();
            if !entries.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
                entries.push(Arc::clone(&listener));
            }
        }
        Subscription {
            registry: Arc::downgrade(&self.inner),
            class,
            listener,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every listener registered under `class`
    ///
    /// Listeners run outside the registry lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, class: EventClass) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .cloned()
            .unwrap_or_default();
        tracing::trace!(?class, count = listeners.len(), "Dispatching host event");
        for listener in listeners {
            listener();
        }
    }

    /// Report that the window regained focus
    pub fn notify_focus(&self) {
        self.emit(EventClass::Focus);
    }

    /// Report a visibility change; becoming visible fires [`EventClass::Visible`]
    pub fn set_visibility(&self, visible: bool) {
        let was = self.inner.visible.swap(visible, Ordering::SeqCst);
        if visible && !was {
            self.emit(EventClass::Visible);
        }
    }

    /// Report a connectivity change; coming online fires [`EventClass::Reconnect`]
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if online && !was {
            self.emit(EventClass::Reconnect);
        }
    }

    /// Whether the document is visible
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    /// Whether the network is online
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Number of listeners registered under `class`
    #[must_use]
    pub fn len(&self, class: EventClass) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("visible", &self.is_visible())
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered listener
///
/// Unsubscribing is idempotent and also happens on drop. Because registrations are
/// deduplicated, releasing any handle for a listener removes it for every handle.
#[must_use = "dropping the subscription removes the listener"]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    class: EventClass,
    listener: Listener,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener; later calls do nothing
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.class, &self.listener);
            }
        }
    }

    /// Event class this subscription listens on
    #[must_use]
    pub const fn class(&self) -> EventClass {
        self.class
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("class", &self.class)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
