//! Handler registry: one ordered handler list per notification class.
//!
//! Handlers are plain closures returning `anyhow::Result<()>`. Dispatch is
//! synchronous and walks the list for the notification's class in
//! registration order. A handler returning `Err` or panicking is logged
//! and skipped; the rest of the list still runs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};

use huddle_core::ChatEvent;
use tracing::warn;

use crate::error::SessionError;

// ============================================================================
// Notification Types
// ============================================================================

/// Notification classes observers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Message,
    Connection,
    Error,
}

/// Why the connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `Session::disconnect` was called.
    Requested,
    /// The transport dropped while connected.
    Lost,
}

/// Connection state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected,
    Disconnected(DisconnectReason),
}

/// A notification delivered to handlers of one [`EventClass`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Message(ChatEvent),
    Connection(ConnectionChange),
    Error(SessionError),
}

/// Something the registry can route by class.
pub trait Classified {
    type Class: Copy + Eq + Hash + fmt::Debug;

    fn class(&self) -> Self::Class;
}

impl Classified for Notification {
    type Class = EventClass;

    fn class(&self) -> EventClass {
        match self {
            Self::Message(_) => EventClass::Message,
            Self::Connection(_) => EventClass::Connection,
            Self::Error(_) => EventClass::Error,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Handle returned by [`HandlerRegistry::register`].
///
/// Passing it to [`HandlerRegistry::unregister`] removes exactly the handler
/// it was issued for. Unregistering twice is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription<C = EventClass> {
    class: C,
    id: u64,
}

impl<C: Copy> Subscription<C> {
    pub fn class(&self) -> C {
        self.class
    }
}

/// Boxed handler for notifications of type `N`.
pub type Handler<N> = Box<dyn FnMut(&N) -> anyhow::Result<()>>;

/// Registry of handlers keyed by notification class.
pub struct HandlerRegistry<N: Classified = Notification> {
    lists: HashMap<N::Class, Vec<(u64, Handler<N>)>>,
    next_id: u64,
}

impl<N: Classified> Default for HandlerRegistry<N> {
    fn default() -> Self {
        Self {
            lists: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<N: Classified> fmt::Debug for HandlerRegistry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<N: Classified> HandlerRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the list for `class`.
    pub fn register<F>(&mut self, class: N::Class, handler: F) -> Subscription<N::Class>
    where
        F: FnMut(&N) -> anyhow::Result<()> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.lists
            .entry(class)
            .or_default()
            .push((id, Box::new(handler)));
        Subscription { class, id }
    }

    /// Removes the handler behind `subscription`.
    ///
    /// Returns false if it was already gone.
    pub fn unregister(&mut self, subscription: Subscription<N::Class>) -> bool {
        let Some(list) = self.lists.get_mut(&subscription.class) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        list.len() != before
    }

    /// Delivers `notification` to every handler of its class, in
    /// registration order.
    ///
    /// Returns how many handlers failed.
    pub fn dispatch(&mut self, notification: &N) -> usize {
        let class = notification.class();
        let Some(list) = self.lists.get_mut(&class) else {
            return 0;
        };

        let mut failures = 0;
        for (id, handler) in list.iter_mut() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(notification))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(?class, handler_id = *id, error = %e, "Handler failed");
                }
                Err(payload) => {
                    failures += 1;
                    warn!(
                        ?class,
                        handler_id = *id,
                        panic = panic_message(payload.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        }
        failures
    }

    /// Total number of registered handlers.
    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn len_for(&self, class: N::Class) -> usize {
        self.lists.get(&class).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every handler of every class.
    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Handler<Notification> {
        let log = Rc::clone(log);
        Box::new(move |_: &Notification| {
            log.borrow_mut().push(tag);
            Ok(())
        })
    }

    fn connected() -> Notification {
        Notification::Connection(ConnectionChange::Connected)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        registry.register(EventClass::Connection, recorder(&log, "first"));
        registry.register(EventClass::Connection, recorder(&log, "second"));
        registry.register(EventClass::Connection, recorder(&log, "third"));

        registry.dispatch(&connected());
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dispatch_only_reaches_matching_class() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        registry.register(EventClass::Message, recorder(&log, "message"));
        registry.register(EventClass::Error, recorder(&log, "error"));

        registry.dispatch(&Notification::Error(SessionError::ConnectionLost));
        assert_eq!(*log.borrow(), vec!["error"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        registry.register(EventClass::Connection, recorder(&log, "before"));
        registry.register(EventClass::Connection, |_: &Notification| {
            Err(anyhow::anyhow!("observer blew up"))
        });
        registry.register(EventClass::Connection, recorder(&log, "after"));

        let failures = registry.dispatch(&connected());
        assert_eq!(failures, 1);
        assert_eq!(*log.borrow(), vec!["before", "after"]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_delivery() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        registry.register(EventClass::Connection, recorder(&log, "before"));
        registry.register(EventClass::Connection, |_: &Notification| -> anyhow::Result<()> {
            panic!("observer panicked")
        });
        registry.register(EventClass::Connection, recorder(&log, "after"));

        assert_eq!(registry.dispatch(&connected()), 1);
        assert_eq!(registry.dispatch(&connected()), 1);
        assert_eq!(*log.borrow(), vec!["before", "after", "before", "after"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unregister_removes_exactly_one_and_is_idempotent() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        let a = registry.register(EventClass::Connection, recorder(&log, "a"));
        registry.register(EventClass::Connection, recorder(&log, "b"));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(registry.len_for(EventClass::Connection), 1);

        registry.dispatch(&connected());
        assert_eq!(*log.borrow(), vec!["b"]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut registry: HandlerRegistry = HandlerRegistry::new();
        let sub = registry.register(EventClass::Message, |_: &Notification| Ok(()));
        registry.register(EventClass::Error, |_: &Notification| Ok(()));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.unregister(sub));
        assert_eq!(registry.dispatch(&connected()), 0);
    }
}
