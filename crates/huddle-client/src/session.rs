//! Session state machine.
//!
//! A [`Session`] owns one transport and one handler registry. On `connect`
//! it registers three internal handlers (message, connection, error) that
//! fold inbound events into the [`RoomState`], react to a lost connection
//! and record the last error. Observers register alongside them through
//! [`Session::subscribe`].
//!
//! Everything runs on the caller's task: transport events are pulled with
//! [`Session::recv_event`] and applied with [`Session::handle_event`], so
//! state is never mutated concurrently.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use huddle_core::{ChatEvent, Identity, RoomState, SessionState};
use huddle_protocol::parse_chat_event;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::registry::{
    ConnectionChange, DisconnectReason, EventClass, HandlerRegistry, Notification, Subscription,
};
use crate::transport::{Transport, TransportEvent};

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the session and its internal handlers.
#[derive(Debug, Default)]
struct SessionCore {
    state: SessionState,
    room: RoomState,
    last_error: Option<SessionError>,
    /// Errors raised inside handlers, dispatched once the current
    /// dispatch has finished.
    pending: VecDeque<SessionError>,
}

impl SessionCore {
    fn move_to(&mut self, next: SessionState) -> Result<()> {
        match self.state.transition(next) {
            Ok(state) => {
                debug!(from = %self.state, to = %state, "Session state change");
                self.state = state;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Rejected session state change");
                Err(SessionError::ConnectionFailed(e.to_string()))
            }
        }
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_state: SessionState,
    pub room: RoomState,
    pub last_error: Option<SessionError>,
}

// ============================================================================
// Session
// ============================================================================

/// One chat session over transport `T`.
pub struct Session<T: Transport> {
    config: SessionConfig,
    transport: T,
    registry: HandlerRegistry,
    core: Rc<RefCell<SessionCore>>,
    identity: Option<Identity>,
    internal: Vec<Subscription>,
}

impl<T: Transport> Session<T> {
    pub fn new(config: SessionConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            registry: HandlerRegistry::new(),
            core: Rc::new(RefCell::new(SessionCore::default())),
            identity: None,
            internal: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Joins the room as `identity`.
    ///
    /// The identity is validated before anything else; an invalid one fails
    /// with `InvalidIdentity` and leaves the session `Idle`. Transport and
    /// handshake failures return `ConnectionFailed` and leave it `Idle`.
    pub async fn connect(&mut self, identity: &str) -> Result<()> {
        let identity = match Identity::parse(identity) {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(SessionError::InvalidIdentity(e.to_string()))),
        };

        if self.state() != SessionState::Idle {
            return Err(self.fail(SessionError::ConnectionFailed(
                "session already active".to_string(),
            )));
        }

        {
            let mut core = self.core.borrow_mut();
            core.last_error = None;
            core.move_to(SessionState::Connecting)?;
        }
        self.register_internal_handlers();

        info!(%identity, "Connecting to chat relay");
        let outcome = match self.transport.connect(&identity).await {
            Ok(()) => self.transport.subscribe(&self.config.topic).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.core.borrow_mut().move_to(SessionState::Connected)?;
                info!(%identity, topic = %self.config.topic, "Session connected");
                self.identity = Some(identity);
                Ok(())
            }
            Err(e) => {
                warn!(%identity, error = %e, "Connect failed");
                self.transport.disconnect().await;
                for subscription in self.internal.drain(..) {
                    self.registry.unregister(subscription);
                }
                self.core.borrow_mut().move_to(SessionState::Idle)?;
                Err(self.fail(SessionError::ConnectionFailed(e.to_string())))
            }
        }
    }

    /// Publishes a chat message.
    ///
    /// Content is trimmed. Fails with `SendFailed`, without touching the
    /// transport, when not connected, when the message is empty or when it
    /// exceeds the configured maximum length.
    pub async fn send(&mut self, content: &str) -> Result<()> {
        let sender = match (&self.identity, self.is_connected()) {
            (Some(identity), true) => identity.clone(),
            _ => return Err(self.fail(SessionError::SendFailed("not connected".to_string()))),
        };

        let content = content.trim();
        if content.is_empty() {
            return Err(self.fail(SessionError::SendFailed("message is empty".to_string())));
        }
        let max = self.config.max_message_len;
        if content.chars().count() > max {
            return Err(self.fail(SessionError::SendFailed(format!(
                "message longer than {max} characters"
            ))));
        }

        let event = match ChatEvent::chat(sender, content) {
            Ok(event) => event,
            Err(e) => return Err(self.fail(SessionError::SendFailed(e.to_string()))),
        };

        if let Err(e) = self
            .transport
            .publish(&self.config.send_destination, &event)
            .await
        {
            warn!(error = %e, "Publish failed");
            return Err(self.fail(SessionError::SendFailed(e.to_string())));
        }

        debug!(length = content.len(), "Message published");
        Ok(())
    }

    /// Leaves the room. Safe to call in any state and any number of times.
    ///
    /// An active session notifies connection handlers with
    /// `Disconnected(Requested)` exactly once. Afterwards the room is empty,
    /// no handlers remain and the last error is cleared.
    pub async fn disconnect(&mut self) {
        let was_active = self.state() != SessionState::Idle;

        self.transport.disconnect().await;

        if was_active {
            self.registry
                .dispatch(&Notification::Connection(ConnectionChange::Disconnected(
                    DisconnectReason::Requested,
                )));
            info!(identity = ?self.identity.as_ref().map(Identity::as_str), "Session disconnected");
        }

        self.registry.clear();
        self.internal.clear();
        self.identity = None;

        let mut core = self.core.borrow_mut();
        core.room.clear();
        core.last_error = None;
        core.pending.clear();
        if core.state != SessionState::Idle {
            // Connecting -> Idle and Connected -> Idle are both valid.
            let _ = core.move_to(SessionState::Idle);
        }
    }

    /// Clears the last error.
    pub fn clear_error(&mut self) {
        self.core.borrow_mut().last_error = None;
    }

    // ------------------------------------------------------------------------
    // Event Processing
    // ------------------------------------------------------------------------

    /// Waits for the next transport event.
    ///
    /// Pends while there is no connection, so it can sit in a `select!`
    /// next to other input. Cancel safe.
    pub async fn recv_event(&mut self) -> TransportEvent {
        match self.transport.next_event().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    /// Applies one transport event.
    ///
    /// Events arriving outside a connected session are dropped.
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if !self.is_connected() {
            debug!(?event, "Ignoring transport event outside an active session");
            return;
        }

        let notification = match event {
            TransportEvent::Connected => Notification::Connection(ConnectionChange::Connected),
            TransportEvent::Disconnected => Notification::Connection(
                ConnectionChange::Disconnected(DisconnectReason::Lost),
            ),
            TransportEvent::Error(detail) => {
                Notification::Error(SessionError::ConnectionFailed(detail))
            }
            TransportEvent::Inbound { channel, payload } => {
                if channel != self.config.topic {
                    debug!(%channel, "Ignoring message on unknown channel");
                    return;
                }
                match parse_chat_event(&payload) {
                    Ok(event) => Notification::Message(event),
                    Err(e) => {
                        warn!(error = %e, "Dropping malformed event");
                        Notification::Error(SessionError::MalformedEvent(e.to_string()))
                    }
                }
            }
        };

        self.registry.dispatch(&notification);
        self.flush_pending();

        if !self.is_connected() {
            self.tear_down_lost().await;
        }
    }

    /// Waits for and applies one transport event.
    pub async fn process_next(&mut self) {
        let event = self.recv_event().await;
        self.handle_event(event).await;
    }

    /// Applies every event already queued by the transport without waiting.
    ///
    /// Returns how many events were applied.
    pub async fn process_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.transport.try_next_event() {
            self.handle_event(event).await;
            applied += 1;
        }
        applied
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Registers an observer for one notification class.
    ///
    /// Observers live for the current session only: `disconnect()` and a
    /// lost connection drop them.
    pub fn subscribe<F>(&mut self, class: EventClass, handler: F) -> Subscription
    where
        F: FnMut(&Notification) -> anyhow::Result<()> + 'static,
    {
        self.registry.register(class, handler)
    }

    /// Removes an observer. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.registry.unregister(subscription)
    }

    /// Number of handlers currently registered, internal ones included.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.core.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.core.borrow().last_error.clone()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Runs `f` against the current room without copying it.
    pub fn with_room<R>(&self, f: impl FnOnce(&RoomState) -> R) -> R {
        f(&self.core.borrow().room)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.core.borrow();
        SessionSnapshot {
            session_state: core.state,
            room: core.room.clone(),
            last_error: core.last_error.clone(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn fail(&self, error: SessionError) -> SessionError {
        self.core.borrow_mut().last_error = Some(error.clone());
        error
    }

    fn register_internal_handlers(&mut self) {
        let core = Rc::clone(&self.core);
        let on_message = self.registry.register(EventClass::Message, move |n| {
            if let Notification::Message(event) = n {
                core.try_borrow_mut()?.room.apply(event.clone());
            }
            Ok(())
        });

        let core = Rc::clone(&self.core);
        let on_connection = self.registry.register(EventClass::Connection, move |n| {
            if let Notification::Connection(ConnectionChange::Disconnected(
                DisconnectReason::Lost,
            )) = n
            {
                let mut core = core.try_borrow_mut()?;
                if core.state.is_connected() {
                    core.state = core.state.transition(SessionState::Idle)?;
                    core.room.clear();
                    core.pending.push_back(SessionError::ConnectionLost);
                }
            }
            Ok(())
        });

        let core = Rc::clone(&self.core);
        let on_error = self.registry.register(EventClass::Error, move |n| {
            if let Notification::Error(err) = n {
                core.try_borrow_mut()?.last_error = Some(err.clone());
            }
            Ok(())
        });

        self.internal = vec![on_message, on_connection, on_error];
    }

    /// Dispatches errors queued by handlers during the last dispatch.
    fn flush_pending(&mut self) {
        loop {
            let next = self.core.borrow_mut().pending.pop_front();
            let Some(error) = next else {
                return;
            };
            self.registry.dispatch(&Notification::Error(error));
        }
    }

    /// Releases everything held for a session whose connection was lost.
    async fn tear_down_lost(&mut self) {
        warn!(
            identity = ?self.identity.as_ref().map(Identity::as_str),
            "Connection to chat relay lost"
        );
        self.transport.disconnect().await;
        self.registry.clear();
        self.internal.clear();
        self.identity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportError};
    use async_trait::async_trait;
    use huddle_core::EventKind;
    use huddle_protocol::encode_chat_event;
    use std::sync::{Arc, Mutex, MutexGuard};

    const TOPIC: &str = "/topic/public";

    // ------------------------------------------------------------------------
    // Fake transport
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeState {
        connected: bool,
        fail_connect: Option<String>,
        fail_publish: bool,
        connects: Vec<String>,
        subscribed: Vec<String>,
        published: Vec<(String, ChatEvent)>,
        disconnects: usize,
        events: VecDeque<TransportEvent>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport(Arc<Mutex<FakeState>>);

    impl FakeTransport {
        fn state(&self) -> MutexGuard<'_, FakeState> {
            self.0.lock().unwrap()
        }

        fn inject(&self, event: TransportEvent) {
            self.state().events.push_back(event);
        }

        fn inject_event(&self, event: &ChatEvent) {
            self.inject(TransportEvent::Inbound {
                channel: TOPIC.to_string(),
                payload: encode_chat_event(event),
            });
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&mut self, identity: &Identity) -> std::result::Result<(), TransportError> {
            let mut state = self.state();
            if let Some(reason) = state.fail_connect.clone() {
                return Err(TransportError::Rejected(reason));
            }
            state.connected = true;
            state.connects.push(identity.to_string());
            state.events.push_back(TransportEvent::Connected);
            Ok(())
        }

        async fn publish(
            &mut self,
            channel: &str,
            event: &ChatEvent,
        ) -> std::result::Result<(), TransportError> {
            let mut state = self.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_publish {
                return Err(TransportError::Protocol("write failed".to_string()));
            }
            state.published.push((channel.to_string(), event.clone()));
            Ok(())
        }

        async fn subscribe(&mut self, channel: &str) -> std::result::Result<(), TransportError> {
            self.state().subscribed.push(channel.to_string());
            Ok(())
        }

        async fn disconnect(&mut self) {
            let mut state = self.state();
            if state.connected {
                state.connected = false;
                state.disconnects += 1;
            }
            state.events.clear();
        }

        async fn next_event(&mut self) -> Option<TransportEvent> {
            self.state().events.pop_front()
        }

        fn try_next_event(&mut self) -> Option<TransportEvent> {
            self.state().events.pop_front()
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn new_session() -> (Session<FakeTransport>, FakeTransport) {
        let fake = FakeTransport::default();
        (Session::new(SessionConfig::default(), fake.clone()), fake)
    }

    async fn connected_session(name: &str) -> (Session<FakeTransport>, FakeTransport) {
        let (mut session, fake) = new_session();
        session.connect(name).await.unwrap();
        session.process_ready().await;
        (session, fake)
    }

    fn record(session: &mut Session<FakeTransport>, class: EventClass) -> Rc<RefCell<Vec<Notification>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        session.subscribe(class, move |n| {
            sink.borrow_mut().push(n.clone());
            Ok(())
        });
        log
    }

    fn id(name: &str) -> Identity {
        Identity::parse(name).unwrap()
    }

    // ------------------------------------------------------------------------
    // connect
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_empty_identity_fails_without_transport_call() {
        let (mut session, fake) = new_session();

        for bad in ["", "   ", "has space", "waytoolongforanidentity_x"] {
            let result = session.connect(bad).await;
            assert!(matches!(result, Err(SessionError::InvalidIdentity(_))), "{bad:?}");
            assert_eq!(session.state(), SessionState::Idle);
            assert_eq!(
                session.last_error().map(|e| e.kind()),
                Some(ErrorKind::InvalidIdentity)
            );
        }
        assert!(fake.state().connects.is_empty());
        assert_eq!(session.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_success_subscribes_and_notifies() {
        let (mut session, fake) = new_session();
        let connections = record(&mut session, EventClass::Connection);

        session.connect(" alice ").await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.identity().map(Identity::as_str), Some("alice"));
        assert_eq!(fake.state().connects, vec!["alice".to_string()]);
        assert_eq!(fake.state().subscribed, vec![TOPIC.to_string()]);
        // three internal handlers plus the observer
        assert_eq!(session.handler_count(), 4);

        session.process_ready().await;
        assert_eq!(
            *connections.borrow(),
            vec![Notification::Connection(ConnectionChange::Connected)]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle_and_unregisters() {
        let (mut session, fake) = new_session();
        fake.state().fail_connect = Some("identity already connected".to_string());

        let result = session.connect("alice").await;
        assert!(matches!(result, Err(SessionError::ConnectionFailed(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.handler_count(), 0);
        assert_eq!(
            session.last_error().map(|e| e.kind()),
            Some(ErrorKind::ConnectionFailed)
        );
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_refused() {
        let (mut session, fake) = connected_session("alice").await;

        let result = session.connect("bob").await;
        assert!(matches!(result, Err(SessionError::ConnectionFailed(_))));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(fake.state().connects.len(), 1);
    }

    // ------------------------------------------------------------------------
    // send
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_send_while_idle_never_publishes() {
        let (mut session, fake) = new_session();

        let result = session.send("hello").await;
        assert!(matches!(result, Err(SessionError::SendFailed(_))));
        assert!(fake.state().published.is_empty());
        assert!(session.snapshot().room.is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_publishes_trimmed_chat_event() {
        let (mut session, fake) = connected_session("alice").await;

        session.send("  hi there  ").await.unwrap();

        let published = fake.state().published.clone();
        assert_eq!(published.len(), 1);
        let (channel, event) = &published[0];
        assert_eq!(channel, "/app/chat.sendMessage");
        assert_eq!(event.kind(), EventKind::Chat);
        assert_eq!(event.sender().as_str(), "alice");
        assert_eq!(event.content(), Some("hi there"));
        // Nothing is applied locally until the relay echoes it back.
        assert!(session.snapshot().room.messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_rejects_empty_and_oversized_content() {
        let (mut session, fake) = connected_session("alice").await;

        for bad in [String::new(), "   ".to_string(), "x".repeat(501)] {
            let result = session.send(&bad).await;
            assert!(matches!(result, Err(SessionError::SendFailed(_))));
        }
        session.send(&"x".repeat(500)).await.unwrap();
        assert_eq!(fake.state().published.len(), 1);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_publish_failure_is_send_failed() {
        let (mut session, fake) = connected_session("alice").await;
        fake.state().fail_publish = true;

        let result = session.send("hello").await;
        assert!(matches!(result, Err(SessionError::SendFailed(_))));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.last_error().map(|e| e.kind()), Some(ErrorKind::SendFailed));
    }

    // ------------------------------------------------------------------------
    // inbound events
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_inbound_events_fold_into_room_in_order() {
        let (mut session, fake) = connected_session("carol").await;
        let messages = record(&mut session, EventClass::Message);

        fake.inject_event(&ChatEvent::join(id("alice")));
        fake.inject_event(&ChatEvent::chat(id("alice"), "hi").unwrap());
        fake.inject_event(&ChatEvent::join(id("bob")));
        fake.inject_event(&ChatEvent::leave(id("alice")));
        fake.inject_event(&ChatEvent::chat(id("bob"), "yo").unwrap());
        assert_eq!(session.process_ready().await, 5);

        let snapshot = session.snapshot();
        let kinds: Vec<_> = snapshot.room.messages().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Join,
                EventKind::Chat,
                EventKind::Join,
                EventKind::Leave,
                EventKind::Chat
            ]
        );
        assert!(snapshot.room.is_online("bob"));
        assert!(!snapshot.room.is_online("alice"));
        assert_eq!(snapshot.room.online_users().len(), 1);
        assert_eq!(messages.borrow().len(), 5);
    }

    #[tokio::test]
    async fn test_own_echo_is_not_deduplicated() {
        let (mut session, fake) = connected_session("alice").await;
        session.send("hi").await.unwrap();

        let echo = fake.state().published[0].1.clone();
        fake.inject_event(&echo);
        fake.inject_event(&echo);
        session.process_ready().await;

        assert_eq!(session.snapshot().room.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_event_is_dropped_and_reported() {
        let (mut session, fake) = connected_session("alice").await;
        let errors = record(&mut session, EventClass::Error);

        fake.inject(TransportEvent::Inbound {
            channel: TOPIC.to_string(),
            payload: r#"{"sender":"bob","type":"TYPING"}"#.to_string(),
        });
        session.process_ready().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.snapshot().room.messages().is_empty());
        assert_eq!(
            session.last_error().map(|e| e.kind()),
            Some(ErrorKind::MalformedEvent)
        );
        assert!(matches!(
            errors.borrow().as_slice(),
            [Notification::Error(SessionError::MalformedEvent(_))]
        ));
    }

    #[tokio::test]
    async fn test_message_on_other_channel_is_ignored() {
        let (mut session, fake) = connected_session("alice").await;

        fake.inject(TransportEvent::Inbound {
            channel: "/topic/elsewhere".to_string(),
            payload: encode_chat_event(&ChatEvent::join(id("bob"))),
        });
        session.process_ready().await;

        assert!(session.snapshot().room.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_sets_last_error_and_can_be_cleared() {
        let (mut session, fake) = connected_session("alice").await;

        fake.inject(TransportEvent::Error("sender does not match".to_string()));
        session.process_ready().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            session.last_error(),
            Some(SessionError::ConnectionFailed("sender does not match".to_string()))
        );

        session.clear_error();
        assert_eq!(session.last_error(), None);
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_block_room_updates() {
        let (mut session, fake) = connected_session("alice").await;
        session.subscribe(EventClass::Message, |_| Err(anyhow::anyhow!("render failed")));
        let after = record(&mut session, EventClass::Message);

        fake.inject_event(&ChatEvent::join(id("bob")));
        session.process_ready().await;

        assert!(session.snapshot().room.is_online("bob"));
        assert_eq!(after.borrow().len(), 1);
    }

    // ------------------------------------------------------------------------
    // connection loss and disconnect
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_unexpected_disconnect_is_connection_lost() {
        let (mut session, fake) = connected_session("eve").await;
        let connections = record(&mut session, EventClass::Connection);
        let errors = record(&mut session, EventClass::Error);

        fake.inject_event(&ChatEvent::join(id("eve")));
        session.process_ready().await;
        assert!(!session.snapshot().room.is_empty());

        fake.inject(TransportEvent::Disconnected);
        session.process_ready().await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.session_state, SessionState::Idle);
        assert_eq!(snapshot.last_error, Some(SessionError::ConnectionLost));
        assert!(snapshot.room.is_empty());
        assert_eq!(session.handler_count(), 0);
        assert_eq!(fake.state().disconnects, 1);

        assert_eq!(
            *connections.borrow(),
            vec![Notification::Connection(ConnectionChange::Disconnected(
                DisconnectReason::Lost
            ))]
        );
        assert_eq!(
            *errors.borrow(),
            vec![Notification::Error(SessionError::ConnectionLost)]
        );
    }

    #[tokio::test]
    async fn test_disconnect_resets_everything() {
        let (mut session, fake) = connected_session("alice").await;
        fake.inject_event(&ChatEvent::join(id("alice")));
        session.process_ready().await;
        fake.state().fail_publish = true;
        let _ = session.send("boom").await;

        session.disconnect().await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.session_state, SessionState::Idle);
        assert!(snapshot.room.is_empty());
        assert_eq!(snapshot.last_error, None);
        assert_eq!(session.handler_count(), 0);
        assert!(session.identity().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_twice_notifies_once() {
        let (mut session, fake) = connected_session("alice").await;
        let notified = Rc::new(RefCell::new(0usize));
        let counter = Rc::clone(&notified);
        session.subscribe(EventClass::Connection, move |n| {
            if matches!(
                n,
                Notification::Connection(ConnectionChange::Disconnected(DisconnectReason::Requested))
            ) {
                *counter.borrow_mut() += 1;
            }
            Ok(())
        });

        session.disconnect().await;
        let first = session.snapshot();
        session.disconnect().await;
        let second = session.snapshot();

        assert_eq!(first, second);
        assert_eq!(*notified.borrow(), 1);
        assert_eq!(fake.state().disconnects, 1);
    }

    #[tokio::test]
    async fn test_disconnect_from_idle_is_noop() {
        let (mut session, _fake) = new_session();
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_has_no_duplicate_handlers() {
        let (mut session, fake) = connected_session("alice").await;
        session.disconnect().await;

        session.connect("alice").await.unwrap();
        assert_eq!(session.handler_count(), 3);

        fake.inject_event(&ChatEvent::chat(id("bob"), "again").unwrap());
        session.process_ready().await;
        assert_eq!(session.snapshot().room.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_events_after_loss_are_ignored() {
        let (mut session, fake) = connected_session("alice").await;
        fake.inject(TransportEvent::Disconnected);
        session.process_ready().await;

        session
            .handle_event(TransportEvent::Inbound {
                channel: TOPIC.to_string(),
                payload: encode_chat_event(&ChatEvent::join(id("bob"))),
            })
            .await;
        assert!(session.snapshot().room.is_empty());
    }
}
