//! Session façade: login state, synchronous calls and event dispatch.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::watch;
use wxbridge_core::{
    Attachment, ClientId, CodecError, Command, Envelope, MessageType, Pid, Profile, Query,
    Transport, TransportError,
    command::{CardPayload, LinkPayload, MediaPayload, RoomAtPayload, TextPayload},
};

use crate::{
    SessionConfig, SessionRegistry,
    correlation::{Abandoned, CorrelationTable, DuplicateId, PendingCall, Reply, Resolution},
    event_bus::{EventBus, Subscription},
};

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not logged in")]
    NotAuthenticated,
    #[error("Not attached to a process")]
    NotConnected,
    #[error("Already attached in state {0:?}")]
    AlreadyAttached(SessionState),
    #[error("Session detached")]
    Detached,
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(#[from] DuplicateId),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<Abandoned> for SessionError {
    fn from(_: Abandoned) -> Self {
        Self::Detached
    }
}

/// Lifecycle of a session.
///
/// Derived from two independent facts: whether the process is attached and
/// what the last login notification said. A login that arrives before attach
/// completes shows up as soon as the session is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet attached to a process.
    Unattached,
    /// Open or attach in progress.
    Connecting,
    /// Attached, not logged in.
    Connected,
    /// Attached and logged in; sends are accepted.
    Authenticated,
    /// Attached after a logout notification.
    LoggedOut,
    /// Terminal; inbound traffic is ignored.
    Detached,
}

impl SessionState {
    /// Whether a process is attached, regardless of login.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated | Self::LoggedOut)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Link {
    Unattached,
    Connecting,
    Connected,
    Detached,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Login {
    Pending,
    LoggedIn,
    LoggedOut,
}

struct State {
    link: Link,
    login: Login,
    pid: Option<Pid>,
    client_id: Option<ClientId>,
    profile: Profile,
}

impl State {
    const fn phase(&self) -> SessionState {
        match (self.link, self.login) {
            (Link::Unattached, _) => SessionState::Unattached,
            (Link::Connecting, _) => SessionState::Connecting,
            (Link::Detached, _) => SessionState::Detached,
            (Link::Connected, Login::Pending) => SessionState::Connected,
            (Link::Connected, Login::LoggedIn) => SessionState::Authenticated,
            (Link::Connected, Login::LoggedOut) => SessionState::LoggedOut,
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    registry: Weak<SessionRegistry>,
    config: SessionConfig,
    state: Mutex<State>,
    table: Arc<CorrelationTable>,
    events: EventBus,
    login_tx: watch::Sender<bool>,
}

/// One connection context to the hook process.
///
/// Cheap to clone; all clones share state. Only [`Session::dispatch_inbound`]
/// changes the login state and profile.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create an unattached session that registers itself with `registry`
    /// once attached.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: &Arc<SessionRegistry>,
        config: SessionConfig,
    ) -> Self {
        let (login_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry: Arc::downgrade(registry),
                config,
                state: Mutex::new(State {
                    link: Link::Unattached,
                    login: Login::Pending,
                    pid: None,
                    client_id: None,
                    profile: Profile::default(),
                }),
                table: Arc::new(CorrelationTable::new()),
                events: EventBus::new(),
                login_tx,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn phase(&self) -> SessionState {
        self.state().phase()
    }

    /// Whether a process is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase().is_connected()
    }

    /// Whether sends are currently accepted.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionState::Authenticated
    }

    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.state().pid
    }

    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.state().client_id
    }

    /// Snapshot of the profile from the last login notification.
    #[must_use]
    pub fn login_info(&self) -> Profile {
        self.state().profile.clone()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Correlation ids of calls awaiting a response.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.inner.table.ids()
    }

    // ---- process lifecycle ----

    fn begin_connecting(&self) -> Result<(), SessionError> {
        let mut state = self.state();
        if state.link != Link::Unattached {
            return Err(SessionError::AlreadyAttached(state.phase()));
        }
        state.link = Link::Connecting;
        Ok(())
    }

    /// Complete an open/attach. Only moves `Connecting` forward, so login
    /// state recorded meanwhile survives.
    async fn finish_connecting(
        &self,
        result: Result<Attachment, TransportError>,
    ) -> Result<Attachment, SessionError> {
        let attachment = result.inspect_err(|_| {
            let mut state = self.state();
            if state.link == Link::Connecting {
                state.link = Link::Unattached;
            }
        })?;

        let connected = {
            let mut state = self.state();
            if state.link == Link::Connecting {
                state.link = Link::Connected;
                state.pid = Some(attachment.pid);
                state.client_id = Some(attachment.client_id);
                true
            } else {
                false
            }
        };
        if !connected {
            tracing::warn!(
                pid = attachment.pid,
                "session detached during attach, releasing process"
            );
            self.inner.transport.detach(attachment.pid).await?;
            return Err(SessionError::Detached);
        }

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.register(attachment.client_id, self.clone());
        }
        Ok(attachment)
    }

    /// Launch the process and attach to it.
    ///
    /// # Errors
    /// Returns error if the session is already attached or the transport
    /// fails to open.
    pub async fn open(&self, smart: bool) -> Result<Attachment, SessionError> {
        self.begin_connecting()?;
        let result = self.inner.transport.open(smart).await;
        let attachment = self.finish_connecting(result).await?;
        tracing::info!(pid = attachment.pid, client_id = attachment.client_id, "opened process");
        Ok(attachment)
    }

    /// Attach to a running process.
    ///
    /// # Errors
    /// Returns error if the session is already attached or the transport
    /// fails to attach.
    pub async fn attach(&self, pid: Pid) -> Result<Attachment, SessionError> {
        self.begin_connecting()?;
        let result = self.inner.transport.attach(pid).await;
        let attachment = self.finish_connecting(result).await?;
        tracing::info!(pid, client_id = attachment.client_id, "attached to process");
        Ok(attachment)
    }

    /// Detach from the process. The session stops accepting inbound
    /// traffic and every pending call fails with [`SessionError::Detached`].
    ///
    /// # Errors
    /// Returns error if the transport fails to detach; the session is
    /// detached regardless.
    pub async fn detach(&self) -> Result<(), SessionError> {
        let (pid, client_id) = {
            let mut state = self.state();
            state.link = Link::Detached;
            (state.pid, state.client_id)
        };

        if let (Some(client_id), Some(registry)) = (client_id, self.inner.registry.upgrade()) {
            registry.unregister(client_id);
        }
        let abandoned = self.inner.table.clear();
        tracing::info!(?pid, ?client_id, abandoned, "detaching");

        if let Some(pid) = pid {
            self.inner.transport.detach(pid).await?;
        }
        Ok(())
    }

    // ---- events ----

    /// Register a handler for unsolicited envelopes of `msg_type`.
    pub fn subscribe<F>(&self, msg_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&Self, &Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(msg_type, handler)
    }

    /// Register one handler for several message types.
    pub fn subscribe_many<I, F>(&self, msg_types: I, handler: F) -> Subscription
    where
        I: IntoIterator<Item = MessageType>,
        F: Fn(&Self, &Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe_many(msg_types, handler)
    }

    /// Wait until the first login notification. Returns immediately if one
    /// was already seen; returns false on timeout.
    pub async fn wait_for_login(&self, timeout: Duration) -> bool {
        tracing::info!("waiting for login");
        let mut rx = self.inner.login_tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|logged_in| *logged_in)).await,
            Ok(Ok(_))
        )
    }

    /// Entry point for inbound traffic.
    ///
    /// Applies login/logout transitions, then resolves the pending call
    /// named by the correlation id or, failing that, publishes the envelope
    /// to subscribers of its type.
    ///
    /// Login state is recorded even before attach completes; it takes effect
    /// once the session is connected. Safe to call from any thread, with or
    /// without a runtime.
    pub fn dispatch_inbound(&self, envelope: Envelope) {
        {
            let mut state = self.state();
            if state.link == Link::Detached {
                tracing::debug!(msg_type = %envelope.msg_type, "session detached, dropping inbound");
                return;
            }
            match envelope.msg_type {
                MessageType::Login => {
                    state.login = Login::LoggedIn;
                    state.profile = Profile::from_payload(&envelope.data);
                    tracing::info!(pid = ?state.pid, client_id = ?state.client_id, "logged in");
                    self.inner.login_tx.send_replace(true);
                }
                MessageType::Logout => {
                    state.login = Login::LoggedOut;
                    tracing::info!(pid = ?state.pid, client_id = ?state.client_id, "logged out");
                }
                _ => {}
            }
        }

        let envelope = match self.inner.table.resolve(envelope) {
            Resolution::Resolved => return,
            Resolution::Unmatched(envelope) => envelope,
        };
        if let Some(id) = &envelope.correlation_id {
            tracing::debug!(correlation_id = %id, "no pending call for id, publishing as event");
        }
        self.inner.events.publish(envelope.msg_type, self, &envelope);
    }

    // ---- outbound ----

    fn ensure_sendable(&self) -> Result<ClientId, SessionError> {
        let state = self.state();
        if state.login != Login::LoggedIn {
            return Err(SessionError::NotAuthenticated);
        }
        match state.link {
            Link::Detached => Err(SessionError::Detached),
            Link::Connected => state.client_id.ok_or(SessionError::NotConnected),
            Link::Unattached | Link::Connecting => Err(SessionError::NotConnected),
        }
    }

    async fn transmit(&self, client_id: ClientId, envelope: &Envelope) -> Result<(), SessionError> {
        let raw = envelope.encode()?;
        tracing::debug!(
            client_id,
            msg_type = %envelope.msg_type,
            correlation_id = ?envelope.correlation_id,
            "sending envelope"
        );
        self.inner.transport.send(client_id, &raw).await?;
        Ok(())
    }

    /// Send without waiting for a reply. Any reply the process sends is
    /// published as an event.
    ///
    /// # Errors
    /// Returns [`SessionError::NotAuthenticated`] if not logged in, or the
    /// transport's error if the send fails.
    pub async fn send(&self, msg_type: MessageType, payload: Value) -> Result<(), SessionError> {
        let client_id = self.ensure_sendable()?;
        self.transmit(client_id, &Envelope::new(msg_type, payload)).await
    }

    /// Send a request and wait up to `timeout` for the matching response.
    ///
    /// A timeout is not an error: it yields [`Reply::TimedOut`].
    ///
    /// # Errors
    /// Returns [`SessionError::NotAuthenticated`] if not logged in, the
    /// transport's error if the send fails, or [`SessionError::Detached`]
    /// if the session detaches while waiting.
    pub async fn call(
        &self,
        msg_type: MessageType,
        payload: Value,
        timeout: Duration,
    ) -> Result<Reply, SessionError> {
        let client_id = self.ensure_sendable()?;
        let pending = self.register_call(msg_type, payload)?;

        let envelope = Envelope::new(msg_type, pending.request_payload().clone())
            .with_correlation_id(pending.correlation_id());
        if let Err(e) = self.transmit(client_id, &envelope).await {
            self.inner.table.remove(pending.correlation_id());
            return Err(e);
        }
        Ok(pending.wait(timeout).await?)
    }

    /// Register a pending call. Fails if the session detached after the
    /// send check, since detach may already have cleared the table.
    fn register_call(
        &self,
        msg_type: MessageType,
        payload: Value,
    ) -> Result<PendingCall, SessionError> {
        let transport = &self.inner.transport;
        let prefix = self.inner.config.id_prefix.as_str();
        let (id, rx) = self
            .inner
            .table
            .register_unique(|| transport.generate_id(prefix), msg_type)?;

        if self.state().link == Link::Detached {
            self.inner.table.remove(&id);
            return Err(SessionError::Detached);
        }
        Ok(PendingCall::new(
            id,
            msg_type,
            payload,
            rx,
            Arc::clone(&self.inner.table),
            self.inner.config.evict_on_timeout,
        ))
    }

    /// Send a typed command without waiting for a reply.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_command(&self, command: &Command) -> Result<(), SessionError> {
        self.send(command.msg_type(), command.payload()?).await
    }

    /// Run a typed query with the configured default timeout.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn query(&self, query: &Query) -> Result<Reply, SessionError> {
        self.call(query.msg_type(), query.payload(), self.inner.config.default_timeout)
            .await
    }

    // ---- queries ----

    /// Own account information.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn get_self_info(&self) -> Result<Reply, SessionError> {
        self.query(&Query::SelfInfo).await
    }

    /// Contact list.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn get_contacts(&self) -> Result<Reply, SessionError> {
        self.query(&Query::Contacts).await
    }

    /// Details of one contact.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn get_contact_detail(&self, wxid: &str) -> Result<Reply, SessionError> {
        self.query(&Query::ContactDetail { wxid: wxid.to_string() }).await
    }

    /// Group list.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn get_rooms(&self) -> Result<Reply, SessionError> {
        self.query(&Query::Rooms).await
    }

    /// Members of one group.
    ///
    /// # Errors
    /// See [`Session::call`].
    pub async fn get_room_members(&self, room_wxid: &str) -> Result<Reply, SessionError> {
        self.query(&Query::RoomMembers {
            room_wxid: room_wxid.to_string(),
        })
        .await
    }

    // ---- commands ----

    /// Text message to a contact or group.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_text(&self, to_wxid: &str, content: &str) -> Result<(), SessionError> {
        self.send_command(&Command::Text(TextPayload {
            to_wxid: to_wxid.to_string(),
            content: content.to_string(),
        }))
        .await
    }

    /// Group message mentioning `at_list`.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_room_at(
        &self,
        to_wxid: &str,
        content: &str,
        at_list: Vec<String>,
    ) -> Result<(), SessionError> {
        self.send_command(&Command::RoomAt(RoomAtPayload {
            to_wxid: to_wxid.to_string(),
            content: content.to_string(),
            at_list,
        }))
        .await
    }

    /// Share the card of `card_wxid`.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_card(&self, to_wxid: &str, card_wxid: &str) -> Result<(), SessionError> {
        self.send_command(&Command::Card(CardPayload {
            to_wxid: to_wxid.to_string(),
            card_wxid: card_wxid.to_string(),
        }))
        .await
    }

    /// Link card.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_link(&self, to_wxid: &str, link: LinkCard<'_>) -> Result<(), SessionError> {
        self.send_command(&Command::Link(LinkPayload {
            to_wxid: to_wxid.to_string(),
            title: link.title.to_string(),
            desc: link.desc.to_string(),
            url: link.url.to_string(),
            image_url: link.image_url.to_string(),
        }))
        .await
    }

    fn media(to_wxid: &str, file_path: &str) -> MediaPayload {
        MediaPayload {
            to_wxid: to_wxid.to_string(),
            file_path: file_path.to_string(),
        }
    }

    /// Image at a local path.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_image(&self, to_wxid: &str, file_path: &str) -> Result<(), SessionError> {
        self.send_command(&Command::Image(Self::media(to_wxid, file_path)))
            .await
    }

    /// File at a local path.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_file(&self, to_wxid: &str, file_path: &str) -> Result<(), SessionError> {
        self.send_command(&Command::File(Self::media(to_wxid, file_path)))
            .await
    }

    /// Video at a local path.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_video(&self, to_wxid: &str, file_path: &str) -> Result<(), SessionError> {
        self.send_command(&Command::Video(Self::media(to_wxid, file_path)))
            .await
    }

    /// Animated gif at a local path.
    ///
    /// # Errors
    /// See [`Session::send`].
    pub async fn send_gif(&self, to_wxid: &str, file_path: &str) -> Result<(), SessionError> {
        self.send_command(&Command::Gif(Self::media(to_wxid, file_path)))
            .await
    }
}

/// Fields of a link card.
#[derive(Debug, Clone, Copy)]
pub struct LinkCard<'a> {
    /// Card title.
    pub title: &'a str,
    /// Card description.
    pub desc: &'a str,
    /// Target of the link.
    pub url: &'a str,
    /// Thumbnail shown on the card.
    pub image_url: &'a str,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "Session(pid: {}, client_id: {})",
            state.pid.unwrap_or_default(),
            state.client_id.unwrap_or_default()
        )
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
