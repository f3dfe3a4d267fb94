//! Sans-I/O session state machine.
//!
//! A [`Session`] consumes inbound [`WireFrame`]s and outbound requests and
//! answers with [`Action`]s for its owner to carry out: frames to send,
//! keepalive timer changes and events for the application. It never blocks
//! and never touches a socket or a clock it was not handed.
//!
//! ```text
//! Idle -> SocketOpen -> AwaitingRef -> QrIssued -> AwaitingConn -> KeysEstablished -> Closed
//!                 \__________ any non-terminal state __________/ -> Failed(reason)
//! ```

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::{Node, NodeReader, NodeWriter};
use crate::error::{constants, FailureReason, ProtocolError, Result};
use crate::protocol::handshake::{
    self, ConnPayload, ConnectionOpts, HandshakeMaterial, SessionKeys,
};
use crate::protocol::message::{self, ControlMessage, Inbound, TaggedFrame, WireFrame};
use crate::protocol::pending::{PendingRequest, PendingRequests, Reply, RequestKind, Responder};
use crate::utils::crypto::{EphemeralKeyPair, KeyProvider, IV_LEN};
use crate::utils::metrics::SessionMetrics;
use crate::utils::time::MessageTagGenerator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SocketOpen,
    AwaitingRef,
    QrIssued,
    AwaitingConn,
    KeysEstablished,
    Closed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::KeysEstablished)
    }
}

/// Notifications for the owning application, in frame-arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Pairing text to render as a QR code
    QrReady(String),
    Authenticated { identity: Option<String> },
    /// Decrypted and decoded binary frame
    Node(Node),
    /// Server-initiated control frame other than a handshake `Conn`
    Control { name: String, payload: Value },
    /// Frame that matched nothing; not fatal
    Unhandled { tag: Option<String>, reason: String },
    RequestTimedOut { tag: String, kind: RequestKind },
    RequestCancelled { tag: String, kind: RequestKind },
    Failed(FailureReason),
    Closed,
}

/// Work the owner must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(WireFrame),
    StartKeepalive(Duration),
    StopKeepalive,
    Emit(SessionEvent),
}

/// An outbound request ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub tag: String,
    pub frame: WireFrame,
}

/// One connection's protocol state.
///
/// Owns the handshake material, the session keys and the pending request
/// table; none of them outlive the session or are shared with another one.
pub struct Session<P: KeyProvider> {
    config: ClientConfig,
    provider: P,
    state: SessionState,
    tags: MessageTagGenerator,
    pending: PendingRequests,
    material: Option<HandshakeMaterial>,
    keypair: Option<EphemeralKeyPair>,
    connection: Option<ConnectionOpts>,
    keys: Option<SessionKeys>,
    keepalive_running: bool,
    metrics: Arc<SessionMetrics>,
}

impl<P: KeyProvider> Session<P> {
    pub fn new(config: ClientConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            state: SessionState::Idle,
            tags: MessageTagGenerator::new(),
            pending: PendingRequests::new(),
            material: None,
            keypair: None,
            connection: None,
            keys: None,
            keepalive_running: false,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    /// Record into an existing metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    pub fn connection(&self) -> Option<&ConnectionOpts> {
        self.connection.as_ref()
    }

    pub fn handshake_material(&self) -> Option<&HandshakeMaterial> {
        self.material.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn keepalive_running(&self) -> bool {
        self.keepalive_running
    }

    /// Start the handshake on a freshly connected transport.
    ///
    /// Generates the client id and queues the `admin/init` frame; its tag is
    /// tracked as the login request.
    #[instrument(skip(self))]
    pub fn open(&mut self) -> Result<Vec<Action>> {
        if self.state != SessionState::Idle {
            return Err(ProtocolError::InvalidState(
                constants::ERR_ALREADY_OPEN.into(),
            ));
        }
        self.state = SessionState::SocketOpen;

        let material = HandshakeMaterial::generate(&mut self.provider)?;
        let tag = self.tags.next_tag()?;
        self.pending
            .insert(tag.as_str(), RequestKind::Login, Instant::now(), None)?;
        let frame = message::admin_init_frame(&tag, &self.config, &material.client_id);

        self.material = Some(material);
        self.metrics.handshake_attempt();
        self.state = SessionState::AwaitingRef;
        debug!(tag = %tag, "admin init queued");
        Ok(vec![Action::Send(frame)])
    }

    /// The QR payload reached the display; `Conn` is expected next.
    pub fn qr_displayed(&mut self) {
        if self.state == SessionState::QrIssued {
            self.state = SessionState::AwaitingConn;
        }
    }

    /// Process one inbound frame.
    ///
    /// Never returns an error: malformed frames surface as
    /// [`SessionEvent::Unhandled`] and security failures move the session to
    /// `Failed`.
    pub fn handle_frame(&mut self, frame: &WireFrame) -> Vec<Action> {
        if self.state.is_terminal() {
            debug!(state = ?self.state, "frame after teardown dropped");
            return Vec::new();
        }
        self.metrics.frame_received(frame.len() as u64);

        let tagged = match Inbound::parse(frame) {
            Ok(Inbound::Pong(server_time)) => {
                debug!(server_time = %server_time, "keepalive answered");
                return Vec::new();
            }
            Ok(Inbound::Tagged(tagged)) => tagged,
            Err(e) => {
                warn!(error = %e, "unparsable frame");
                return vec![unhandled(None, e.to_string())];
            }
        };

        if let Some(request) = self.pending.take(&tagged.tag) {
            return self.resolve_request(tagged, request);
        }
        if tagged.binary {
            self.handle_binary(tagged)
        } else {
            self.handle_text(tagged)
        }
    }

    fn resolve_request(&mut self, tagged: TaggedFrame, request: PendingRequest) -> Vec<Action> {
        debug!(tag = %tagged.tag, kind = %request.kind, "reply matched");
        if tagged.binary {
            return self.resolve_binary_reply(tagged, request);
        }
        match request.kind {
            RequestKind::Login => self.handle_login_reply(&tagged.content),
            _ => {
                self.metrics.request_resolved();
                request.resolve(Ok(json_or_text(&tagged.content)));
                Vec::new()
            }
        }
    }

    /// Binary replies are authenticated like any other binary frame,
    /// whatever kind of request they answer.
    fn resolve_binary_reply(&mut self, tagged: TaggedFrame, request: PendingRequest) -> Vec<Action> {
        if !self.state.is_authenticated() {
            warn!(tag = %tagged.tag, kind = %request.kind, "binary reply before authentication");
            if request.kind == RequestKind::Login {
                let err = ProtocolError::HandshakeAborted(constants::ERR_BINARY_LOGIN_REPLY.into());
                return self.fail(&err);
            }
            request.resolve(Err(ProtocolError::InvalidState(
                constants::ERR_NOT_AUTHENTICATED.into(),
            )));
            return vec![unhandled(Some(tagged.tag), constants::ERR_NOT_AUTHENTICATED)];
        }

        let plaintext = match self.decrypt_authenticated(&tagged.content) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                let actions = self.fail(&e);
                request.resolve(Err(e));
                return actions;
            }
        };
        match NodeReader::decode(&plaintext) {
            Ok(node) => {
                self.metrics.request_resolved();
                request.resolve(Ok(Reply::Node(node)));
            }
            Err(e) => {
                self.metrics.decode_error();
                warn!(tag = %tagged.tag, error = %e, "undecodable reply");
                request.resolve(Err(e));
            }
        }
        Vec::new()
    }

    fn handle_login_reply(&mut self, content: &[u8]) -> Vec<Action> {
        match self.issue_qr(content) {
            Ok(qr) => {
                self.state = SessionState::QrIssued;
                debug!("QR payload issued");
                vec![Action::Emit(SessionEvent::QrReady(qr))]
            }
            Err(e) => self.fail(&e),
        }
    }

    fn issue_qr(&mut self, content: &[u8]) -> Result<String> {
        let reply: Value = serde_json::from_slice(content).map_err(|e| {
            ProtocolError::HandshakeAborted(format!("Malformed login reply: {e}"))
        })?;
        if let Some(status) = reply.get("status").and_then(Value::as_u64) {
            if status != 200 {
                return Err(ProtocolError::HandshakeAborted(format!(
                    "{} (status {status})",
                    constants::ERR_LOGIN_REFUSED
                )));
            }
        }
        let server_ref = reply
            .get("ref")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::HandshakeAborted(constants::ERR_MISSING_REF.into()))?
            .to_string();

        let keypair = self.provider.generate_keypair()?;
        let material = self
            .material
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_NOT_OPEN.into()))?;
        let qr = handshake::qr_payload(&server_ref, keypair.public_key(), &material.client_id);
        material.server_ref = Some(server_ref);
        self.keypair = Some(keypair);
        Ok(qr)
    }

    fn handle_text(&mut self, tagged: TaggedFrame) -> Vec<Action> {
        if tagged.content.is_empty() {
            return vec![unhandled(Some(tagged.tag), "empty content")];
        }
        let value: Value = match serde_json::from_slice(&tagged.content) {
            Ok(value) => value,
            Err(e) => {
                warn!(tag = %tagged.tag, error = %e, "unparsable JSON frame");
                return vec![unhandled(Some(tagged.tag), format!("unparsable JSON: {e}"))];
            }
        };

        match ControlMessage::from_value(value) {
            Some(ControlMessage::Conn(payload)) => self.handle_conn(payload),
            Some(control) => {
                let (name, payload) = control.into_parts();
                debug!(name = %name, "control frame forwarded");
                vec![Action::Emit(SessionEvent::Control { name, payload })]
            }
            None => {
                warn!(tag = %tagged.tag, "unmatched tag");
                vec![unhandled(Some(tagged.tag), "unmatched tag")]
            }
        }
    }

    fn handle_conn(&mut self, payload: Value) -> Vec<Action> {
        if self.state.is_authenticated() {
            return vec![Action::Emit(SessionEvent::Control {
                name: "Conn".into(),
                payload,
            })];
        }

        let mut actions = Vec::new();
        if !self.keepalive_running {
            self.keepalive_running = true;
            actions.push(Action::StartKeepalive(self.config.keepalive_interval));
        }

        match self.complete_handshake(payload) {
            Ok(identity) => {
                self.state = SessionState::KeysEstablished;
                self.metrics.handshake_success();
                info!(identity = ?identity, "session authenticated");
                actions.push(Action::Emit(SessionEvent::Authenticated { identity }));
            }
            Err(e) => actions.extend(self.fail(&e)),
        }
        actions
    }

    fn complete_handshake(&mut self, payload: Value) -> Result<Option<String>> {
        let keypair = self
            .keypair
            .take()
            .ok_or_else(|| ProtocolError::HandshakeAborted(constants::ERR_NO_KEYPAIR.into()))?;
        let payload = ConnPayload::from_value(payload)?;
        let (connection, keys) = handshake::establish_session(&keypair, &payload)?;
        let identity = connection.identity.clone();
        self.connection = Some(connection);
        self.keys = Some(keys);
        Ok(identity)
    }

    fn handle_binary(&mut self, tagged: TaggedFrame) -> Vec<Action> {
        if !self.state.is_authenticated() {
            warn!(tag = %tagged.tag, "binary frame before authentication");
            return vec![unhandled(
                Some(tagged.tag),
                constants::ERR_NOT_AUTHENTICATED,
            )];
        }
        if tagged.content.is_empty() {
            return vec![unhandled(Some(tagged.tag), "empty binary frame")];
        }

        let plaintext = match self.decrypt_authenticated(&tagged.content) {
            Ok(plaintext) => plaintext,
            Err(e) => return self.fail(&e),
        };
        match NodeReader::decode(&plaintext) {
            Ok(node) => vec![Action::Emit(SessionEvent::Node(node))],
            Err(e) => {
                self.metrics.decode_error();
                warn!(tag = %tagged.tag, error = %e, "undecodable node");
                vec![unhandled(Some(tagged.tag), e.to_string())]
            }
        }
    }

    fn decrypt_authenticated(&self, content: &[u8]) -> Result<Vec<u8>> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_NOT_AUTHENTICATED.into()))?;
        let plaintext = handshake::decrypt_frame(keys, content)?;
        self.metrics.frame_decrypted();
        Ok(plaintext)
    }

    /// Encrypt `node` into a binary frame under a fresh tag.
    ///
    /// The tag is not tracked; call [`expect_reply`] to wait for an answer.
    ///
    /// [`expect_reply`]: Session::expect_reply
    #[instrument(skip(self, node), fields(tag = %node.tag))]
    pub fn send_node(&mut self, node: &Node) -> Result<Outbound> {
        if !self.state.is_authenticated() {
            return Err(ProtocolError::InvalidState(
                constants::ERR_NOT_AUTHENTICATED.into(),
            ));
        }
        let mut iv = [0u8; IV_LEN];
        self.provider.fill_random(&mut iv)?;
        let plaintext = NodeWriter::encode(node)?;
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_NOT_AUTHENTICATED.into()))?;
        let sealed = handshake::encrypt_frame(keys, &iv, &plaintext)?;

        let tag = self.tags.next_tag()?;
        Ok(Outbound {
            frame: message::binary_frame(&tag, &sealed),
            tag,
        })
    }

    /// Build a JSON request as a text frame under a fresh tag.
    ///
    /// `kind` must be one of the text kinds; `Login` belongs to [`open`]
    /// and `Binary` to [`send_node`].
    ///
    /// [`open`]: Session::open
    /// [`send_node`]: Session::send_node
    pub fn send_json(&mut self, kind: RequestKind, body: &Value) -> Result<Outbound> {
        if matches!(kind, RequestKind::Login | RequestKind::Binary) {
            return Err(ProtocolError::InvalidState(format!(
                "{kind} requests are not sent as JSON"
            )));
        }
        match self.state {
            SessionState::Idle => {
                return Err(ProtocolError::InvalidState(constants::ERR_NOT_OPEN.into()))
            }
            SessionState::Closed | SessionState::Failed(_) => {
                return Err(ProtocolError::InvalidState(
                    constants::ERR_SESSION_TERMINATED.into(),
                ))
            }
            _ => {}
        }

        let tag = self.tags.next_tag()?;
        Ok(Outbound {
            frame: message::text_frame(&tag, body),
            tag,
        })
    }

    /// Track `tag` until its reply arrives, it times out or the session ends.
    ///
    /// Every outcome, including a rejected registration, is delivered through
    /// `responder`.
    pub fn expect_reply(&mut self, tag: &str, kind: RequestKind, responder: Responder) {
        let rejection = if self.state.is_terminal() {
            Some(constants::ERR_SESSION_TERMINATED.to_string())
        } else if self.pending.contains(tag) {
            Some(format!("{}: {tag}", constants::ERR_DUPLICATE_TAG))
        } else {
            None
        };
        if let Some(reason) = rejection {
            let _ = responder.send(Err(ProtocolError::InvalidState(reason)));
            return;
        }
        if self
            .pending
            .insert(tag, kind, Instant::now(), Some(responder))
            .is_ok()
        {
            self.metrics.request_sent();
        }
    }

    /// Fail the session from outside, e.g. on a transport error.
    pub fn abort(&mut self, err: &ProtocolError) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.fail(err)
    }

    /// Keepalive probe, if the timer should still be running.
    pub fn keepalive(&self) -> Option<WireFrame> {
        (self.keepalive_running && !self.state.is_terminal()).then(message::keepalive_frame)
    }

    /// Fail requests older than the response timeout.
    ///
    /// An expired login request aborts the handshake.
    pub fn expire_requests(&mut self, now: Instant) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let expired = self.pending.expire(now, self.config.response_timeout);
        if expired.is_empty() {
            return Vec::new();
        }
        self.metrics.requests_timed_out(expired.len() as u64);

        let mut login_expired = false;
        let mut actions = Vec::with_capacity(expired.len());
        for (tag, kind) in expired {
            warn!(tag = %tag, kind = %kind, "request timed out");
            login_expired |= kind == RequestKind::Login;
            actions.push(Action::Emit(SessionEvent::RequestTimedOut { tag, kind }));
        }
        if login_expired {
            let err = ProtocolError::HandshakeAborted(constants::ERR_LOGIN_TIMEOUT.into());
            actions.extend(self.fail(&err));
        }
        actions
    }

    /// Close the session: the transport went away or the owner asked.
    pub fn close(&mut self) -> Vec<Action> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        info!(state = ?self.state, "session closed");
        if !self.state.is_authenticated() && self.state != SessionState::Idle {
            self.metrics.handshake_failed();
        }
        let mut actions = self.teardown();
        self.state = SessionState::Closed;
        actions.push(Action::Emit(SessionEvent::Closed));
        actions
    }

    fn fail(&mut self, err: &ProtocolError) -> Vec<Action> {
        let reason = FailureReason::from(err);
        error!(error = %err, state = ?self.state, "session failed");
        if matches!(err, ProtocolError::HmacMismatch { .. }) {
            self.metrics.mac_failure();
        }
        if !self.state.is_authenticated() {
            self.metrics.handshake_failed();
        }
        let mut actions = self.teardown();
        self.state = SessionState::Failed(reason.clone());
        actions.push(Action::Emit(SessionEvent::Failed(reason)));
        actions
    }

    /// Cancel pending requests, stop the keepalive and drop key material.
    fn teardown(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.keepalive_running {
            self.keepalive_running = false;
            actions.push(Action::StopKeepalive);
        }

        let cancelled = self.pending.cancel_all();
        if !cancelled.is_empty() {
            debug!(count = cancelled.len(), "pending requests cancelled");
            self.metrics.requests_cancelled(cancelled.len() as u64);
        }
        actions.extend(
            cancelled
                .into_iter()
                .map(|(tag, kind)| Action::Emit(SessionEvent::RequestCancelled { tag, kind })),
        );

        self.keys = None;
        self.keypair = None;
        self.connection = None;
        actions
    }
}

fn unhandled(tag: Option<String>, reason: impl Into<String>) -> Action {
    Action::Emit(SessionEvent::Unhandled {
        tag,
        reason: reason.into(),
    })
}

fn json_or_text(content: &[u8]) -> Reply {
    match serde_json::from_slice::<Value>(content) {
        Ok(value) => Reply::Json(value),
        Err(_) => Reply::Text(String::from_utf8_lossy(content).into_owned()),
    }
}
