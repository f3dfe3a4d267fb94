//! Async session driver.
//!
//! [`SessionClient::spawn`] moves a [`Session`] and a [`Transport`] into one
//! tokio task. That task is the only owner of session state: inbound frames,
//! timer ticks and handle commands are processed one at a time, in arrival
//! order. The application talks to it through a cloneable [`SessionHandle`]
//! and reads [`SessionEvent`]s from a bounded channel.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::Node;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{Action, Reply, RequestKind, Session, SessionEvent, WireFrame};
use crate::transport::Transport;
use crate::utils::crypto::KeyProvider;
use crate::utils::metrics::{MetricsSnapshot, SessionMetrics};
use crate::utils::timeout::with_timeout_error;

const COMMAND_BUFFER: usize = 32;

enum Command {
    SendNode {
        node: Node,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Request {
        kind: RequestKind,
        body: Value,
        reply: oneshot::Sender<Result<Reply>>,
    },
}

/// Builder for a driven session.
pub struct SessionClient<P: KeyProvider> {
    config: ClientConfig,
    provider: P,
    metrics: Arc<SessionMetrics>,
}

impl<P: KeyProvider + 'static> SessionClient<P> {
    pub fn new(config: ClientConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            metrics: Arc::new(SessionMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Open the session over `transport` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Transport + 'static>(
        self,
        transport: T,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = CancellationToken::new();

        let session = Session::new(self.config.clone(), self.provider)
            .with_metrics(Arc::clone(&self.metrics));
        let driver = Driver {
            session,
            transport,
            events: event_tx,
            keepalive: None,
            cancel: cancel.clone(),
            send_timeout: self.config.send_timeout,
            metrics: Arc::clone(&self.metrics),
        };
        tokio::spawn(driver.run(command_rx, self.config.timeout_sweep_interval));

        let handle = SessionHandle {
            commands: command_tx,
            cancel,
            metrics: self.metrics,
        };
        (handle, event_rx)
    }
}

/// Cloneable control surface of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    metrics: Arc<SessionMetrics>,
}

impl SessionHandle {
    /// Send an encrypted node and wait for the tagged reply.
    pub async fn send_node(&self, node: Node) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::SendNode { node, reply }, rx).await
    }

    /// Send a JSON query and wait for the tagged reply.
    pub async fn query(&self, body: Value) -> Result<Reply> {
        self.request(RequestKind::Query, body).await
    }

    /// Send a JSON request of a text `kind`.
    pub async fn request(&self, kind: RequestKind, body: Value) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Request { kind, body, reply }, rx)
            .await
    }

    async fn dispatch(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<Reply>>,
    ) -> Result<Reply> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ProtocolError::InvalidState(constants::ERR_DRIVER_GONE.into()))?;
        rx.await
            .map_err(|_| ProtocolError::InvalidState(constants::ERR_DRIVER_GONE.into()))?
    }

    /// Close the session. Pending requests fail with `RequestCancelled`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session has ended for any reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Keepalive timer; cancelled exactly once when stopped.
struct Keepalive {
    interval: Interval,
    stop: CancellationToken,
}

impl Keepalive {
    fn start(period: Duration, stop: CancellationToken) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, stop }
    }
}

/// Resolves on the next keepalive tick; never resolves without a timer.
async fn next_keepalive(keepalive: &mut Option<Keepalive>) -> bool {
    match keepalive {
        Some(k) => tokio::select! {
            _ = k.interval.tick() => true,
            _ = k.stop.cancelled() => false,
        },
        None => std::future::pending().await,
    }
}

struct Driver<T, P: KeyProvider> {
    session: Session<P>,
    transport: T,
    events: mpsc::Sender<SessionEvent>,
    keepalive: Option<Keepalive>,
    cancel: CancellationToken,
    send_timeout: Duration,
    metrics: Arc<SessionMetrics>,
}

impl<T: Transport, P: KeyProvider> Driver<T, P> {
    #[instrument(skip_all)]
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, sweep_period: Duration) {
        let mut sweep = time::interval_at(Instant::now() + sweep_period, sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        match self.session.open() {
            Ok(actions) => self.apply(actions).await,
            Err(e) => {
                let actions = self.session.abort(&e);
                self.apply(actions).await;
            }
        }

        while !self.session.state().is_terminal() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("close requested");
                    let actions = self.session.close();
                    self.apply(actions).await;
                }
                frame = self.transport.next() => {
                    let actions = match frame {
                        Some(Ok(frame)) => self.session.handle_frame(&frame),
                        Some(Err(e)) => {
                            warn!(error = %e, "transport error");
                            self.session.abort(&e)
                        }
                        None => {
                            info!("transport closed by peer");
                            self.session.close()
                        }
                    };
                    self.apply(actions).await;
                }
                fired = next_keepalive(&mut self.keepalive) => {
                    if !fired {
                        self.keepalive = None;
                    } else if let Some(frame) = self.session.keepalive() {
                        self.apply(vec![Action::Send(frame)]).await;
                    }
                }
                _ = sweep.tick() => {
                    let actions = self.session.expire_requests(Instant::now());
                    self.apply(actions).await;
                }
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("all handles dropped");
                            let actions = self.session.close();
                            self.apply(actions).await;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
        self.cancel.cancel();
        self.metrics.log_metrics();
        debug!(state = ?self.session.state(), "driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let (prepared, kind, reply) = match command {
            Command::SendNode { node, reply } => {
                (self.session.send_node(&node), RequestKind::Binary, reply)
            }
            Command::Request { kind, body, reply } => {
                (self.session.send_json(kind, &body), kind, reply)
            }
        };
        match prepared {
            Ok(outbound) => {
                self.session.expect_reply(&outbound.tag, kind, reply);
                self.apply(vec![Action::Send(outbound.frame)]).await;
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send(frame) => {
                    if let Err(e) = self.send(frame).await {
                        error!(error = %e, "send failed");
                        queue.extend(self.session.abort(&e));
                    }
                }
                Action::StartKeepalive(period) => {
                    debug!(period_ms = period.as_millis() as u64, "keepalive started");
                    self.keepalive = Some(Keepalive::start(period, self.cancel.child_token()));
                }
                Action::StopKeepalive => {
                    if let Some(keepalive) = self.keepalive.take() {
                        keepalive.stop.cancel();
                        debug!("keepalive stopped");
                    }
                }
                Action::Emit(event) => {
                    let qr = matches!(event, SessionEvent::QrReady(_));
                    if self.events.send(event).await.is_err() {
                        debug!("event receiver dropped");
                    } else if qr {
                        self.session.qr_displayed();
                    }
                }
            }
        }
    }

    async fn send(&mut self, frame: WireFrame) -> Result<()> {
        let len = frame.len() as u64;
        with_timeout_error(self.transport.send(frame), self.send_timeout).await?;
        self.metrics.frame_sent(len);
        Ok(())
    }
}
