//! The sync client: a thin [`SyncClient`] handle in front of one background
//! task that owns the mirror, the outbound queue and the connection.
//!
//! Everything the client does (commands from the handle, inbound frames,
//! render ticks, heartbeats, connection attempts and backoff) is serialised
//! through a single `tokio::select!` loop, so the mirror needs no locking.

use std::{future::pending, pin::Pin, sync::Arc};

use futures::future::BoxFuture;
use stopwatch_core::{ClientCommand, Clock, Decoded, ServerEvent};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{
        interval, interval_at, sleep, sleep_until, Instant, Interval, MissedTickBehavior, Sleep,
    },
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ClientConfig,
    error::ClientError,
    mirror::ClientMirror,
    queue::OutboundQueue,
    reconnect::{ConnectionState, ReconnectDecision, Reconnector},
    surface::RenderSurface,
    transport::{Connector, Transport},
};

type ConnectFuture = BoxFuture<'static, Result<Box<dyn Transport>, ClientError>>;

/// Handle to a running sync client. Dropping it (or calling
/// [`SyncClient::shutdown`]) stops the background task.
pub struct SyncClient {
    commands: mpsc::UnboundedSender<ClientCommand>,
    state: watch::Receiver<ConnectionState>,
    mirror: watch::Receiver<ClientMirror>,
    task: JoinHandle<()>,
}

impl SyncClient {
    /// Validates `config` and starts the background task.
    pub fn spawn<S: RenderSurface>(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
        surface: S,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (mirror_tx, mirror_rx) = watch::channel(ClientMirror::default());

        let mut render = interval(config.render_period);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let sync = SyncLoop {
            reconnector: Reconnector::new(config.backoff, config.max_retries),
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            connector,
            clock,
            surface,
            commands: commands_rx,
            state_tx,
            mirror_tx,
            mirror: ClientMirror::default(),
            transport: None,
            connecting: None,
            backoff: None,
            render,
            heartbeat: None,
            pong_deadline: None,
        };
        let task = tokio::spawn(sync.run());

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            mirror: mirror_rx,
            task,
        })
    }

    /// Transmits immediately when connected, otherwise queues for the next
    /// open connection. Fails once the retry budget is exhausted.
    pub fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        if self.state() == ConnectionState::PermanentlyFailed {
            return Err(ClientError::PermanentlyFailed);
        }
        self.commands.send(command).map_err(|_| ClientError::Shutdown)
    }

    pub fn start(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Start)
    }

    pub fn stop(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Stop)
    }

    pub fn reset(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Reset)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn mirror(&self) -> ClientMirror {
        *self.mirror.borrow()
    }

    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync client task ended abnormally");
        }
    }
}

struct SyncLoop<S> {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    surface: S,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    state_tx: watch::Sender<ConnectionState>,
    mirror_tx: watch::Sender<ClientMirror>,
    mirror: ClientMirror,
    queue: OutboundQueue,
    reconnector: Reconnector,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<ConnectFuture>,
    backoff: Option<Pin<Box<Sleep>>>,
    render: Interval,
    heartbeat: Option<Interval>,
    pong_deadline: Option<Instant>,
}

impl<S: RenderSurface> SyncLoop<S> {
    async fn run(mut self) {
        self.surface.connection_changed(ConnectionState::Connecting);
        self.begin_connect();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                result = poll_connect(&mut self.connecting) => self.finish_connect(result).await,
                frame = recv_frame(&mut self.transport) => self.handle_frame(frame).await,
                _ = wait_backoff(&mut self.backoff) => {
                    self.backoff = None;
                    self.begin_connect();
                }
                _ = self.render.tick(), if self.mirror.is_running() => self.render_now(),
                _ = tick(&mut self.heartbeat) => self.send_ping().await,
                _ = wait_until(self.pong_deadline) => {
                    warn!("heartbeat timed out; dropping connection");
                    self.connection_lost().await;
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        debug!("sync client task finished");
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        if self.gave_up() {
            warn!(command = command.kind(), "no connection left; dropping command");
            return;
        }

        let accepted = if self.transport.is_some() {
            // A failed send is requeued, so it still counts while a retry
            // remains.
            self.transmit(command).await || !self.gave_up()
        } else if self.queue.push(command) {
            debug!(
                command = command.kind(),
                queued = self.queue.len(),
                "queued command while offline"
            );
            true
        } else {
            warn!(command = command.kind(), "outbound queue full; dropping command");
            false
        };

        if accepted
            && command == ClientCommand::Start
            && self.config.optimistic_start
            && self.mirror.predict_start(self.clock.now_millis())
        {
            debug!("optimistically running before confirmation");
            self.publish_mirror();
            self.render_now();
        }
    }

    fn gave_up(&self) -> bool {
        self.reconnector.state() == ConnectionState::PermanentlyFailed
    }

    /// Sends one command on the open transport. On failure the command goes
    /// back to the head of the queue and the connection is treated as lost.
    async fn transmit(&mut self, command: ClientCommand) -> bool {
        let frame = match command.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(command = command.kind(), error = %err, "dropping unencodable command");
                return true;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            self.queue.requeue_front(command);
            return false;
        };
        match transport.send(frame).await {
            Ok(()) => {
                debug!(command = command.kind(), "command sent");
                true
            }
            Err(err) => {
                warn!(command = command.kind(), error = %err, "send failed; requeueing");
                self.queue.requeue_front(command);
                self.connection_lost().await;
                false
            }
        }
    }

    async fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "flushing queued commands");
        }
        while let Some(command) = self.queue.pop_front() {
            if !self.transmit(command).await {
                return;
            }
        }
    }

    fn begin_connect(&mut self) {
        self.reconnector.connecting();
        self.publish_state();
        let connector = Arc::clone(&self.connector);
        self.connecting = Some(Box::pin(async move { connector.connect().await }));
    }

    async fn finish_connect(&mut self, result: Result<Box<dyn Transport>, ClientError>) {
        self.connecting = None;
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.reconnector.opened();
                self.publish_state();
                info!("connected to timekeeper");
                if let Some(heartbeat) = self.config.heartbeat {
                    let mut ticker =
                        interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(ticker);
                }
                self.pong_deadline = None;
                self.flush_queue().await;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    failures = self.reconnector.failures() + 1,
                    "connection attempt failed"
                );
                self.schedule_retry();
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<String, ClientError>>) {
        match frame {
            Some(Ok(text)) => self.handle_text(&text),
            Some(Err(err)) => {
                warn!(error = %err, "transport error");
                self.connection_lost().await;
            }
            None => {
                info!("connection closed by timekeeper");
                self.connection_lost().await;
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        match ServerEvent::decode(text) {
            Ok(Decoded::Message(ServerEvent::Pong)) => {
                self.pong_deadline = None;
            }
            Ok(Decoded::Message(event)) => {
                debug!(kind = event.kind(), "authoritative update");
                self.mirror.apply(event);
                self.publish_mirror();
                self.render_now();
                if self.mirror.is_running() {
                    self.render.reset();
                }
            }
            Ok(Decoded::Unknown(kind)) => {
                debug!(%kind, "ignoring unrecognised event kind");
            }
            Err(err) => {
                warn!(error = %err, "discarding malformed frame");
            }
        }
    }

    async fn send_ping(&mut self) {
        let Some(heartbeat) = self.config.heartbeat else {
            return;
        };
        if self.pong_deadline.is_some() {
            return;
        }
        if self.transmit(ClientCommand::Ping).await {
            self.pong_deadline = Some(Instant::now() + heartbeat.timeout);
        } else {
            // A failed ping must not be replayed on the next connection.
            self.queue.pop_front();
        }
    }

    async fn connection_lost(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.heartbeat = None;
        self.pong_deadline = None;
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.reconnector.failed() {
            ReconnectDecision::RetryAfter(delay) => {
                info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.backoff = Some(Box::pin(sleep(delay)));
            }
            ReconnectDecision::GiveUp => {
                error!(
                    max_retries = self.config.max_retries,
                    "exhausted reconnect attempts; giving up"
                );
                let dropped = self.queue.clear();
                if dropped > 0 {
                    warn!(dropped, "discarding commands that can no longer be sent");
                }
                if self.mirror.discard_prediction() {
                    self.publish_mirror();
                    self.render_now();
                }
            }
        }
        self.publish_state();
    }

    fn render_now(&mut self) {
        let text = self.mirror.render_at(self.clock.now_millis());
        self.surface.render(&text);
    }

    fn publish_mirror(&self) {
        self.mirror_tx.send_replace(self.mirror);
    }

    fn publish_state(&mut self) {
        let state = self.reconnector.state();
        if self.state_tx.send_replace(state) != state {
            self.surface.connection_changed(state);
        }
    }
}

async fn poll_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<Box<dyn Transport>, ClientError> {
    match connecting {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn recv_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<String, ClientError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

async fn wait_backoff(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
