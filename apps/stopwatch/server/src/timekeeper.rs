//! The single writer of stopwatch truth.
//!
//! [`Timekeeper`] owns the authoritative [`TimerState`] together with the set
//! of open viewer connections. It is driven by one actor task (see [`spawn`]),
//! so commands from every connection are applied strictly one at a time and
//! each resulting broadcast reaches all viewers in the same order.

use std::sync::Arc;

use metrics::{counter, gauge};
use serde::Serialize;
use stopwatch_core::{elapsed_since, ClientCommand, Clock, ServerEvent};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::registry::{ConnectionId, ConnectionRegistry, EventSender};

/// Authoritative timer fields.
///
/// While running, `epoch_start` already has `accumulated` baked in, so the
/// total elapsed time is a single subtraction. `epoch_start` survives a stop
/// and is only cleared by a reset; its presence marks that a run has happened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub running: bool,
    pub epoch_start: Option<i64>,
    pub accumulated: i64,
}

impl TimerState {
    pub fn elapsed_at(&self, now: i64) -> i64 {
        match (self.running, self.epoch_start) {
            (true, Some(epoch_start)) => elapsed_since(epoch_start, now),
            _ => self.accumulated,
        }
    }

    /// Message that brings a freshly connected viewer up to date, if any.
    pub fn catch_up_event(&self) -> Option<ServerEvent> {
        match (self.running, self.epoch_start) {
            (true, Some(start_time)) => Some(ServerEvent::Start {
                start_time,
                accumulated: self.accumulated,
            }),
            (false, Some(_)) => Some(ServerEvent::Stop {
                stop_time: self.accumulated,
            }),
            _ => None,
        }
    }
}

/// Point-in-time view served by `GET /state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub running: bool,
    pub epoch_start: Option<i64>,
    pub accumulated: i64,
    pub elapsed: i64,
    pub connections: usize,
}

pub struct Timekeeper {
    clock: Arc<dyn Clock>,
    state: TimerState,
    connections: ConnectionRegistry,
}

impl Timekeeper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: TimerState::default(),
            connections: ConnectionRegistry::new(),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let now = self.clock.now_millis();
        TimerSnapshot {
            running: self.state.running,
            epoch_start: self.state.epoch_start,
            accumulated: self.state.accumulated,
            elapsed: self.state.elapsed_at(now),
            connections: self.connections.len(),
        }
    }

    pub fn on_connect(&mut self, id: ConnectionId, sender: EventSender) {
        let active = self.connections.add(id, sender);
        gauge!("stopwatch_connections_active", active as f64);
        counter!("stopwatch_connections_total", 1);
        if let Some(event) = self.state.catch_up_event() {
            debug!(connection_id = %id, kind = event.kind(), "sending catch-up snapshot");
            self.connections.send_to(id, event);
        }
    }

    pub fn on_disconnect(&mut self, id: ConnectionId) {
        if self.connections.remove(id) {
            gauge!("stopwatch_connections_active", self.connections.len() as f64);
        }
    }

    pub fn on_command(&mut self, id: ConnectionId, command: ClientCommand) {
        counter!("stopwatch_commands_total", 1, "command" => command.kind());
        match command {
            ClientCommand::Start => {
                self.on_start();
            }
            ClientCommand::Stop => {
                self.on_stop();
            }
            ClientCommand::Reset => self.on_reset(),
            ClientCommand::Ping => {
                self.connections.send_to(id, ServerEvent::Pong);
            }
        }
    }

    /// Starts or resumes the run. Returns `false` (and broadcasts nothing)
    /// when the timer is already running.
    pub fn on_start(&mut self) -> bool {
        if self.state.running {
            debug!("start ignored; timer already running");
            return false;
        }
        let start_time = self.clock.now_millis() - self.state.accumulated;
        self.state.epoch_start = Some(start_time);
        self.state.running = true;
        info!(start_time, accumulated = self.state.accumulated, "timer started");
        self.broadcast(ServerEvent::Start {
            start_time,
            accumulated: self.state.accumulated,
        });
        true
    }

    /// Pauses the run, banking the elapsed time. Returns `false` when the
    /// timer is already stopped.
    pub fn on_stop(&mut self) -> bool {
        let Some(epoch_start) = self.state.epoch_start.filter(|_| self.state.running) else {
            debug!("stop ignored; timer not running");
            return false;
        };
        let stop_time = elapsed_since(epoch_start, self.clock.now_millis());
        self.state.accumulated = stop_time;
        self.state.running = false;
        info!(stop_time, "timer stopped");
        self.broadcast(ServerEvent::Stop { stop_time });
        true
    }

    pub fn on_reset(&mut self) {
        self.state = TimerState::default();
        info!("timer reset");
        self.broadcast(ServerEvent::Reset);
    }

    fn broadcast(&mut self, event: ServerEvent) {
        let metrics = self.connections.broadcast(event);
        counter!("stopwatch_broadcasts_total", 1, "event" => event.kind());
        if metrics.closed > 0 {
            counter!("stopwatch_connections_evicted_total", metrics.closed as u64);
            gauge!("stopwatch_connections_active", self.connections.len() as f64);
        }
        debug!(
            kind = event.kind(),
            delivered = metrics.delivered,
            evicted = metrics.closed,
            "broadcast"
        );
    }

    fn handle(&mut self, event: TimekeeperEvent) {
        match event {
            TimekeeperEvent::Connected { id, sender } => self.on_connect(id, sender),
            TimekeeperEvent::Command { id, command } => self.on_command(id, command),
            TimekeeperEvent::Disconnected { id } => self.on_disconnect(id),
            TimekeeperEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }
}

enum TimekeeperEvent {
    Connected {
        id: ConnectionId,
        sender: EventSender,
    },
    Command {
        id: ConnectionId,
        command: ClientCommand,
    },
    Disconnected {
        id: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<TimerSnapshot>,
    },
}

#[derive(Debug, Error)]
#[error("timekeeper task has stopped")]
pub struct TimekeeperGone;

/// Cloneable entry point into the timekeeper actor.
#[derive(Clone)]
pub struct TimekeeperHandle {
    tx: mpsc::UnboundedSender<TimekeeperEvent>,
}

impl TimekeeperHandle {
    pub fn connected(&self, id: ConnectionId, sender: EventSender) -> Result<(), TimekeeperGone> {
        self.submit(TimekeeperEvent::Connected { id, sender })
    }

    pub fn command(&self, id: ConnectionId, command: ClientCommand) -> Result<(), TimekeeperGone> {
        self.submit(TimekeeperEvent::Command { id, command })
    }

    pub fn disconnected(&self, id: ConnectionId) -> Result<(), TimekeeperGone> {
        self.submit(TimekeeperEvent::Disconnected { id })
    }

    pub async fn snapshot(&self) -> Result<TimerSnapshot, TimekeeperGone> {
        let (reply, rx) = oneshot::channel();
        self.submit(TimekeeperEvent::Snapshot { reply })?;
        rx.await.map_err(|_| TimekeeperGone)
    }

    fn submit(&self, event: TimekeeperEvent) -> Result<(), TimekeeperGone> {
        self.tx.send(event).map_err(|_| TimekeeperGone)
    }
}

/// Moves the timekeeper onto its own task. The task ends once every handle
/// has been dropped.
pub fn spawn(timekeeper: Timekeeper) -> (TimekeeperHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(timekeeper, rx));
    (TimekeeperHandle { tx }, task)
}

async fn run(mut timekeeper: Timekeeper, mut rx: mpsc::UnboundedReceiver<TimekeeperEvent>) {
    while let Some(event) = rx.recv().await {
        timekeeper.handle(event);
    }
    debug!("timekeeper task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use stopwatch_core::ManualClock;

    const T0: i64 = 1_700_000_000_000;

    struct Viewer {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl Viewer {
        fn drain(&mut self) -> Vec<ServerEvent> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn timekeeper() -> (Timekeeper, ManualClock) {
        let clock = ManualClock::new(T0);
        let keeper = Timekeeper::new(Arc::new(clock.clone()));
        (keeper, clock)
    }

    fn connect(keeper: &mut Timekeeper) -> Viewer {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        keeper.on_connect(id, tx);
        Viewer { id, rx }
    }

    #[tokio::test]
    async fn start_while_running_is_a_no_op() {
        let (mut keeper, clock) = timekeeper();
        let mut viewer = connect(&mut keeper);

        assert!(keeper.on_start());
        let before = keeper.state();
        clock.advance(500);
        assert!(!keeper.on_start());

        assert_eq!(keeper.state(), before);
        assert_eq!(
            viewer.drain(),
            vec![ServerEvent::Start {
                start_time: T0,
                accumulated: 0
            }]
        );
    }

    #[tokio::test]
    async fn stop_while_stopped_is_a_no_op() {
        let (mut keeper, _clock) = timekeeper();
        let mut viewer = connect(&mut keeper);

        assert!(!keeper.on_stop());
        assert_eq!(keeper.state(), TimerState::default());
        assert!(viewer.drain().is_empty());
    }

    #[tokio::test]
    async fn reset_always_broadcasts() {
        let (mut keeper, _clock) = timekeeper();
        let mut viewer = connect(&mut keeper);

        keeper.on_reset();
        keeper.on_reset();
        assert_eq!(viewer.drain(), vec![ServerEvent::Reset, ServerEvent::Reset]);
    }

    #[tokio::test]
    async fn stop_banks_elapsed_and_start_resumes_from_it() {
        let (mut keeper, clock) = timekeeper();
        let mut viewer = connect(&mut keeper);

        keeper.on_start();
        clock.advance(1_250);
        keeper.on_stop();
        assert_eq!(keeper.state().accumulated, 1_250);
        assert!(!keeper.state().running);

        clock.advance(10_000);
        keeper.on_start();
        let state = keeper.state();
        assert!(state.running);
        assert_eq!(state.epoch_start, Some(T0 + 11_250 - 1_250));
        clock.advance(750);
        assert_eq!(state.elapsed_at(clock.now_millis()), 2_000);

        assert_eq!(
            viewer.drain(),
            vec![
                ServerEvent::Start {
                    start_time: T0,
                    accumulated: 0
                },
                ServerEvent::Stop { stop_time: 1_250 },
                ServerEvent::Start {
                    start_time: T0 + 10_000,
                    accumulated: 1_250
                },
            ]
        );
    }

    #[tokio::test]
    async fn command_sequence_reaches_every_viewer_in_order() {
        let (mut keeper, clock) = timekeeper();
        let mut actor = connect(&mut keeper);
        let mut watcher = connect(&mut keeper);

        keeper.on_command(actor.id, ClientCommand::Start);
        clock.advance(300);
        keeper.on_command(actor.id, ClientCommand::Stop);
        clock.advance(100);
        keeper.on_command(actor.id, ClientCommand::Start);
        clock.advance(100);
        keeper.on_command(actor.id, ClientCommand::Reset);

        let expected = vec![
            ServerEvent::Start {
                start_time: T0,
                accumulated: 0,
            },
            ServerEvent::Stop { stop_time: 300 },
            ServerEvent::Start {
                start_time: T0 + 100,
                accumulated: 300,
            },
            ServerEvent::Reset,
        ];
        assert_eq!(actor.drain(), expected);
        assert_eq!(watcher.drain(), expected);
        assert_eq!(keeper.state(), TimerState::default());
    }

    #[tokio::test]
    async fn running_state_always_has_an_epoch() {
        let (mut keeper, clock) = timekeeper();
        let steps = [
            ClientCommand::Stop,
            ClientCommand::Start,
            ClientCommand::Start,
            ClientCommand::Reset,
            ClientCommand::Start,
            ClientCommand::Stop,
            ClientCommand::Stop,
        ];
        let id = ConnectionId::new();
        for step in steps {
            clock.advance(37);
            keeper.on_command(id, step);
            let state = keeper.state();
            if state.running {
                assert!(state.epoch_start.is_some());
            } else {
                let later = clock.now_millis() + 5_000;
                assert_eq!(state.elapsed_at(later), state.accumulated);
            }
        }
    }

    #[tokio::test]
    async fn late_joiner_receives_catch_up_snapshot() {
        let (mut keeper, clock) = timekeeper();
        let mut fresh = connect(&mut keeper);
        assert!(fresh.drain().is_empty());

        keeper.on_start();
        clock.advance(2_000);
        let mut running_joiner = connect(&mut keeper);
        assert_eq!(
            running_joiner.drain(),
            vec![ServerEvent::Start {
                start_time: T0,
                accumulated: 0
            }]
        );

        keeper.on_stop();
        let mut stopped_joiner = connect(&mut keeper);
        assert_eq!(
            stopped_joiner.drain(),
            vec![ServerEvent::Stop { stop_time: 2_000 }]
        );

        keeper.on_reset();
        let mut reset_joiner = connect(&mut keeper);
        assert!(reset_joiner.drain().is_empty());
    }

    #[tokio::test]
    async fn ping_is_answered_only_to_the_sender() {
        let (mut keeper, _clock) = timekeeper();
        let mut pinger = connect(&mut keeper);
        let mut other = connect(&mut keeper);

        keeper.on_command(pinger.id, ClientCommand::Ping);
        assert_eq!(pinger.drain(), vec![ServerEvent::Pong]);
        assert!(other.drain().is_empty());
        assert_eq!(keeper.state(), TimerState::default());
    }

    #[tokio::test]
    async fn dropped_viewer_does_not_block_broadcast() {
        let (mut keeper, _clock) = timekeeper();
        let gone = connect(&mut keeper);
        let mut alive = connect(&mut keeper);
        drop(gone.rx);

        keeper.on_start();
        assert_eq!(keeper.connection_count(), 1);
        assert_eq!(alive.drain().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_viewer_stays_registered_through_long_quiet_spells() {
        let clock = ManualClock::new(T0);
        let (handle, task) = spawn(Timekeeper::new(Arc::new(clock.clone())));

        let (silent_tx, mut silent_rx) = mpsc::unbounded_channel();
        let (active_tx, _active_rx) = mpsc::unbounded_channel();
        let silent = ConnectionId::new();
        let active = ConnectionId::new();
        handle.connected(silent, silent_tx).expect("connected");
        handle.connected(active, active_tx).expect("connected");

        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        clock.advance(600_000);
        handle.command(active, ClientCommand::Start).expect("start");
        handle.command(active, ClientCommand::Stop).expect("stop");

        assert!(matches!(silent_rx.recv().await, Some(ServerEvent::Start { .. })));
        assert_eq!(
            silent_rx.recv().await,
            Some(ServerEvent::Stop { stop_time: 0 })
        );
        assert_eq!(handle.snapshot().await.expect("snapshot").connections, 2);

        drop(handle);
        task.await.expect("timekeeper task");
    }

    #[tokio::test]
    async fn handle_serialises_commands_through_the_actor() {
        let clock = ManualClock::new(T0);
        let (handle, task) = spawn(Timekeeper::new(Arc::new(clock.clone())));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        handle.connected(id, tx).expect("connected");
        handle.command(id, ClientCommand::Start).expect("start");
        assert_eq!(
            rx.recv().await,
            Some(ServerEvent::Start {
                start_time: T0,
                accumulated: 0
            })
        );

        clock.advance(400);
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(snapshot.running);
        assert_eq!(snapshot.elapsed, 400);
        assert_eq!(snapshot.connections, 1);

        drop(handle);
        task.await.expect("timekeeper task");
    }
}
