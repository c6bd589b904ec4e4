//! The dashboard's event loop.
//!
//! Every input (push events, poll ticks and their results, game-server
//! replies, sequencer advances, operator commands) arrives on a channel and is
//! handled to completion before the next one is taken. Network calls run in
//! spawned tasks and report back through the completion channel, so no
//! handler ever waits on the network.

use crate::client::push::Inbound;
use crate::client::{ControlResult, GameControl, StatePoller};
use crate::protocol::{DashboardView, StartGameAck};
use crate::state::persist::ClearScope;
use crate::state::sequencer::{AdvanceTicket, StartRound};
use crate::state::Dashboard;
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of an operator command: a human-readable message either way
pub type CommandResult = Result<String, String>;

/// Operator actions forwarded from the HTTP surface
#[derive(Debug)]
pub enum Command {
    ConfigureSequence {
        rounds: Vec<WordPair>,
        reply: oneshot::Sender<CommandResult>,
    },
    StartSingle {
        words: WordPair,
        reply: oneshot::Sender<CommandResult>,
    },
    StartRound {
        reply: oneshot::Sender<CommandResult>,
    },
    Reset {
        reply: oneshot::Sender<CommandResult>,
    },
    ClearAll {
        reply: oneshot::Sender<CommandResult>,
    },
}

/// Results of spawned network calls
enum Completion {
    Poll(ControlResult<GameSnapshot>),
    Started {
        start: StartRound,
        result: ControlResult<StartGameAck>,
        reply: Option<oneshot::Sender<CommandResult>>,
    },
    RoundStarted {
        result: ControlResult<()>,
        reply: oneshot::Sender<CommandResult>,
    },
    Reset {
        scope: ClearScope,
        result: ControlResult<()>,
        reply: oneshot::Sender<CommandResult>,
    },
}

/// Receiving ends the loop consumes
pub struct Inputs {
    pub commands: mpsc::Receiver<Command>,
    pub inbound: mpsc::Receiver<Inbound>,
    pub advances: mpsc::UnboundedReceiver<AdvanceTicket>,
}

pub struct Runtime {
    dashboard: Dashboard,
    control: Arc<dyn GameControl>,
    poller: Arc<dyn StatePoller>,
    poll_interval: Duration,
    view_tx: watch::Sender<DashboardView>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    poll_in_flight: bool,
}

impl Runtime {
    pub fn new(
        dashboard: Dashboard,
        control: Arc<dyn GameControl>,
        poller: Arc<dyn StatePoller>,
        poll_interval: Duration,
        view_tx: watch::Sender<DashboardView>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            dashboard,
            control,
            poller,
            poll_interval,
            view_tx,
            completions_tx,
            completions_rx,
            poll_in_flight: false,
        }
    }

    /// Run until `stop` is cancelled. Returns the final state.
    pub async fn run(mut self, mut inputs: Inputs, stop: CancellationToken) -> Dashboard {
        let mut poll_timer = tokio::time::interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.publish();
        tracing::info!(
            poll_secs = self.poll_interval.as_secs_f32(),
            "Dashboard event loop started"
        );

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = poll_timer.tick() => self.spawn_poll(),
                Some(completion) = self.completions_rx.recv() => {
                    self.on_completion(completion).await;
                }
                Some(inbound) = inputs.inbound.recv() => self.on_inbound(inbound).await,
                Some(ticket) = inputs.advances.recv() => {
                    if let Some(start) = self.dashboard.on_advance_due(ticket).await {
                        self.spawn_start(start, None);
                    }
                }
                Some(command) = inputs.commands.recv() => self.on_command(command).await,
            }

            self.publish();
        }

        tracing::info!("Dashboard event loop stopped");
        self.dashboard
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.dashboard.view());
    }

    async fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Push(event) => self.dashboard.handle_push(event).await,
            Inbound::Connected => self.dashboard.on_push_connection(true, None),
            Inbound::Disconnected(reason) => {
                self.dashboard.on_push_connection(false, Some(reason))
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::ConfigureSequence { rounds, reply } => {
                match self.dashboard.configure_sequence(rounds).await {
                    Ok(start) => self.spawn_start(start, Some(reply)),
                    Err(e) => {
                        let _ = reply.send(Err(e.to_string()));
                    }
                }
            }
            Command::StartSingle { words, reply } => {
                let start = self.dashboard.start_single(words).await;
                self.spawn_start(start, Some(reply));
            }
            Command::StartRound { reply } => self.spawn_round_start(reply),
            Command::Reset { reply } => self.request_reset(ClearScope::GameData, reply),
            Command::ClearAll { reply } => self.request_reset(ClearScope::Everything, reply),
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Poll(result) => {
                self.poll_in_flight = false;
                self.dashboard.on_poll_result(result).await;
            }
            Completion::Started {
                start,
                result,
                reply,
            } => {
                self.dashboard.on_start_result(&start, &result);
                if let Some(reply) = reply {
                    let _ = reply.send(start_reply(&start, result));
                }
            }
            Completion::RoundStarted { result, reply } => {
                self.dashboard.on_round_start_result(&result);
                let _ = reply.send(
                    result
                        .map(|_| "Round started".to_string())
                        .map_err(|e| e.to_string()),
                );
            }
            Completion::Reset {
                scope,
                result,
                reply,
            } => {
                self.dashboard.on_reset_result(scope, &result).await;
                let message = match scope {
                    ClearScope::GameData => "Game reset",
                    ClearScope::Everything => "All data cleared",
                };
                let _ = reply.send(
                    result
                        .map(|_| message.to_string())
                        .map_err(|e| e.to_string()),
                );
            }
        }
    }

    fn spawn_poll(&mut self) {
        if self.poll_in_flight {
            tracing::debug!("Previous poll still running, skipping tick");
            return;
        }
        self.poll_in_flight = true;

        let poller = self.poller.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = poller.fetch_state().await;
            let _ = tx.send(Completion::Poll(result));
        });
    }

    fn spawn_start(&self, start: StartRound, reply: Option<oneshot::Sender<CommandResult>>) {
        tracing::info!(
            game_number = ?start.game_number,
            first = start.is_first_round_of_sequence,
            "Starting game"
        );

        let control = self.control.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = control.start_game(&start.words).await;
            let _ = tx.send(Completion::Started {
                start,
                result,
                reply,
            });
        });
    }

    fn spawn_round_start(&self, reply: oneshot::Sender<CommandResult>) {
        tracing::info!("Starting next round");

        let control = self.control.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = control.start_round().await;
            let _ = tx.send(Completion::RoundStarted { result, reply });
        });
    }

    /// Hold any scheduled advance before the server call goes out
    fn request_reset(&mut self, scope: ClearScope, reply: oneshot::Sender<CommandResult>) {
        self.dashboard.begin_reset(scope);
        self.spawn_reset(scope, reply);
    }

    fn spawn_reset(&self, scope: ClearScope, reply: oneshot::Sender<CommandResult>) {
        tracing::info!(?scope, "Requesting reset from game server");

        let control = self.control.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = match scope {
                ClearScope::GameData => control.reset().await,
                ClearScope::Everything => control.clear_all().await,
            };
            let _ = tx.send(Completion::Reset {
                scope,
                result,
                reply,
            });
        });
    }
}

fn start_reply(start: &StartRound, result: ControlResult<StartGameAck>) -> CommandResult {
    match result {
        Ok(ack) => {
            let mut message = match start.game_number {
                Some(game_number) => format!("Game {} started", game_number),
                None => "Game started".to_string(),
            };
            if let Some(group) = ack.undercover_group {
                message.push_str(&format!(", undercover: {}", group));
            }
            Ok(message)
        }
        Err(e) => Err(e.to_string()),
    }
}
