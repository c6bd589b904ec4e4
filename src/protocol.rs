use crate::state::history::HistoryEntry;
use crate::state::sequencer::SequencerPhase;
use crate::state::sync::GameStats;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// One frame on the push channel: an event name plus its payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DescriptionsUpdate {
    #[serde(default)]
    pub round: Option<RoundNumber>,
    #[serde(default)]
    pub descriptions: Vec<DescriptionEntry>,
    #[serde(default)]
    pub total: Option<usize>,
}

/// Events the dashboard reacts to on the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    StatusUpdate(PublicStatus),
    TimerUpdate(TimerUpdate),
    GameStateUpdate(GameSnapshot),
    DescriptionsUpdate(DescriptionsUpdate),
    VoteResult(VoteResult),
}

impl PushEvent {
    /// Decode a frame. Events the dashboard does not consume yield `Ok(None)`.
    pub fn from_frame(frame: PushFrame) -> Result<Option<Self>, serde_json::Error> {
        let event = match frame.event.as_str() {
            "status_update" => PushEvent::StatusUpdate(serde_json::from_value(frame.data)?),
            "timer_update" => PushEvent::TimerUpdate(serde_json::from_value(frame.data)?),
            "game_state_update" => PushEvent::GameStateUpdate(serde_json::from_value(frame.data)?),
            "descriptions_update" => {
                PushEvent::DescriptionsUpdate(serde_json::from_value(frame.data)?)
            }
            "vote_result" => PushEvent::VoteResult(serde_json::from_value(frame.data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::StatusUpdate(_) => "status_update",
            PushEvent::TimerUpdate(_) => "timer_update",
            PushEvent::GameStateUpdate(_) => "game_state_update",
            PushEvent::DescriptionsUpdate(_) => "descriptions_update",
            PushEvent::VoteResult(_) => "vote_result",
        }
    }
}

/// Response envelope used by the game server and by the operator API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: 200,
            message: message.into(),
            data,
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 200
    }
}

/// Body of the game server's start-game call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartGameRequest {
    pub undercover_word: String,
    pub civilian_word: String,
}

impl From<&WordPair> for StartGameRequest {
    fn from(words: &WordPair) -> Self {
        Self {
            undercover_word: words.undercover_word.clone(),
            civilian_word: words.civilian_word.clone(),
        }
    }
}

/// What the game server reports back after starting a game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StartGameAck {
    #[serde(default)]
    pub undercover_word: Option<String>,
    #[serde(default)]
    pub civilian_word: Option<String>,
    #[serde(default)]
    pub undercover_group: Option<GroupName>,
}

/// Operator request to configure a multi-round sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureSequenceRequest {
    pub rounds: Vec<WordPair>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Danger,
}

/// Operator-facing message (transport trouble, sequence progress, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub id: String,
    pub level: NoticeLevel,
    pub message: String,
    pub at: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            level,
            message: message.into(),
            at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Transport health as shown to the operator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConnectionStatus {
    pub push_connected: bool,
    pub last_poll_ok: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SequenceView {
    pub phase: SequencerPhase,
    pub game_number: Option<GameNumber>,
    pub current_round_index: usize,
    pub total_rounds: usize,
    pub advance_pending: bool,
}

/// Everything the display layer needs, rebuilt after every event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardView {
    pub snapshot: Option<GameSnapshot>,
    pub live_status: Option<PublicStatus>,
    pub descriptions: Vec<HistoryEntry<Vec<DescriptionEntry>>>,
    pub votes: Vec<HistoryEntry<VoteResult>>,
    pub sequence: SequenceView,
    pub stats: GameStats,
    pub connection: ConnectionStatus,
    pub notices: Vec<Notice>,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            snapshot: None,
            live_status: None,
            descriptions: Vec::new(),
            votes: Vec::new(),
            sequence: SequenceView {
                phase: SequencerPhase::Idle,
                game_number: None,
                current_round_index: 0,
                total_rounds: 0,
                advance_pending: false,
            },
            stats: GameStats::default(),
            connection: ConnectionStatus::default(),
            notices: Vec::new(),
        }
    }
}
