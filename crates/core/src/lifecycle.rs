//! Match lifecycle: create/join/spectate a match, then exchange moves.
//!
//! ```text
//! Idle -> AwaitingCreateOrJoin -> MatchEstablished <-> AwaitingMoveResult
//! ```
//!
//! Requests are described as [`OutgoingRequest`]s; the owning session stamps and
//! registers them. Responses come back through [`ResponseHandler::resume`] with
//! the [`PendingOperation`] that was registered for them.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::dispatch::ResponseHandler;
use crate::identity::RequestId;
use crate::message::{ErrorObject, Notification, Outcome, Params, ServerRequest};
use crate::session::SessionError;

pub const DEFAULT_GAME: &str = "rockpaperscissors";

pub mod operation {
    pub const CREATE_MATCH: &str = "create-match";
    pub const JOIN_MATCH: &str = "join-match";
    pub const SPECTATE_MATCH: &str = "spectate-match";
    pub const GAME_ACTION: &str = "game-action";
    pub const LIST_GAMES: &str = "list-games";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(String);

impl MatchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MatchId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for MatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Unset,
    Creator,
    Joiner,
    Spectator,
}

/// How the client enters a match once the transport is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EntryMode {
    #[default]
    Create,
    Join(MatchId),
    Spectate(MatchId),
}

impl EntryMode {
    pub fn role(&self) -> Role {
        match self {
            EntryMode::Create => Role::Creator,
            EntryMode::Join(_) => Role::Joiner,
            EntryMode::Spectate(_) => Role::Spectator,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    AwaitingCreateOrJoin,
    MatchEstablished,
    AwaitingMoveResult,
}

/// The match this client takes part in. Only [`MatchLifecycle`] writes it.
#[derive(Debug, Clone, Default)]
pub struct MatchSession {
    match_id: Option<MatchId>,
    role: Role,
    status: Option<String>,
    game_state: Option<Value>,
    winner: Option<String>,
}

impl MatchSession {
    pub fn match_id(&self) -> Option<&MatchId> {
        self.match_id.as_ref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Latest `match-status` reported by a notification.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn game_state(&self) -> Option<&Value> {
        self.game_state.as_ref()
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }
}

/// What must happen when the response to a request arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    CreateMatch,
    JoinMatch { match_id: MatchId },
    SpectateMatch { match_id: MatchId },
    GameAction { player_move: String },
    ListGames,
}

impl PendingOperation {
    pub fn operation(&self) -> &'static str {
        match self {
            PendingOperation::CreateMatch => operation::CREATE_MATCH,
            PendingOperation::JoinMatch { .. } => operation::JOIN_MATCH,
            PendingOperation::SpectateMatch { .. } => operation::SPECTATE_MATCH,
            PendingOperation::GameAction { .. } => operation::GAME_ACTION,
            PendingOperation::ListGames => operation::LIST_GAMES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub params: Params,
    pub continuation: PendingOperation,
}

impl OutgoingRequest {
    pub fn operation(&self) -> &'static str {
        self.continuation.operation()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameInfo {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Start,
    Update,
    End,
    Other(String),
}

impl From<&str> for MatchEvent {
    fn from(value: &str) -> Self {
        match value {
            "start" => MatchEvent::Start,
            "update" => MatchEvent::Update,
            "end" => MatchEvent::End,
            other => MatchEvent::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Everything the view layer needs to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    MatchEstablished { match_id: MatchId, role: Role },
    MoveLogged(String),
    ErrorLogged(String),
    /// Blocking, user-facing alert.
    Alert(String),
    MatchUpdate {
        event: MatchEvent,
        status: Option<String>,
        game_state: Option<Value>,
        winner: Option<String>,
    },
    GamesListed(Vec<GameInfo>),
    /// A local command could not be turned into a request.
    CommandRejected(String),
}

#[derive(Debug)]
pub struct MatchLifecycle {
    game: String,
    player_name: String,
    state: MatchState,
    session: MatchSession,
    moves_in_flight: usize,
    move_log: Vec<LogEntry>,
    error_log: Vec<LogEntry>,
    events: Vec<ViewEvent>,
}

impl MatchLifecycle {
    pub fn new(game: impl Into<String>, player_name: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            player_name: player_name.into(),
            state: MatchState::Idle,
            session: MatchSession::default(),
            moves_in_flight: 0,
            move_log: Vec::new(),
            error_log: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn session(&self) -> &MatchSession {
        &self.session
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    pub fn move_log(&self) -> &[LogEntry] {
        &self.move_log
    }

    pub fn error_log(&self) -> &[LogEntry] {
        &self.error_log
    }

    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }

    /// Builds the single create/join/spectate request sent on transport open.
    pub fn open(&mut self, mode: &EntryMode) -> Result<OutgoingRequest, SessionError> {
        if self.state != MatchState::Idle {
            return Err(SessionError::AlreadyOpened);
        }
        let mut params = Params::new();
        params.insert("game".into(), json!(self.game));
        let continuation = match mode {
            EntryMode::Create => PendingOperation::CreateMatch,
            EntryMode::Join(match_id) => {
                params.insert("match-id".into(), json!(match_id));
                PendingOperation::JoinMatch {
                    match_id: match_id.clone(),
                }
            }
            EntryMode::Spectate(match_id) => {
                params.insert("match-id".into(), json!(match_id));
                PendingOperation::SpectateMatch {
                    match_id: match_id.clone(),
                }
            }
        };
        params.insert("player-name".into(), json!(self.player_name));
        self.state = MatchState::AwaitingCreateOrJoin;
        tracing::info!(operation = continuation.operation(), game = %self.game, "entering match");
        Ok(OutgoingRequest {
            params,
            continuation,
        })
    }

    pub fn submit_move(&mut self, player_move: &str) -> Result<OutgoingRequest, SessionError> {
        let player_move = player_move.trim();
        let match_id = match (&self.session.match_id, self.state) {
            (Some(id), MatchState::MatchEstablished | MatchState::AwaitingMoveResult) => id,
            _ => return Err(SessionError::NoMatch),
        };
        if self.session.role == Role::Spectator {
            return Err(SessionError::Spectating);
        }
        if player_move.is_empty() {
            return Err(SessionError::EmptyMove);
        }
        let mut params = Params::new();
        params.insert("match-id".into(), json!(match_id));
        params.insert("action".into(), json!("move"));
        params.insert("data".into(), json!({ "move": player_move }));

        self.moves_in_flight += 1;
        self.state = MatchState::AwaitingMoveResult;
        Ok(OutgoingRequest {
            params,
            continuation: PendingOperation::GameAction {
                player_move: player_move.to_owned(),
            },
        })
    }

    pub fn list_games(&self) -> OutgoingRequest {
        OutgoingRequest {
            params: Params::new(),
            continuation: PendingOperation::ListGames,
        }
    }

    fn establish(&mut self, match_id: MatchId, role: Role) {
        if let Some(current) = &self.session.match_id {
            tracing::warn!(%current, ignored = %match_id, "match already established");
            return;
        }
        tracing::info!(%match_id, ?role, "match established");
        self.session.match_id = Some(match_id.clone());
        self.session.role = role;
        self.state = MatchState::MatchEstablished;
        self.events.push(ViewEvent::MatchEstablished { match_id, role });
    }

    fn finish_move(&mut self) {
        self.moves_in_flight = self.moves_in_flight.saturating_sub(1);
        if self.moves_in_flight == 0 && self.state == MatchState::AwaitingMoveResult {
            self.state = MatchState::MatchEstablished;
        }
    }

    fn log_move(&mut self, text: String) {
        self.move_log.push(LogEntry {
            at: Utc::now(),
            text: text.clone(),
        });
        self.events.push(ViewEvent::MoveLogged(text));
    }

    fn log_error(&mut self, text: String) {
        self.error_log.push(LogEntry {
            at: Utc::now(),
            text: text.clone(),
        });
        self.events.push(ViewEvent::ErrorLogged(text));
    }

    fn application_error(&mut self, id: &RequestId, op: &PendingOperation, error: &ErrorObject) {
        tracing::warn!(
            %id,
            operation = op.operation(),
            code = error.code,
            known = ?error.known_code(),
            "request failed: {error}"
        );
        self.log_error(error.describe().to_owned());
    }

    fn on_success(&mut self, id: &RequestId, op: PendingOperation, result: Map<String, Value>) {
        match op {
            PendingOperation::CreateMatch => {
                match result.get("match-id").and_then(Value::as_str) {
                    Some(match_id) => self.establish(match_id.into(), Role::Creator),
                    None => {
                        tracing::warn!(%id, ?result, "create-match result has no match-id");
                        self.log_error("malformed create-match response: missing 'match-id'".into());
                    }
                }
            }
            PendingOperation::JoinMatch { match_id } => self.establish(match_id, Role::Joiner),
            PendingOperation::SpectateMatch { match_id } => {
                self.establish(match_id, Role::Spectator)
            }
            PendingOperation::GameAction { player_move } => {
                self.finish_move();
                let applied = result
                    .get("move")
                    .and_then(Value::as_str)
                    .unwrap_or(&player_move);
                let text = format!("{} played {applied}", self.player_name);
                self.log_move(text);
            }
            PendingOperation::ListGames => {
                let games = result
                    .get("games")
                    .cloned()
                    .map(serde_json::from_value::<Vec<GameInfo>>);
                match games {
                    Some(Ok(games)) => self.events.push(ViewEvent::GamesListed(games)),
                    _ => {
                        tracing::warn!(%id, ?result, "list-games result has no valid games");
                        self.log_error("malformed list-games response".into());
                    }
                }
            }
        }
    }
}

impl ResponseHandler for MatchLifecycle {
    type Continuation = PendingOperation;

    fn resume(&mut self, id: RequestId, continuation: PendingOperation, outcome: Outcome) {
        tracing::debug!(%id, operation = continuation.operation(), "response received");
        match outcome {
            Outcome::Success(result) => self.on_success(&id, continuation, result),
            Outcome::Failure(error) => {
                if matches!(continuation, PendingOperation::GameAction { .. }) {
                    self.finish_move();
                }
                self.application_error(&id, &continuation, &error);
            }
        }
    }

    fn notify(&mut self, notification: Notification) {
        let payload = &notification.payload;
        let scope = payload.get("scope").and_then(Value::as_str);
        let event = payload.get("event").and_then(Value::as_str);
        let data = payload.get("data").and_then(Value::as_object);
        let (Some("match"), Some(event), Some(data)) = (scope, event, data) else {
            tracing::debug!(?payload, "ignoring notification outside the match scope");
            return;
        };
        let ours = match (&self.session.match_id, data.get("match-id")) {
            (Some(ours), Some(Value::String(theirs))) => ours.as_str() == theirs,
            _ => false,
        };
        if !ours {
            tracing::debug!(?payload, "ignoring notification for another match");
            return;
        }

        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_owned);
        let status = text("match-status");
        let winner = text("match-winner");
        let game_state = data.get("game-state").cloned();
        let event = MatchEvent::from(event);
        tracing::info!(?event, ?status, ?winner, "match notification");

        if status.is_some() {
            self.session.status.clone_from(&status);
        }
        if game_state.is_some() {
            self.session.game_state.clone_from(&game_state);
        }
        if winner.is_some() {
            self.session.winner.clone_from(&winner);
        }
        self.events.push(ViewEvent::MatchUpdate {
            event,
            status,
            game_state,
            winner,
        });
    }

    fn protocol_violation(&mut self, request: ServerRequest) {
        let operation = request.operation.as_deref().unwrap_or("<none>");
        let id = request.id.as_ref().map_or("<none>", RequestId::as_str);
        self.events.push(ViewEvent::Alert(format!(
            "the server sent a request to this client (operation '{operation}', id {id}); \
             this is a server bug"
        )));
    }
}
