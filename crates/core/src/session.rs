//! The per-connection client session.
//!
//! Owns the sequence allocator, the correlation table and the match lifecycle
//! for the lifetime of one connection. All methods run on the single task that
//! drives the connection, so registration before sending and removal on receipt
//! never race.

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::correlation::{CorrelationError, CorrelationTable};
use crate::dispatch::{self, Dispatched, ResponseHandler};
use crate::identity::{ClientIdentity, RequestId, SequenceAllocator, SequenceExhausted};
use crate::lifecycle::{EntryMode, MatchLifecycle, OutgoingRequest, PendingOperation, ViewEvent};
use crate::message::{self, ErrorCode, ErrorObject, Message, Outcome, Request};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("the connection is not open yet")]
    NotOpen,
    #[error("the session was already opened")]
    AlreadyOpened,
    #[error("no match has been established yet")]
    NoMatch,
    #[error("spectators cannot submit moves")]
    Spectating,
    #[error("a move cannot be empty")]
    EmptyMove,
    #[error(transparent)]
    Sequence(#[from] SequenceExhausted),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A serialized request whose continuation is already registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub id: RequestId,
    pub frame: String,
}

#[derive(Debug)]
pub struct ClientSession {
    sequence: SequenceAllocator,
    pending: CorrelationTable<PendingOperation>,
    lifecycle: MatchLifecycle,
    request_timeout: Duration,
    open: bool,
}

impl ClientSession {
    pub fn new(
        identity: ClientIdentity,
        lifecycle: MatchLifecycle,
        request_timeout: Duration,
    ) -> Self {
        tracing::debug!(%identity, "client session created");
        Self {
            sequence: SequenceAllocator::new(identity),
            pending: CorrelationTable::new(),
            lifecycle,
            request_timeout,
            open: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ClientIdentity::allocate(),
            MatchLifecycle::new(config.game.clone(), config.player_name.clone()),
            config.request_timeout,
        )
    }

    pub fn identity(&self) -> &ClientIdentity {
        self.sequence.identity()
    }

    pub fn lifecycle(&self) -> &MatchLifecycle {
        &self.lifecycle
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Reacts to the transport "open" event with the match entry request.
    pub fn on_open(&mut self, mode: &EntryMode) -> Result<OutboundFrame, SessionError> {
        if self.open {
            return Err(SessionError::AlreadyOpened);
        }
        let request = self.lifecycle.open(mode)?;
        self.open = true;
        self.stamp(request)
    }

    pub fn submit_move(&mut self, player_move: &str) -> Result<OutboundFrame, SessionError> {
        if !self.open {
            return Err(SessionError::NotOpen);
        }
        let request = self.lifecycle.submit_move(player_move)?;
        self.stamp(request)
    }

    pub fn list_games(&mut self) -> Result<OutboundFrame, SessionError> {
        if !self.open {
            return Err(SessionError::NotOpen);
        }
        let request = self.lifecycle.list_games();
        self.stamp(request)
    }

    fn stamp(&mut self, request: OutgoingRequest) -> Result<OutboundFrame, SessionError> {
        let id = self.sequence.next_request_id()?;
        let frame = Message::Request(Request {
            id: id.clone(),
            operation: request.operation().to_owned(),
            params: request.params,
        })
        .to_frame()?;
        self.pending.register(id.clone(), request.continuation)?;
        tracing::debug!(%id, %frame, "request registered");
        Ok(OutboundFrame { id, frame })
    }

    /// Handles one inbound text frame. Malformed frames are logged and dropped.
    pub fn on_frame(&mut self, frame: &str) -> Option<Dispatched> {
        match message::parse_frame(frame) {
            Ok(msg) => Some(self.on_message(msg)),
            Err(err) => {
                tracing::warn!(%err, frame, "dropping malformed frame");
                None
            }
        }
    }

    pub fn on_message(&mut self, msg: Message) -> Dispatched {
        dispatch::dispatch(&mut self.pending, msg, &mut self.lifecycle)
    }

    /// The transport refused a frame produced by this session; the server will
    /// never answer it, so its continuation fails now.
    pub fn send_failed(&mut self, id: &RequestId) {
        if let Some(continuation) = self.pending.take(id) {
            tracing::warn!(%id, "request could not be sent");
            self.lifecycle.resume(
                id.clone(),
                continuation,
                Outcome::Failure(ErrorObject::new(
                    ErrorCode::NotDelivered,
                    "request could not be sent",
                )),
            );
        }
    }

    /// Fails every request that has waited longer than the request timeout.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.pending.expire(now, self.request_timeout);
        let count = expired.len();
        for (id, continuation) in expired {
            tracing::warn!(%id, operation = continuation.operation(), "request timed out");
            self.lifecycle.resume(
                id,
                continuation,
                Outcome::Failure(ErrorObject::new(
                    ErrorCode::RequestTimeout,
                    "request timed out",
                )),
            );
        }
        count
    }

    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        self.lifecycle.drain_events()
    }

    /// Tears the session down, returning the lifecycle for inspection.
    pub fn close(self) -> MatchLifecycle {
        if !self.pending.is_empty() {
            tracing::info!(
                outstanding = self.pending.len(),
                "closing session with unanswered requests"
            );
        }
        self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InvalidResponse;
    use crate::lifecycle::{MatchState, DEFAULT_GAME};
    use serde_json::{json, Value};

    fn session() -> ClientSession {
        ClientSession::new(
            ClientIdentity::from("c1"),
            MatchLifecycle::new(DEFAULT_GAME, "player1"),
            Duration::from_secs(10),
        )
    }

    #[test_log::test]
    fn scenario_create_then_rejected_move() {
        let mut s = session();
        assert!(matches!(s.submit_move("rock"), Err(SessionError::NotOpen)));

        let out = s.on_open(&EntryMode::Create).unwrap();
        assert_eq!(out.id.as_str(), "c1-0");
        assert_eq!(
            serde_json::from_str::<Value>(&out.frame).unwrap(),
            json!({
                "type": "request",
                "id": "c1-0",
                "operation": "create-match",
                "params": {"game": "rockpaperscissors", "player-name": "player1"}
            })
        );
        assert_eq!(s.pending_requests(), 1);

        s.on_frame(r#"{"type":"response","id":"c1-0","result":{"match-id":"m42"}}"#);
        assert_eq!(s.lifecycle().state(), MatchState::MatchEstablished);
        assert_eq!(s.lifecycle().session().match_id().unwrap().as_str(), "m42");

        let out = s.submit_move("rock").unwrap();
        assert_eq!(out.id.as_str(), "c1-1");
        s.on_frame(
            r#"{"type":"response","id":"c1-1","error":{"code":400,"message":"not your turn"}}"#,
        );
        assert_eq!(s.lifecycle().error_log()[0].text, "not your turn");
        assert!(s.lifecycle().move_log().is_empty());
        assert_eq!(s.pending_requests(), 0);
    }

    #[test_log::test]
    fn garbage_never_reaches_the_logs() {
        let mut s = session();
        s.on_open(&EntryMode::Create).unwrap();
        s.drain_events();

        assert_eq!(s.on_frame("not json"), None);
        assert_eq!(s.on_frame(r#"{"type":"bogus"}"#), None);
        let out = s.on_frame(r#"{"type":"response","id":"c1-99","result":{}}"#);
        assert!(matches!(
            out,
            Some(Dispatched::Rejected {
                reason: InvalidResponse::UnknownId,
                ..
            })
        ));
        assert!(s.drain_events().is_empty());
        assert!(s.lifecycle().error_log().is_empty());
        assert!(s.lifecycle().move_log().is_empty());
        assert_eq!(s.pending_requests(), 1);
    }

    #[test_log::test]
    fn server_request_raises_alert() {
        let mut s = session();
        s.on_frame(r#"{"type":"request","id":"x-0","operation":"game-action"}"#);
        assert!(matches!(&s.drain_events()[..], [ViewEvent::Alert(_)]));
    }

    #[test_log::test]
    fn server_request_without_id_still_alerts() {
        let mut s = session();
        s.on_open(&EntryMode::Create).unwrap();
        s.drain_events();

        let out = s.on_frame(r#"{"type":"request","operation":"game-action"}"#);
        assert_eq!(out, Some(Dispatched::ProtocolViolation));
        let events = s.drain_events();
        assert!(
            matches!(&events[..], [ViewEvent::Alert(text)] if text.contains("game-action")),
            "{events:?}"
        );
        // the outstanding create is untouched
        assert_eq!(s.pending_requests(), 1);
    }

    #[test_log::test]
    fn opening_twice_is_refused() {
        let mut s = session();
        s.on_open(&EntryMode::Create).unwrap();
        assert!(matches!(
            s.on_open(&EntryMode::Create),
            Err(SessionError::AlreadyOpened)
        ));
        assert_eq!(s.pending_requests(), 1);
    }

    #[test_log::test]
    fn timeouts_fail_each_request_once() {
        let mut s = session();
        let out = s.on_open(&EntryMode::Create).unwrap();
        s.drain_events();

        assert_eq!(s.expire_pending(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(s.expire_pending(later), 1);
        assert_eq!(s.expire_pending(later), 0);
        assert_eq!(s.lifecycle().error_log()[0].text, "request timed out");

        // a late answer is now just an unknown id
        let late = format!(
            r#"{{"type":"response","id":"{}","result":{{"match-id":"m1"}}}}"#,
            out.id
        );
        assert!(matches!(
            s.on_frame(&late),
            Some(Dispatched::Rejected {
                reason: InvalidResponse::UnknownId,
                ..
            })
        ));
        assert_eq!(s.lifecycle().state(), MatchState::AwaitingCreateOrJoin);
    }

    #[test_log::test]
    fn failed_send_purges_entry() {
        let mut s = session();
        let out = s.on_open(&EntryMode::Create).unwrap();
        s.send_failed(&out.id);
        assert_eq!(s.pending_requests(), 0);
        assert_eq!(
            s.drain_events(),
            vec![ViewEvent::ErrorLogged("request could not be sent".into())]
        );
        // purging twice is harmless
        s.send_failed(&out.id);
        assert!(s.drain_events().is_empty());
    }

    #[test_log::test]
    fn list_games_requires_open_connection() {
        let mut s = session();
        assert!(matches!(s.list_games(), Err(SessionError::NotOpen)));
        s.on_open(&EntryMode::Spectate("m1".into())).unwrap();
        let out = s.list_games().unwrap();
        assert_eq!(out.id.as_str(), "c1-1");
        assert_eq!(s.pending_requests(), 2);
    }
}
