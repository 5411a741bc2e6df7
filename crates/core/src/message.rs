//! Wire messages exchanged with the game server.
//!
//! Frames are newline-free JSON objects discriminated by their `type` field.
//! Outbound frames are produced with serde; inbound frames go through
//! [`classify`], which keeps responses in their raw shape so the validator can
//! tell a conflicting response from a missing one.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::RequestId;

pub type Params = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
    /// Inbound only: a `request` frame from the server.
    #[serde(skip_serializing)]
    ServerRequest(ServerRequest),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) | Message::ServerRequest(_) => "request",
            Message::Response(_) => "response",
            Message::Notification(_) => "notification",
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Params,
}

/// A response exactly as received.
///
/// Presence of `result` and `error` is tracked by key, so `"result": null`
/// still counts as a result for the exclusivity check.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<RequestId>, error: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: None,
            error: Some(error),
        }
    }
}

/// A `request` frame sent by the server.
///
/// The server must never send one, so it is kept in whatever shape it arrived
/// in and reported, never decoded strictly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerRequest {
    pub id: Option<RequestId>,
    pub operation: Option<String>,
    pub payload: Map<String, Value>,
}

/// Unsolicited server message; every field but `type` is kept as payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedMessage {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `type` field")]
    MissingType,
    #[error("unknown message type {0}")]
    UnknownType(String),
}

pub fn parse_frame(frame: &str) -> Result<Message, MalformedMessage> {
    classify(serde_json::from_str(frame)?)
}

/// Determines the category of an inbound value.
pub fn classify(raw: Value) -> Result<Message, MalformedMessage> {
    let Value::Object(mut fields) = raw else {
        return Err(MalformedMessage::NotAnObject);
    };
    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        Some(other) => return Err(MalformedMessage::UnknownType(other.to_string())),
        None => return Err(MalformedMessage::MissingType),
    };
    match kind.as_str() {
        "request" => Ok(Message::ServerRequest(ServerRequest {
            id: fields
                .remove("id")
                .and_then(|id| serde_json::from_value::<RequestId>(id).ok()),
            operation: match fields.remove("operation") {
                Some(Value::String(op)) => Some(op),
                _ => None,
            },
            payload: fields,
        })),
        "response" => {
            // an id that is neither string nor number can never be correlated
            let id = fields
                .remove("id")
                .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
            Ok(Message::Response(Response {
                id,
                result: fields.remove("result"),
                error: fields.remove("error"),
            }))
        }
        "notification" => Ok(Message::Notification(Notification { payload: fields })),
        _ => Err(MalformedMessage::UnknownType(kind)),
    }
}

/// Error codes emitted by the server, plus the client-side codes used for
/// failures synthesized locally (timeouts and undeliverable requests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    IncorrectRequest,
    NoSuchOperation,
    IncorrectParams,
    RequestTimeout,
    NotDelivered,
    UnknownGame,
    AlreadyInMatch,
    UnknownMatch,
    DuplicatePlayer,
    IncorrectMatch,
    GameNotPlayerTurn,
    GameNoSuchAction,
    GameIncorrectActionData,
    GameIncorrectMove,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::IncorrectRequest => -32600,
            ErrorCode::NoSuchOperation => -32601,
            ErrorCode::IncorrectParams => -32602,
            ErrorCode::RequestTimeout => -32001,
            ErrorCode::NotDelivered => -32002,
            ErrorCode::UnknownGame => -40100,
            ErrorCode::AlreadyInMatch => -40101,
            ErrorCode::UnknownMatch => -40102,
            ErrorCode::DuplicatePlayer => -40103,
            ErrorCode::IncorrectMatch => -40104,
            ErrorCode::GameNotPlayerTurn => -50100,
            ErrorCode::GameNoSuchAction => -50101,
            ErrorCode::GameIncorrectActionData => -50102,
            ErrorCode::GameIncorrectMove => -50103,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        use ErrorCode::*;
        [
            ParseError,
            IncorrectRequest,
            NoSuchOperation,
            IncorrectParams,
            RequestTimeout,
            NotDelivered,
            UnknownGame,
            AlreadyInMatch,
            UnknownMatch,
            DuplicatePlayer,
            IncorrectMatch,
            GameNotPlayerTurn,
            GameNoSuchAction,
            GameIncorrectActionData,
            GameIncorrectMove,
        ]
        .into_iter()
        .find(|c| c.code() == code)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::IncorrectRequest => "Incorrect request",
            ErrorCode::NoSuchOperation => "No such operation",
            ErrorCode::IncorrectParams => "Incorrect parameters",
            ErrorCode::RequestTimeout => "Request timed out",
            ErrorCode::NotDelivered => "Request could not be sent",
            ErrorCode::UnknownGame => "Unknown game",
            ErrorCode::AlreadyInMatch => "Already in a match",
            ErrorCode::UnknownMatch => "Unknown match",
            ErrorCode::DuplicatePlayer => "Duplicate player name",
            ErrorCode::IncorrectMatch => "Incorrect match",
            ErrorCode::GameNotPlayerTurn => "Action not allowed outside player's turn",
            ErrorCode::GameNoSuchAction => "Unsupported action in game",
            ErrorCode::GameIncorrectActionData => "Incorrect data in game action",
            ErrorCode::GameIncorrectMove => "Incorrect move",
        };
        f.write_str(msg)
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn known_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    pub fn details(&self) -> Option<&str> {
        self.data.as_ref()?.get("details")?.as_str()
    }

    /// Human readable text: `data.details` when present, the message otherwise.
    pub fn describe(&self) -> &str {
        self.details().unwrap_or(&self.message)
    }
}

impl Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)?;
        if let Some(details) = self.details() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

/// Normalized terminal outcome of a correlated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Map<String, Value>),
    Failure(ErrorObject),
}
