//! Response validation and routing of inbound messages.

use std::fmt::Display;

use serde_json::Value;

use crate::correlation::CorrelationTable;
use crate::identity::RequestId;
use crate::message::{ErrorObject, Message, Notification, Outcome, Response, ServerRequest};

/// Why a response was rejected without running any continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidResponse {
    MissingId,
    ResultErrorConflict,
    ResultErrorMissing,
    UnknownId,
    /// `result` is not a mapping, or `error` is not `{code, message, data?}`.
    MalformedOutcome,
}

impl Display for InvalidResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            InvalidResponse::MissingId => "response has no id",
            InvalidResponse::ResultErrorConflict => "response has both result and error",
            InvalidResponse::ResultErrorMissing => "response has neither result nor error",
            InvalidResponse::UnknownId => "response id is not awaiting an answer",
            InvalidResponse::MalformedOutcome => "response result or error is malformed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid { id: RequestId, outcome: Outcome },
    Invalid {
        id: Option<RequestId>,
        reason: InvalidResponse,
    },
}

/// Checks, in order: id present, exactly one of result/error, id awaiting an answer,
/// outcome well formed.
///
/// Does not touch the table; removal is up to [`dispatch`].
pub fn validate_response<C>(response: Response, table: &CorrelationTable<C>) -> Validation {
    let Some(id) = response.id else {
        return Validation::Invalid {
            id: None,
            reason: InvalidResponse::MissingId,
        };
    };
    let invalid = |id, reason| Validation::Invalid {
        id: Some(id),
        reason,
    };
    let member = match (response.result, response.error) {
        (Some(_), Some(_)) => return invalid(id, InvalidResponse::ResultErrorConflict),
        (None, None) => return invalid(id, InvalidResponse::ResultErrorMissing),
        (Some(result), None) => Ok(result),
        (None, Some(error)) => Err(error),
    };
    if !table.contains(&id) {
        return invalid(id, InvalidResponse::UnknownId);
    }
    let outcome = match member {
        Ok(Value::Object(result)) => Outcome::Success(result),
        Ok(_) => return invalid(id, InvalidResponse::MalformedOutcome),
        Err(error) => match serde_json::from_value::<ErrorObject>(error) {
            Ok(error) => Outcome::Failure(error),
            Err(_) => return invalid(id, InvalidResponse::MalformedOutcome),
        },
    };
    Validation::Valid { id, outcome }
}

/// Receiver of everything the dispatcher routes.
pub trait ResponseHandler {
    type Continuation;

    /// Runs a continuation; called at most once per registered id.
    fn resume(&mut self, id: RequestId, continuation: Self::Continuation, outcome: Outcome);

    fn notify(&mut self, notification: Notification);

    /// The server sent a request, which it must never do on this connection.
    /// Called for every `request` frame, whatever its shape.
    fn protocol_violation(&mut self, request: ServerRequest);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Resumed(RequestId),
    Notified,
    ProtocolViolation,
    Rejected {
        id: Option<RequestId>,
        reason: InvalidResponse,
        /// Whether an outstanding entry was purged because of the rejection.
        purged: bool,
    },
}

pub fn dispatch<H: ResponseHandler>(
    table: &mut CorrelationTable<H::Continuation>,
    message: Message,
    handler: &mut H,
) -> Dispatched {
    match message {
        Message::Notification(notification) => {
            tracing::debug!(payload = ?notification.payload, "notification received");
            handler.notify(notification);
            Dispatched::Notified
        }
        Message::ServerRequest(request) => {
            tracing::error!(
                id = request.id.as_ref().map(RequestId::as_str),
                operation = request.operation.as_deref(),
                "server sent a request to the client"
            );
            handler.protocol_violation(request);
            Dispatched::ProtocolViolation
        }
        Message::Request(request) => {
            // only ever built locally for sending
            tracing::error!(id = %request.id, "outbound request routed to the dispatcher");
            Dispatched::ProtocolViolation
        }
        Message::Response(response) => {
            let raw = if tracing::enabled!(tracing::Level::WARN) {
                serde_json::to_string(&response).unwrap_or_default()
            } else {
                String::new()
            };
            match validate_response(response, table) {
                Validation::Valid { id, outcome } => match table.take(&id) {
                    Some(continuation) => {
                        handler.resume(id.clone(), continuation, outcome);
                        Dispatched::Resumed(id)
                    }
                    None => reject(table, Some(id), InvalidResponse::UnknownId, &raw),
                },
                Validation::Invalid { id, reason } => reject(table, id, reason, &raw),
            }
        }
    }
}

fn reject<C>(
    table: &mut CorrelationTable<C>,
    id: Option<RequestId>,
    reason: InvalidResponse,
    raw: &str,
) -> Dispatched {
    // an invalid answer is still terminal for a known id
    let purged = id.as_ref().and_then(|id| table.take(id)).is_some();
    tracing::warn!(
        id = id.as_ref().map(RequestId::as_str),
        ?reason,
        purged,
        response = raw,
        "dropping response: {reason}"
    );
    if cfg!(debug_assertions) {
        tracing::debug!(outstanding = ?table.outstanding(), "correlation table");
    }
    Dispatched::Rejected { id, reason, purged }
}
