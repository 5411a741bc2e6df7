//! Event loop driving one [`ClientSession`] over one [`Transport`].

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::{EntryMode, ViewEvent};
use crate::session::{ClientSession, OutboundFrame, SessionError};
use crate::transport::{Transport, TransportError};

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Commands from the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Move(String),
    ListGames,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The server closed the connection.
    ConnectionClosed,
    /// Shutdown was requested or the command channel was dropped.
    Shutdown,
    /// The view stopped listening for events.
    ViewClosed,
}

/// Runs until the connection closes, shutdown is requested or the view goes away.
///
/// The transport is expected to be connected already: entering this function is
/// the "open" event, so the match entry request is the first frame sent.
#[tracing::instrument(name = "client", skip_all, fields(client = %session.identity()))]
pub async fn run_client<T: Transport>(
    session: &mut ClientSession,
    transport: &mut T,
    mode: &EntryMode,
    mut commands: mpsc::Receiver<ClientCommand>,
    view: mpsc::UnboundedSender<ViewEvent>,
) -> Result<ExitReason, ClientError> {
    let out = session.on_open(mode)?;
    send_frame(session, transport, &view, out).await?;

    let period = (session.request_timeout() / 4).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD);
    let mut sweep = tokio::time::interval(period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        if !flush(session, &view) {
            break ExitReason::ViewClosed;
        }
        tokio::select! {
            frame = transport.recv() => match frame {
                Some(Ok(frame)) => {
                    session.on_frame(&frame);
                }
                Some(Err(err)) => {
                    tracing::error!(%err, "transport failure");
                    flush(session, &view);
                    return Err(err.into());
                }
                None => break ExitReason::ConnectionClosed,
            },
            cmd = commands.recv() => {
                let out = match cmd {
                    Some(ClientCommand::Move(player_move)) => session.submit_move(&player_move),
                    Some(ClientCommand::ListGames) => session.list_games(),
                    Some(ClientCommand::Shutdown) | None => break ExitReason::Shutdown,
                };
                match out {
                    Ok(out) => send_frame(session, transport, &view, out).await?,
                    Err(err) => {
                        tracing::warn!(%err, "command rejected");
                        if view.send(ViewEvent::CommandRejected(err.to_string())).is_err() {
                            break ExitReason::ViewClosed;
                        }
                    }
                }
            }
            _ = sweep.tick() => {
                session.expire_pending(Instant::now());
            }
        }
    };

    flush(session, &view);
    if let Err(err) = transport.close().await {
        tracing::debug!(%err, "error while closing transport");
    }
    tracing::info!(?reason, "client stopped");
    Ok(reason)
}

/// Sends one frame. On failure the request is failed locally and the view is
/// told before the error is returned.
async fn send_frame<T: Transport>(
    session: &mut ClientSession,
    transport: &mut T,
    view: &mpsc::UnboundedSender<ViewEvent>,
    out: OutboundFrame,
) -> Result<(), TransportError> {
    if let Err(err) = transport.send(out.frame).await {
        tracing::error!(%err, id = %out.id, "failed to send request");
        session.send_failed(&out.id);
        flush(session, view);
        return Err(err);
    }
    Ok(())
}

fn flush(session: &mut ClientSession, view: &mpsc::UnboundedSender<ViewEvent>) -> bool {
    session
        .drain_events()
        .into_iter()
        .all(|event| view.send(event).is_ok())
}
