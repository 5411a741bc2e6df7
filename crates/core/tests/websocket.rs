//! A match played over a real websocket against a local server.

use std::time::Duration;

use chimera_client::{
    run_client, ClientCommand, ClientSession, ConfigArgs, ExitReason, Role, ViewEvent,
    WebSocketTransport,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use testresult::TestResult;
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Accepts one connection and plays the server half of a short match.
async fn serve_one(listener: TcpListener) -> anyhow::Result<Vec<Value>> {
    let (stream, _) = listener.accept().await?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    let mut seen = Vec::new();

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let request: Value = serde_json::from_str(msg.to_text()?)?;
        let id = request["id"].clone();
        let reply = match request["operation"].as_str() {
            Some("create-match") => {
                json!({"type": "response", "id": id, "result": {"match-id": "m42"}})
            }
            Some("game-action") => {
                let played = request["params"]["data"]["move"].clone();
                json!({"type": "response", "id": id, "result": {"move": played}})
            }
            _ => json!({
                "type": "response",
                "id": id,
                "error": {"code": -32601, "message": "No such operation"}
            }),
        };
        seen.push(request);
        ws.send(Message::Text(reply.to_string().into())).await?;
        if seen.len() == 2 {
            ws.close(None).await?;
        }
    }
    Ok(seen)
}

#[test_log::test(tokio::test)]
async fn plays_over_websocket() -> TestResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(serve_one(listener));

    let config = ConfigArgs {
        server: format!("ws://{addr}"),
        ..Default::default()
    }
    .build()?;
    let mut transport = WebSocketTransport::connect(&config.server).await?;
    let mut session = ClientSession::from_config(&config);

    let (commands, cmd_rx) = mpsc::channel(4);
    let (view_tx, mut view) = mpsc::unbounded_channel();
    let entry = config.entry.clone();
    let client = tokio::spawn(async move {
        let res = run_client(&mut session, &mut transport, &entry, cmd_rx, view_tx).await;
        (res, session)
    });

    let event = timeout(WAIT, view.recv()).await?;
    assert_eq!(
        event,
        Some(ViewEvent::MatchEstablished {
            match_id: "m42".into(),
            role: Role::Creator
        })
    );
    commands.send(ClientCommand::Move("scissors".into())).await?;
    let event = timeout(WAIT, view.recv()).await?;
    assert_eq!(
        event,
        Some(ViewEvent::MoveLogged("player1 played scissors".into()))
    );

    let (res, session) = timeout(WAIT, client).await??;
    assert_eq!(res?, ExitReason::ConnectionClosed);
    assert_eq!(session.pending_requests(), 0);

    let seen = timeout(WAIT, server).await???;
    let prefix = session.identity().to_string();
    let ids: Vec<String> = seen
        .iter()
        .filter_map(|r| r["id"].as_str().map(str::to_owned))
        .collect();
    assert_eq!(ids, [format!("{prefix}-0"), format!("{prefix}-1")]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn refuses_non_websocket_servers() -> TestResult {
    let args = ConfigArgs {
        server: "http://127.0.0.1:14200".into(),
        ..Default::default()
    };
    assert!(matches!(
        args.build(),
        Err(chimera_client::ConfigError::UnsupportedServer(_))
    ));
    Ok(())
}
