use chimera_client::{
    lifecycle::MatchEvent, run_client, ClientCommand, ClientSession, ConfigArgs, ExitReason,
    ViewEvent, WebSocketTransport,
};
use clap::Parser;
use tokio::sync::mpsc;

/// Plays rock-paper-scissors against another player through a Chimera server.
///
/// Type a move and press enter to play it. `/games` lists the games offered by
/// the server and `/quit` leaves.
#[derive(clap::Parser)]
struct Args {
    #[clap(flatten)]
    config: ConfigArgs,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.config.build()?;
    chimera_client::tracing::init_tracer(Some(config.log_level))?;

    let mut transport = WebSocketTransport::connect(&config.server).await?;
    let mut session = ClientSession::from_config(&config);
    tracing::info!(
        client = %session.identity(),
        player = session.lifecycle().player_name(),
        entry = ?config.entry,
        "connected to {}",
        config.server
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (view_tx, view_rx) = mpsc::unbounded_channel();

    let stdin_tx = cmd_tx.clone();
    std::thread::spawn(move || read_commands(stdin_tx));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down on ctrl-c...");
            let _ = cmd_tx.send(ClientCommand::Shutdown).await;
        }
    });
    let view = tokio::spawn(render(view_rx));

    let reason = run_client(&mut session, &mut transport, &config.entry, cmd_rx, view_tx).await;
    view.await?;

    match reason? {
        ExitReason::ConnectionClosed => println!("the server closed the connection"),
        ExitReason::Shutdown | ExitReason::ViewClosed => {}
    }
    let lifecycle = session.close();
    if let Some(winner) = lifecycle.session().winner() {
        println!("winner: {winner}");
    }
    Ok(())
}

/// Reads commands on a dedicated thread; blocking stdin reads must not keep the
/// runtime from shutting down.
fn read_commands(commands: mpsc::Sender<ClientCommand>) {
    for line in std::io::stdin().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(%err, "failed reading stdin");
                break;
            }
        };
        let cmd = match line.trim() {
            "" => continue,
            "/games" => ClientCommand::ListGames,
            "/quit" => ClientCommand::Shutdown,
            player_move => ClientCommand::Move(player_move.to_owned()),
        };
        if commands.blocking_send(cmd).is_err() {
            return;
        }
    }
    // stdin closed: let the client wind down
    let _ = commands.blocking_send(ClientCommand::Shutdown);
}

async fn render(mut events: mpsc::UnboundedReceiver<ViewEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ViewEvent::MatchEstablished { match_id, role } => {
                println!("match {match_id} established ({role:?})");
            }
            ViewEvent::MoveLogged(text) => println!("> {text}"),
            ViewEvent::ErrorLogged(text) => println!("! {text}"),
            ViewEvent::Alert(text) => {
                eprintln!();
                eprintln!("*** {text} ***");
                eprintln!();
            }
            ViewEvent::MatchUpdate {
                event,
                status,
                game_state,
                winner,
            } => {
                let status = status.as_deref().unwrap_or("unknown");
                match event {
                    MatchEvent::Start => println!("match started ({status})"),
                    MatchEvent::End => match winner {
                        Some(winner) => println!("match over, {winner} wins"),
                        None => println!("match over ({status})"),
                    },
                    MatchEvent::Update | MatchEvent::Other(_) => {
                        println!("match {status}");
                    }
                }
                if let Some(state) = game_state {
                    println!("  state: {state}");
                }
            }
            ViewEvent::GamesListed(games) => {
                for game in games {
                    println!("  {}: {}", game.id, game.description);
                }
            }
            ViewEvent::CommandRejected(reason) => println!("? {reason}"),
        }
    }
}
