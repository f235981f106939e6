//! chronoroom: shared room timers from the terminal.
//!
//! `serve` runs the in-memory timer authority; `connect` opens a session,
//! renders the joined room's timers, and turns typed commands into intents.

mod commands;
mod render;

use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use chronoroom_sync::{
    ActionError, AuthorityServer, ServerConfig, Session, SessionConfig, SessionEvent,
    SessionHandle, TimerClient, TimerId,
};
use commands::Command;

#[derive(Parser)]
#[command(name = "chronoroom", version, about = "Room-scoped shared timers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timer authority
    Serve {
        #[arg(long, env = "CHRONOROOM_BIND", default_value = "127.0.0.1:3001")]
        bind: String,
        /// Milliseconds between count advances
        #[arg(long, default_value_t = 100)]
        tick_ms: u64,
        #[arg(long, default_value_t = 256)]
        broadcast_capacity: usize,
    },
    /// Connect to an authority and drive timers interactively
    Connect {
        #[arg(long, env = "CHRONOROOM_URL", default_value = "ws://127.0.0.1:3001")]
        url: String,
        /// Room to join once connected
        #[arg(long)]
        room: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            bind,
            tick_ms,
            broadcast_capacity,
        } => {
            let config = ServerConfig {
                bind_addr: bind,
                broadcast_capacity: broadcast_capacity.max(1),
                tick_interval: Duration::from_millis(tick_ms.max(1)),
            };
            AuthorityServer::new(config).run().await
        }
        Commands::Connect { url, room } => connect(url, room).await,
    }
}

async fn connect(url: String, room: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (handle, mut events) = Session::start(SessionConfig::new(url));
    let mut client = TimerClient::new(handle);
    let mut pending_room = room;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", commands::HELP);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    info!("Session ended");
                    break;
                };
                let first_connect = event == SessionEvent::Connected;
                let redraw = match &event {
                    SessionEvent::Frame(frame) => render::redraws_on(&frame.event),
                    _ => false,
                };
                let changed = matches!(
                    client.handle_session_event(event),
                    Some(dispatch) if dispatch.is_applied()
                );
                if first_connect {
                    if let Some(room) = pending_room.take() {
                        join(&mut client, &room);
                    }
                }
                if changed && redraw {
                    println!("{}", render::room_view(client.room(), client.projection()));
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !run_line(&mut client, &line) {
                    break;
                }
            }
        }
    }

    client.channel_mut().shutdown().await;
    Ok(())
}

/// Execute one typed line. Returns `false` when the user asked to quit.
fn run_line(client: &mut TimerClient<SessionHandle>, line: &str) -> bool {
    let command = match commands::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return true,
        Err(e) => {
            println!("{e}");
            return true;
        }
    };

    let result = match command {
        Command::Join(room) => {
            join(client, &room);
            return true;
        }
        Command::Leave => client.leave_room().map_err(|e| e.to_string()),
        Command::Create => client.create_timer().map_err(|e| e.to_string()),
        Command::Start(id) => with_timer(client, &id, |c, id| c.resume(id)),
        Command::Stop(id) => with_timer(client, &id, |c, id| c.stop(id)),
        Command::Reset(id) => with_timer(client, &id, |c, id| c.reset(id)),
        Command::Delete(id) => with_timer(client, &id, |c, id| c.delete(id)),
        Command::Note { timer, text } => {
            let outcome = with_timer(client, &timer, |c, id| c.edit_note(id, text));
            if outcome.is_ok() {
                println!("{}", render::room_view(client.room(), client.projection()));
            }
            outcome
        }
        Command::List => {
            println!("{}", render::room_view(client.room(), client.projection()));
            Ok(())
        }
        Command::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        Command::Quit => return false,
    };

    if let Err(e) = result {
        println!("{e}");
    }
    if !client.channel().is_connected() {
        println!("(offline: intents are dropped until the session reconnects)");
    }
    true
}

/// Join `room`, leaving the current room first.
fn join(client: &mut TimerClient<SessionHandle>, room: &str) {
    if client.room().is_some() {
        if let Err(e) = client.leave_room() {
            println!("{e}");
        }
    }
    match client.join_room(room) {
        Ok(()) => println!("joining {room}..."),
        Err(e) => println!("{e}"),
    }
}

fn with_timer<F>(client: &mut TimerClient<SessionHandle>, typed: &str, action: F) -> Result<(), String>
where
    F: FnOnce(&mut TimerClient<SessionHandle>, &TimerId) -> Result<(), ActionError>,
{
    let timer_id = commands::resolve(client.projection(), typed).map_err(|e| e.to_string())?;
    action(client, &timer_id).map_err(|e| e.to_string())
}
