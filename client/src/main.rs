use clap::{Parser, Subcommand};
use client::identity::{generate_id, ClientIdentity};
use client::network::{GameClient, RestoreOutcome, RESTORE_WAIT};
use log::info;
use shared::{normalize_code, Player, ServerEvent};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the coordinator
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// File holding the client id and remembered session
    #[arg(short = 'i', long, default_value = ".lobby-client")]
    identity: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a game and administer it
    Create {
        code: String,
        #[arg(short, long, default_value = "10")]
        max_players: usize,
        #[arg(short, long, default_values_t = vec!["Cafeteria".to_string(), "Electrical".to_string(), "Reactor".to_string()])]
        rooms: Vec<String>,
    },
    /// Join a game as a player
    Join { code: String, name: String },
    /// Check whether a game exists
    Verify { code: String },
    /// End a game
    End { code: String },
    /// Get back into the remembered game and print its events
    Restore,
}

fn print_event(event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Unprintable event: {}", e),
    }
}

async fn watch(client: &mut GameClient) -> Result<(), Box<dyn std::error::Error>> {
    while let Some(event) = client.next_event().await? {
        print_event(&event);
        if matches!(event, ServerEvent::GameEnded { .. }) {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let mut identity = ClientIdentity::load_or_create(&args.identity)?;

    info!("Connecting to {} as {}", args.server, identity.client_id);
    let mut client = GameClient::connect(&args.server, identity.client_id.clone()).await?;

    match args.command {
        Command::Create {
            code,
            max_players,
            rooms,
        } => {
            let created = client.create_game(&code, max_players, rooms).await?;
            print_event(&created);
            identity.remember_admin(&normalize_code(&code));
            identity.save(&args.identity)?;
            watch(&mut client).await?;
        }
        Command::Join { code, name } => {
            let player = Player::new(generate_id(&mut rand::thread_rng()), name);
            let joined = client.join_game(&code, player.clone()).await?;
            print_event(&joined);
            identity.remember_player(&normalize_code(&code), &player.id);
            identity.save(&args.identity)?;
            watch(&mut client).await?;
        }
        Command::Verify { code } => {
            let exists = client.verify_game(&code).await?;
            println!("{}", if exists { "exists" } else { "not found" });
        }
        Command::End { code } => {
            client.end_game(&code).await?;
            if let Some(event) = client.next_event_within(RESTORE_WAIT).await? {
                print_event(&event);
            }
            identity.forget_session();
            identity.save(&args.identity)?;
        }
        Command::Restore => {
            let outcome = client.restore_session(&mut identity).await?;
            identity.save(&args.identity)?;
            match outcome {
                RestoreOutcome::NoSession => println!("no remembered session"),
                RestoreOutcome::GameGone => println!("remembered game has ended"),
                RestoreOutcome::Rejoined(state) => {
                    print_event(&state);
                    watch(&mut client).await?;
                }
                RestoreOutcome::Admin | RestoreOutcome::Registered => {
                    watch(&mut client).await?;
                }
            }
        }
    }

    Ok(())
}
