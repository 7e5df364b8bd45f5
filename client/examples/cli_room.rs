use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use pixelchat_client::{
    MessageKind, RoomHandle, RoomIdentity, RoomSnapshot, SessionConfig, join_room,
    spawn_connection,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "ws://127.0.0.1:3001/ws";

fn print_help() {
    println!("Commands:");
    println!("  /image <path>  - Send a picture");
    println!("  /typing <text> - Show a typing preview to the room");
    println!("  /who           - Show who is typing");
    println!("  /leave         - Leave the room and exit");
    println!("  <message>      - Send message to the room");
}

/// Print everything in `snapshot` newer than `shown` messages
fn print_new(snapshot: &RoomSnapshot, shown: &mut usize) {
    for msg in snapshot.messages.iter().skip(*shown) {
        match msg.kind {
            MessageKind::System => {
                let text = msg.text.as_deref().unwrap_or_default();
                match msg.occupancy_note() {
                    Some(note) => println!("* {} {}", text, note),
                    None => println!("* {}", text),
                }
            }
            MessageKind::Image => {
                let size = msg.image.as_ref().map(|i| i.data.len()).unwrap_or(0);
                println!("{}: [image, {} bytes base64]", snapshot.sender_label(msg), size);
            }
            MessageKind::Text => {
                println!(
                    "{}: {}",
                    snapshot.sender_label(msg),
                    msg.text.as_deref().unwrap_or_default()
                );
            }
        }
    }
    *shown = snapshot.messages.len();
}

async fn handle_input(line: &str, handle: &RoomHandle) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    if let Some(command) = line.strip_prefix('/') {
        let parts: Vec<&str> = command.splitn(2, ' ').collect();
        let cmd = parts[0];
        let arg = parts.get(1).map(|s| s.trim());

        match cmd {
            "help" => print_help(),
            "image" => {
                let Some(path) = arg else {
                    println!("Usage: /image <path>");
                    return true;
                };
                match std::fs::read(path) {
                    Ok(bytes) => {
                        if let Err(e) = handle.send_image(bytes).await {
                            println!("Error: {}", e);
                        }
                    }
                    Err(e) => println!("Cannot read {}: {}", path, e),
                }
            }
            "typing" => {
                if let Err(e) = handle.set_typing_status(arg.unwrap_or_default()) {
                    println!("Error: {}", e);
                }
            }
            "who" => {
                let snapshot = handle.snapshot();
                if snapshot.typing_users.is_empty() {
                    println!("Nobody is typing");
                }
                for peer in snapshot.typing_users.values() {
                    println!("{} is typing... {}", peer.display_name, peer.preview_text);
                }
            }
            "leave" | "quit" | "exit" => {
                if let Err(e) = handle.leave_room() {
                    println!("Error: {}", e);
                }
                return false;
            }
            _ => println!("Unknown command: /{}. Type /help for commands.", cmd),
        }
    } else {
        let sent = handle
            .send_text(line)
            .and_then(|()| handle.set_typing_status(""));
        if let Err(e) = sent {
            println!("Error: {}", e);
        }
    }

    true
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("pixelchat CLI");
    println!("=============");

    let url = std::env::var("PIXELCHAT_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let room = prompt("Room")?;
    let name = prompt("Display name")?;

    let identity = match RoomIdentity::new(room, name) {
        Ok(identity) => identity,
        Err(e) => {
            println!("{}", e);
            return Ok(());
        }
    };

    let config = SessionConfig::from_env();

    println!("\nConnecting to {}...", url);
    let (channel, socket) = spawn_connection(&url, &config).await?;
    let handle = join_room(channel, identity, config).await?;
    println!("Joined. Type /help for commands\n");

    // Print room activity as snapshots arrive
    let mut snapshots = handle.subscribe();
    tokio::spawn(async move {
        let mut shown = 0;
        let mut status = None;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if status != Some(snapshot.connection_status) {
                status = Some(snapshot.connection_status);
                println!("[{}]", snapshot.connection_status);
            }
            print_new(&snapshot, &mut shown);
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !handle_input(&line, &handle).await {
            break;
        }
    }

    handle.leave_room().ok();
    handle.closed().await;

    // Let the socket write the leave and close cleanly before exiting
    if tokio::time::timeout(Duration::from_secs(2), socket).await.is_err() {
        println!("Server did not acknowledge the close");
    }
    Ok(())
}
