//! Drocsid line client
//!
//! Asks for a username and password, then sends every stdin line as a chat
//! line or `/command`. Server output is printed with color markers stripped.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use drocsid::{strip_markers, AuthResult, ChatClient, ClientConfig, ServerMessage};

async fn prompt(
    lines: &mut io::Lines<BufReader<io::Stdin>>,
    label: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;
    Ok(lines.next_line().await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drocsid=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    let mut client = ChatClient::connect(&config.server_addr, &config.version).await?;
    client
        .next_matching(|m| matches!(m, ServerMessage::Handshake { .. }))
        .await?;
    println!("Connected to {}", config.server_addr);

    let mut stdin = BufReader::new(io::stdin()).lines();
    loop {
        let Some(username) = prompt(&mut stdin, "Username: ").await? else {
            return Ok(());
        };
        let Some(password) = prompt(&mut stdin, "Password: ").await? else {
            return Ok(());
        };
        let result = client.login(username.trim(), password.trim()).await?;
        if result == AuthResult::Success {
            break;
        }
        if let Some(line) = client.session().render(&ServerMessage::AuthResult(result)) {
            println!("{}", strip_markers(&line));
        }
    }

    // Stdin lines go out from their own task so output keeps flowing
    let sender = client.sender();
    let input = tokio::spawn(async move {
        while let Ok(Some(line)) = stdin.next_line().await {
            if line.is_empty() {
                continue;
            }
            if let Err(e) = sender.send_line(&line).await {
                warn!("Send failed: {}", e);
                break;
            }
        }
        sender.close().await;
    });

    loop {
        match client.next_event().await {
            Ok(msg) => {
                if let Some(line) = client.session().render(&msg) {
                    println!("{}", strip_markers(&line));
                }
            }
            Err(e) => {
                debug!("Connection ended: {}", e);
                break;
            }
        }
    }
    println!("Disconnected.");
    input.abort();
    Ok(())
}
