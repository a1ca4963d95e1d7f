//! TCP connection handler
//!
//! Handles individual client connections: registration with the ChatServer,
//! the frame read loop, the outbound writer and the coalescing flush loop.
//! Teardown always runs here, after the loops stop, so no loop ever waits on
//! itself.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionSettings, ServerConfig};
use crate::connection::{Connection, ConnectionStatus, FrameReader};
use crate::error::{AppError, FramingError, SessionError};
use crate::message::{ClientMessage, ServerMessage};
use crate::server::{ChatServer, ServerCommand};
use crate::store::UserStore;
use crate::types::UserId;
use crate::user::UserHandle;

/// Channel buffer size for server commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Start the ChatServer actor and accept connections forever
pub async fn serve(listener: TcpListener, config: ServerConfig, store: Arc<dyn UserStore>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let server = ChatServer::new(cmd_rx, store, config.version.clone());
    tokio::spawn(server.run());

    let settings = config.connection_settings();
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {}", addr);
                let cmd_tx = cmd_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, settings).await {
                        warn!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection
///
/// Registers with the ChatServer, runs the connection's loops until any of
/// them stops or the server closes the user, then reports the disconnect.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    settings: ConnectionSettings,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    // Small batched frames; don't wait on Nagle
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let (reader, writer) = stream.into_split();
    let status = Arc::new(ConnectionStatus::new());
    let connection = Arc::new(Connection::with_status(writer, Arc::clone(&status)));

    let user_id = UserId::new();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(settings.outbound_queue);
    let (reply_tx, reply_rx) = oneshot::channel();

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            user_id,
            peer: peer_addr.clone(),
            handle: UserHandle::new(msg_tx, Arc::clone(&status)),
            reply: reply_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register {} - server closed", peer_addr);
        return Err(AppError::ChannelSend);
    }
    match reply_rx.await {
        Ok(true) => {}
        Ok(false) => {
            connection.shutdown().await;
            return Err(AppError::ServerFull);
        }
        Err(_) => return Err(AppError::ChannelSend),
    }

    let flush_task = tokio::spawn(Arc::clone(&connection).run_write_loop(settings.flush_interval));

    // Spawn write task (ServerMessage -> outbound buffer)
    let write_conn = Arc::clone(&connection);
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match write_conn.send(&msg, msg.flushes_immediately()).await {
                Ok(()) => {}
                // Nothing of the message reached the buffer; the connection stays usable
                Err(SessionError::Framing(FramingError::MessageTooLarge { kind })) => {
                    warn!("Dropped oversized message of kind {} for {}", kind, user_id);
                }
                Err(e) => {
                    debug!("Write task for {} failed: {}", user_id, e);
                    break;
                }
            }
        }
        debug!("Write task ended for {}", user_id);
    });

    // Spawn read task (frames -> ServerCommand)
    let cmd_tx_read = cmd_tx.clone();
    let mut read_task = tokio::spawn(async move {
        let mut frames = FrameReader::new(reader);
        loop {
            match frames.next_message::<ClientMessage>().await {
                Ok(message) => {
                    if cmd_tx_read
                        .send(ServerCommand::Message { user_id, message })
                        .await
                        .is_err()
                    {
                        debug!("Server closed, ending read task for {}", user_id);
                        break;
                    }
                }
                Err(SessionError::Transport(e))
                    if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset) =>
                {
                    debug!("{} hung up", user_id);
                    break;
                }
                Err(e) => {
                    warn!("Read loop error for {}: {}", user_id, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to complete or the server to close the user
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", user_id);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", user_id);
        }
        _ = status.closed() => {
            debug!("Connection {} closed", user_id);
        }
    }

    connection.close();
    read_task.abort();
    write_task.abort();
    flush_task.abort();

    // Send disconnect command
    let _ = cmd_tx.send(ServerCommand::Disconnect { user_id }).await;
    connection.shutdown().await;

    info!("Connection from {} finished", peer_addr);

    Ok(())
}
