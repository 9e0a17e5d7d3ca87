//! Server network layer handling WebSocket connections and event coordination

use crate::config::ServerConfig;
use crate::connection_index::ConnectionId;
use crate::reconnection::ReconnectTimeout;
use crate::router::{Dispatch, EventRouter};
use crate::store::GameStore;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEvent, ServerEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Messages sent from connection tasks to the coordinator loop
#[derive(Debug)]
pub enum ServerMessage {
    ClientConnected {
        connection_id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    },
    EventReceived {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    MalformedMessage {
        connection_id: ConnectionId,
        reason: String,
    },
    ClientDisconnected {
        connection_id: ConnectionId,
    },
    Shutdown,
}

/// Main server: accepts sockets and runs the single coordinator loop that owns the router
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    router: EventRouter,
    timeouts: mpsc::UnboundedReceiver<ReconnectTimeout>,
    peers: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        config: ServerConfig,
        store: Arc<dyn GameStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (router, timeouts) = EventRouter::new(store, config.grace_period);
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            config,
            router,
            timeouts,
            peers: HashMap::new(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender that stops the coordinator loop when given `ServerMessage::Shutdown`.
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that accepts sockets and hands each one its own connection task
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut next_connection_id: ConnectionId = 1;

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let connection_id = next_connection_id;
                        next_connection_id = next_connection_id.wrapping_add(1);
                        tokio::spawn(Self::handle_connection(
                            stream,
                            addr,
                            connection_id,
                            server_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Runs one socket: upgrades it, forwards parsed events, and reports the disconnect
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        connection_id: ConnectionId,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
    ) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        if server_tx
            .send(ServerMessage::ClientConnected {
                connection_id,
                addr,
                sender: out_tx,
            })
            .is_err()
        {
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("Failed to write to connection {}: {}", connection_id, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(frame) = ws_rx.next().await {
            let message = match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => ServerMessage::EventReceived {
                        connection_id,
                        event,
                    },
                    Err(e) => ServerMessage::MalformedMessage {
                        connection_id,
                        reason: e.to_string(),
                    },
                },
                Ok(Message::Binary(_)) => ServerMessage::MalformedMessage {
                    connection_id,
                    reason: "binary frames are not supported".to_string(),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Connection {} read error: {}", connection_id, e);
                    break;
                }
            };

            if server_tx.send(message).is_err() {
                break;
            }
        }

        let _ = server_tx.send(ServerMessage::ClientDisconnected { connection_id });
        // The writer finishes once the coordinator drops this connection's sender.
        let _ = writer.await;
    }

    /// Serializes and queues each dispatch on its connection's writer
    fn deliver(&self, dispatches: Vec<Dispatch>) {
        for Dispatch { to, event } in dispatches {
            let Some(sender) = self.peers.get(&to) else {
                debug!("Dropping event for closed connection {}", to);
                continue;
            };

            match serde_json::to_string(&event) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).is_err() {
                        debug!("Connection {} writer already gone", to);
                    }
                }
                Err(e) => error!("Failed to serialize event for {}: {}", to, e),
            }
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::ClientConnected {
                connection_id,
                addr,
                sender,
            } => {
                info!("Connection {} opened from {}", connection_id, addr);
                self.peers.insert(connection_id, sender);
            }
            ServerMessage::EventReceived {
                connection_id,
                event,
            } => {
                let dispatches = self.router.handle_event(connection_id, event).await;
                self.deliver(dispatches);
            }
            ServerMessage::MalformedMessage {
                connection_id,
                reason,
            } => {
                warn!("Malformed message from connection {}: {}", connection_id, reason);
                self.deliver(vec![Dispatch {
                    to: connection_id,
                    event: ServerEvent::error("InvalidRequest", "Invalid message"),
                }]);
            }
            ServerMessage::ClientDisconnected { connection_id } => {
                info!("Connection {} closed", connection_id);
                self.peers.remove(&connection_id);
                self.router.handle_disconnect(connection_id);
            }
            ServerMessage::Shutdown => return false,
        }
        true
    }

    /// Main server loop coordinating all operations
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.spawn_acceptor();

        let mut sweep = interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    let keep_running = match message {
                        Some(message) => self.handle_message(message).await,
                        None => false,
                    };
                    if !keep_running {
                        info!("Server shutting down");
                        break;
                    }
                },

                Some(timeout) = self.timeouts.recv() => {
                    let dispatches = self.router.handle_timeout(timeout).await;
                    self.deliver(dispatches);
                },

                _ = sweep.tick() => {
                    let evicted = self.router.evict_idle_sessions(self.config.session_ttl);
                    if evicted > 0 {
                        debug!("{} sessions remain after sweep", self.router.sessions().len());
                    }
                },
            }
        }

        Ok(())
    }
}
