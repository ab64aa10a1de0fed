//! The interactive chat client: one socket, a background receive task, and
//! a foreground loop that turns stdin lines into datagrams.

use crate::clock::Clock;
use log::{error, info, warn};
use shared::{
    format_timestamp, is_control_message, parse_registration_ack, ChatPacket, DecodeError,
    EncodeError, MAX_DATAGRAM_LEN, MAX_USERNAME_LEN,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Console command that leaves the chat.
pub const LEAVE_COMMAND: &str = "/quit";

/// How often the receive task re-checks the shutdown flag while idle.
const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// A datagram the relay can hand this client.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Control acknowledgment carrying the confirmed username.
    Registered(String),
    /// A chat packet relayed from some other participant.
    Chat(ChatPacket),
}

/// Sorts a received datagram into its framing. The control acknowledgment is
/// recognized by prefix before any chat decoding, so the two layouts never
/// collide.
pub fn classify(data: &[u8]) -> Result<Inbound, DecodeError> {
    if is_control_message(data) {
        if let Some(name) = parse_registration_ack(data) {
            return Ok(Inbound::Registered(name.to_string()));
        }
    }

    Ok(Inbound::Chat(ChatPacket::from_bytes(data)?))
}

pub struct ChatClient {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    username: String,
    clock: Box<dyn Clock>,
    running: Arc<AtomicBool>,
}

impl ChatClient {
    /// Binds an ephemeral local socket. The username is checked against the
    /// wire limit here so a bad one fails before anything is sent.
    pub async fn new(
        server_addr: &str,
        username: &str,
        clock: Box<dyn Clock>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        if username.len() > MAX_USERNAME_LEN {
            return Err(Box::new(EncodeError::UsernameTooLong(username.len())));
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(ChatClient {
            socket: Arc::new(socket),
            server_addr,
            username: username.to_string(),
            clock,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Announces this client to the relay. Registration is an ordinary chat
    /// datagram with an empty message; the relay answers with the control
    /// acknowledgment, which the receive task prints.
    pub async fn register(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!(
            "Registering with {} as '{}'",
            self.server_addr, self.username
        );
        self.send_message("").await
    }

    /// Stamps, encodes and sends one message.
    pub async fn send_message(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        let packet = ChatPacket::new(
            self.username.as_str(),
            format_timestamp(self.clock.now()),
            text,
        )?;

        let bytes = packet.to_bytes();
        if bytes.len() > MAX_DATAGRAM_LEN {
            warn!(
                "Message is {} bytes on the wire, receivers truncate at {}",
                bytes.len(),
                MAX_DATAGRAM_LEN
            );
        }

        self.socket.send_to(&bytes, self.server_addr).await?;
        Ok(())
    }

    /// Spawns the background task that prints whatever the relay forwards.
    /// The task polls with a short timeout so it notices the shutdown flag
    /// promptly even when the chat is quiet.
    fn spawn_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_LEN];

            while running.load(Ordering::Relaxed) {
                let received = match timeout(RECV_POLL_TIMEOUT, socket.recv_from(&mut buf)).await
                {
                    Ok(Ok((len, _))) => &buf[..len],
                    Ok(Err(e)) => {
                        error!("Error receiving packet: {}", e);
                        continue;
                    }
                    Err(_) => continue,
                };

                match classify(received) {
                    Ok(Inbound::Registered(name)) => {
                        println!("You are registered as: {}", name);
                    }
                    Ok(Inbound::Chat(packet)) => {
                        println!(
                            "[{}] {}: {}",
                            packet.timestamp(),
                            packet.username(),
                            packet.message()
                        );
                    }
                    Err(e) => warn!("Discarding malformed datagram: {}", e),
                }
            }
        })
    }

    /// Registers, then relays stdin lines until the input ends or fails,
    /// the leave command is typed, or an operator interrupt arrives.
    /// Sending and receiving run concurrently on the one socket; every exit
    /// clears the shared running flag and joins the receive task, and the
    /// socket closes when the client is dropped.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_with_input(BufReader::new(tokio::io::stdin()))
            .await
    }

    /// The send loop behind [`run`], fed by any buffered line source.
    async fn run_with_input<R>(&mut self, input: R) -> Result<(), Box<dyn std::error::Error>>
    where
        R: AsyncBufRead + Unpin,
    {
        self.register().await?;

        let receiver = self.spawn_receiver();

        println!(
            "Type a message and press enter. '{}' leaves the chat.",
            LEAVE_COMMAND
        );

        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let text = line.trim();
                            if text == LEAVE_COMMAND {
                                break;
                            }
                            if text.is_empty() {
                                continue;
                            }

                            if let Err(e) = self.send_message(text).await {
                                error!("Error sending message: {}", e);
                            }
                        }
                        // stdin closed
                        Ok(None) => break,
                        // A failed read ends the session the same way
                        // end-of-input does.
                        Err(e) => {
                            error!("Error reading input: {}", e);
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, leaving the chat");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        receiver.await?;

        info!("Left the chat");
        Ok(())
    }
}
