//! Relay network layer: the single-task receive/process/sweep reactor

use crate::session_manager::{EvictionPolicy, SessionManager, UpsertOutcome};
use chrono::{Local, NaiveDateTime};
use log::{debug, error, info, warn};
use shared::{registration_ack, ChatPacket, MAX_DATAGRAM_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Bounded wait for one inbound datagram before the eviction sweep runs
/// anyway. Keeps idle relays reclaiming stale sessions.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// The relay: one UDP socket, one session table, one loop.
///
/// All session mutation happens inside the loop, so the whole server is a
/// single task and needs no locks. Interrupting the task (ctrl-c in `main`)
/// drops the server and with it the socket, on every exit path.
pub struct RelayServer {
    socket: UdpSocket,
    sessions: SessionManager,
    poll_timeout: Duration,
}

impl RelayServer {
    /// Binds the relay socket and prepares an empty session table.
    pub async fn bind(
        addr: &str,
        policy: EvictionPolicy,
        poll_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Relay listening on {}", socket.local_addr()?);

        Ok(RelayServer {
            socket,
            sessions: SessionManager::new(policy),
            poll_timeout,
        })
    }

    /// Local address of the bound socket; callers binding port 0 need it.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the reactor until the surrounding task is cancelled.
    ///
    /// Each iteration waits up to the poll timeout for one datagram,
    /// processes it if one arrived, then sweeps expired sessions. No error
    /// originating from one peer's traffic ever leaves the loop.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut buf = [0u8; MAX_DATAGRAM_LEN];

        loop {
            match timeout(self.poll_timeout, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, addr))) => self.process_datagram(&buf[..len], addr).await,
                Ok(Err(e)) => error!("Receive error on relay socket: {}", e),
                // No datagram inside the poll window; fall through to sweep.
                Err(_) => {}
            }

            self.sweep();
        }
    }

    /// Handles one inbound datagram end to end: decode, upsert, acknowledge
    /// or fan out. Malformed input is logged and dropped without touching
    /// the session table.
    async fn process_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let packet = match ChatPacket::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Discarding malformed datagram from {}: {}", addr, e);
                return;
            }
        };

        debug!(
            "{} bytes from {}: {} @ {} {:?}",
            data.len(),
            addr,
            packet.username(),
            packet.timestamp(),
            packet.message()
        );

        let now = Local::now().naive_local();
        let seen = sender_time(&packet, now);
        let outcome = self.sessions.upsert(addr, packet.username(), seen);
        self.sessions.mark_turn(addr);

        match outcome {
            UpsertOutcome::Created => {
                // The newcomer gets the one-time ack; its registration
                // datagram is not relayed to the others.
                let ack = registration_ack(packet.username());
                if let Err(e) = self.socket.send_to(&ack, addr).await {
                    error!("Failed to acknowledge {}: {}", addr, e);
                }
            }
            UpsertOutcome::Updated => self.broadcast(data, addr).await,
        }
    }

    /// Forwards the original bytes, unmodified, to every session except the
    /// sender. A failed send to one peer is logged and the fan-out
    /// continues with the rest.
    async fn broadcast(&self, data: &[u8], sender: SocketAddr) {
        for peer in self.sessions.all_except(sender) {
            if let Err(e) = self.socket.send_to(data, peer).await {
                error!("Failed to relay to {}: {}", peer, e);
            }
        }
    }

    /// Evicts sessions the policy has given up on.
    fn sweep(&mut self) {
        let now = Local::now().naive_local();
        let evicted = self.sessions.evict_expired(now);
        if !evicted.is_empty() {
            debug!("Swept {} stale session(s)", evicted.len());
        }
    }
}

/// The point in time a packet vouches for: the sender-supplied timestamp
/// when it parses, otherwise the relay's own reading so the upsert can never
/// fail on a garbled clock field.
fn sender_time(packet: &ChatPacket, fallback: NaiveDateTime) -> NaiveDateTime {
    match shared::parse_timestamp(packet.timestamp()) {
        Some(t) => t,
        None => {
            debug!(
                "Unparseable timestamp {:?} from {}; using local time",
                packet.timestamp(),
                packet.username()
            );
            fallback
        }
    }
}
