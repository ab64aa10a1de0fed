//! # Chat Relay Server Library
//!
//! This library implements the central relay of the UDP chat system. Every
//! client sends its datagrams here; the relay registers the sender, forwards
//! the bytes verbatim to every other known client, and retires clients that
//! stop participating.
//!
//! ## Core Responsibilities
//!
//! ### Session Lifecycle
//! UDP carries no connection state, so the relay keeps its own: a table of
//! sessions keyed by peer address. First contact creates a session and earns
//! a one-time `REGISTERED` acknowledgment; every later datagram refreshes
//! the session; a configurable eviction policy removes the ones that go
//! quiet.
//!
//! ### Broadcast Fan-Out
//! Relayed datagrams are forwarded byte-for-byte: the relay never rewrites
//! a message, it only decides who receives it. The sender is always
//! excluded from its own fan-out, and a failed send to one peer never costs
//! the others their copy.
//!
//! ### Containment
//! Malformed datagrams, socket-level receive errors, and per-peer send
//! failures are logged and absorbed. Nothing a client puts on the wire can
//! take the relay down; only an operator interrupt stops it.
//!
//! ## Architecture
//!
//! The server is a single-threaded reactor: one task, one socket, one loop.
//! Each iteration polls the socket under a bounded timeout, processes at
//! most one datagram, then sweeps expired sessions, so eviction proceeds
//! even when no traffic arrives. Because every mutation of the session
//! table happens inside that loop, the registry needs no locking.
//!
//! ## Module Organization
//!
//! ### Session Manager (`session_manager`)
//! The address-keyed session table and the eviction policies (idle time
//! threshold, or the historical missed-turns counter).
//!
//! ### Network (`network`)
//! The relay reactor itself: socket I/O, decode, acknowledge, fan out,
//! sweep.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{RelayServer, DEFAULT_POLL_TIMEOUT};
//! use server::session_manager::EvictionPolicy;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut relay = RelayServer::bind(
//!         "0.0.0.0:9001",
//!         EvictionPolicy::default(),
//!         DEFAULT_POLL_TIMEOUT,
//!     )
//!     .await?;
//!
//!     relay.run().await
//! }
//! ```

pub mod network;
pub mod session_manager;
