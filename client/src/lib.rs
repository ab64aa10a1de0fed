//! # Chat Client Library
//!
//! Client side of the UDP chat relay: it registers with the relay, stamps
//! and sends the lines the user types, and prints whatever other
//! participants say.
//!
//! ## Architecture Overview
//!
//! The client runs two concurrent halves over a single UDP socket:
//!
//! ### Foreground Send Loop
//! Reads stdin line by line, stamps each line with the current wall-clock
//! reading, encodes it into the shared wire layout and sends it to the
//! relay. A leave command ends the session.
//!
//! ### Background Receive Task
//! Polls the same socket and prints every forwarded packet as
//! `[timestamp] username: message`. It also recognizes the relay's
//! registration acknowledgment, which does not follow the chat layout.
//!
//! ### Time Synchronization
//! Message timestamps come from the sender, so the client measures its
//! clock offset against an NTP server once at startup. When the time server
//! is unreachable the client quietly falls back to the local clock; a chat
//! session never fails over timestamps.
//!
//! ## Module Organization
//!
//! ### Clock Module (`clock`)
//! Wall-clock sources: the plain system clock, the offset-corrected clock,
//! and the one-shot SNTP exchange that picks between them.
//!
//! ### Network Module (`network`)
//! Socket management, registration, the send path and the receive task.

pub mod clock;
pub mod network;
