//! Wall-clock sources for outbound message timestamps.
//!
//! Timestamps on the wire come from the sender, so two clients with skewed
//! machine clocks would stamp the same conversation inconsistently. At
//! startup the client asks an NTP server for the current time once, keeps
//! the measured offset, and applies it to every local reading afterwards.
//! Synchronization is best-effort: when the time server cannot be reached
//! the client falls back to the plain system clock and keeps going.

use chrono::{DateTime, Local, NaiveDateTime};
use log::{info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_DELTA: u64 = 2_208_988_800;

/// First request byte: leap indicator 0, version 3, client mode. The rest of
/// the request stays zeroed.
const SNTP_REQUEST_HEADER: u8 = 0x1B;

/// Size of both the request and a full server reply.
const SNTP_PACKET_LEN: usize = 48;

/// Byte offset of the transmit timestamp in a server reply.
const TRANSMIT_TS_OFFSET: usize = 40;

/// How long to wait for the time server before giving up on sync.
const SYNC_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("time server io: {0}")]
    Io(#[from] std::io::Error),
    #[error("time server did not reply in time")]
    Timeout,
    #[error("reply is {0} bytes, a full timestamp needs 48")]
    ShortReply(usize),
    #[error("reply carries an unusable transmit timestamp")]
    InvalidTimestamp,
}

/// Source of the wall-clock readings stamped onto outbound messages.
/// Reading the clock never fails; a source that lost sync still returns its
/// best local estimate.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's own wall clock, unadjusted.
#[derive(Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// The machine's wall clock corrected by a fixed offset measured against a
/// time server at startup. The offset is not re-measured afterwards; drift
/// over one chat session is far below the one-second wire resolution.
#[derive(Debug)]
pub struct OffsetClock {
    offset: chrono::Duration,
}

impl OffsetClock {
    pub fn new(offset: chrono::Duration) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> chrono::Duration {
        self.offset
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local() + self.offset
    }
}

/// Builds the clock the client should stamp messages with: offset-corrected
/// when the time server answers, the plain system clock otherwise. Never
/// fails; timestamps are informational and must not keep anyone out of the
/// chat.
pub async fn synchronized_clock(ntp_server: &str) -> Box<dyn Clock> {
    match fetch_network_time(ntp_server).await {
        Ok(server_now) => {
            let offset = server_now - Local::now().naive_local();
            info!(
                "Clock offset against {}: {}ms",
                ntp_server,
                offset.num_milliseconds()
            );
            Box::new(OffsetClock::new(offset))
        }
        Err(e) => {
            warn!(
                "Time sync with {} failed ({}), falling back to the local clock",
                ntp_server, e
            );
            Box::new(SystemClock)
        }
    }
}

/// One-shot SNTP exchange: send a version 3 client request, read the
/// server's transmit timestamp out of the reply.
async fn fetch_network_time(ntp_server: &str) -> Result<NaiveDateTime, TimeSyncError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(ntp_server).await?;

    let mut request = [0u8; SNTP_PACKET_LEN];
    request[0] = SNTP_REQUEST_HEADER;
    socket.send(&request).await?;

    let mut reply = [0u8; SNTP_PACKET_LEN];
    let len = timeout(SYNC_TIMEOUT, socket.recv(&mut reply))
        .await
        .map_err(|_| TimeSyncError::Timeout)??;

    transmit_time(&reply[..len])
}

/// Decodes the transmit timestamp field of a server reply into local wall
/// time. Only the integer seconds are read; the fractional word below the
/// one-second wire resolution is ignored.
fn transmit_time(reply: &[u8]) -> Result<NaiveDateTime, TimeSyncError> {
    if reply.len() < SNTP_PACKET_LEN {
        return Err(TimeSyncError::ShortReply(reply.len()));
    }

    let mut raw = [0u8; 4];
    raw.copy_from_slice(&reply[TRANSMIT_TS_OFFSET..TRANSMIT_TS_OFFSET + 4]);
    let ntp_seconds = u32::from_be_bytes(raw) as u64;

    // A zeroed or pre-1970 transmit timestamp means the server never filled
    // the field in.
    if ntp_seconds < NTP_UNIX_DELTA {
        return Err(TimeSyncError::InvalidTimestamp);
    }

    let unix_seconds = (ntp_seconds - NTP_UNIX_DELTA) as i64;
    let utc = DateTime::from_timestamp(unix_seconds, 0).ok_or(TimeSyncError::InvalidTimestamp)?;
    Ok(utc.with_timezone(&Local).naive_local())
}
