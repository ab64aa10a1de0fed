//! Wire protocol shared by the relay server and the chat client.
//!
//! Chat datagram layout, which both sides must agree on byte-for-byte:
//!
//! `[1 byte: N = username length][N bytes: username, UTF-8]`
//! `[19 bytes: "YYYY-MM-DD HH:MM:SS"][remaining bytes: message, UTF-8]`
//!
//! The message may be empty; a registration datagram is exactly that. The
//! one other framing on the wire is the control acknowledgment
//! `"REGISTERED <username>"`, sent server-to-client once per new session and
//! never relayed. It does not follow the chat layout, so receivers peek with
//! [`is_control_message`] before attempting [`ChatPacket::from_bytes`].

use chrono::NaiveDateTime;
use thiserror::Error;

/// Port the relay listens on unless overridden.
pub const DEFAULT_PORT: u16 = 9001;

/// Receive buffer size on both sides. Datagrams longer than this are
/// truncated by the transport; the shortened payload then decodes as a
/// clipped message or fails framing. Known limitation of one-datagram
/// framing, not corrected here.
pub const MAX_DATAGRAM_LEN: usize = 4096;

/// The username length must fit the one-byte prefix.
pub const MAX_USERNAME_LEN: usize = 255;

/// Byte length of the fixed-format timestamp field.
pub const TIMESTAMP_LEN: usize = 19;

/// chrono format string producing exactly [`TIMESTAMP_LEN`] bytes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reserved token plus the single separating space.
const CONTROL_PREFIX: &[u8] = b"REGISTERED ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("username is {0} bytes, the one-byte length prefix holds at most 255")]
    UsernameTooLong(usize),
    #[error("timestamp must be exactly 19 bytes once formatted, got {0}")]
    TimestampLength(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram truncated: header declares at least {required} bytes, got {actual}")]
    Truncated { required: usize, actual: usize },
    #[error("{field} bytes are not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}

/// One chat datagram. Immutable once constructed; both constructors uphold
/// the layout invariants, so [`ChatPacket::to_bytes`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPacket {
    username: String,
    timestamp: String,
    message: String,
}

impl ChatPacket {
    /// Builds a packet, rejecting fields the layout cannot carry.
    pub fn new(
        username: impl Into<String>,
        timestamp: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<Self, EncodeError> {
        let username = username.into();
        let timestamp = timestamp.into();
        let message = message.into();

        if username.len() > MAX_USERNAME_LEN {
            return Err(EncodeError::UsernameTooLong(username.len()));
        }
        if timestamp.len() != TIMESTAMP_LEN {
            return Err(EncodeError::TimestampLength(timestamp.len()));
        }

        Ok(Self {
            username,
            timestamp,
            message,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Encodes to the wire layout. Total length is
    /// `1 + username.len() + 19 + message.len()`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(1 + self.username.len() + TIMESTAMP_LEN + self.message.len());
        out.push(self.username.len() as u8);
        out.extend_from_slice(self.username.as_bytes());
        out.extend_from_slice(self.timestamp.as_bytes());
        out.extend_from_slice(self.message.as_bytes());
        out
    }

    /// Decodes a received datagram. The length prefix is read as an unsigned
    /// byte. Fails with [`DecodeError::Truncated`] when the buffer is shorter
    /// than `1 + N + 19` and with [`DecodeError::InvalidUtf8`] when any text
    /// field holds invalid sequences. The timestamp pattern itself is not
    /// validated here; consumers parse it leniently.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let name_len = *data.first().ok_or(DecodeError::Truncated {
            required: 1 + TIMESTAMP_LEN,
            actual: 0,
        })? as usize;

        let required = 1 + name_len + TIMESTAMP_LEN;
        if data.len() < required {
            return Err(DecodeError::Truncated {
                required,
                actual: data.len(),
            });
        }

        let username = text_field(&data[1..1 + name_len], "username")?;
        let timestamp = text_field(&data[1 + name_len..required], "timestamp")?;
        let message = text_field(&data[required..], "message")?;

        Ok(Self {
            username,
            timestamp,
            message,
        })
    }
}

fn text_field(bytes: &[u8], field: &'static str) -> Result<String, DecodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8 { field })
}

/// True when the datagram is a control acknowledgment rather than a chat
/// packet. Deliberately independent of [`ChatPacket::from_bytes`] so the two
/// framings never collide in receive paths.
pub fn is_control_message(data: &[u8]) -> bool {
    data.starts_with(CONTROL_PREFIX)
}

/// Builds the `"REGISTERED <username>"` acknowledgment sent once to a newly
/// registered address.
pub fn registration_ack(username: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(CONTROL_PREFIX.len() + username.len());
    out.extend_from_slice(CONTROL_PREFIX);
    out.extend_from_slice(username.as_bytes());
    out
}

/// Extracts the username a control acknowledgment confirms, or `None` when
/// the datagram is not a well-formed acknowledgment.
pub fn parse_registration_ack(data: &[u8]) -> Option<&str> {
    let rest = data.strip_prefix(CONTROL_PREFIX)?;
    std::str::from_utf8(rest).ok()
}

/// Renders a wall-clock reading as the fixed 19-byte wire text.
pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses the wire timestamp text back into a wall-clock value. Returns
/// `None` for anything that does not match the pattern; the relay falls back
/// to its own clock in that case.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}
