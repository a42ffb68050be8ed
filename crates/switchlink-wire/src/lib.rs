//! Wire data model: message codes, the typed field marshaller, and the
//! version-gated message enum exchanged between a server and its clients.
//!
//! Byte order is big-endian throughout. Strings are length-prefixed octet
//! sequences, never NUL-terminated.

mod cursor;
pub mod message;

pub use cursor::{FrameReader, FrameWriter};
pub use message::{ClipboardSlot, KeyModifierMask, Message, ProtocolVersion};

use thiserror::Error;

/// Octets identifying this protocol family at the start of the handshake,
/// followed by `u16` major, `u16` minor.
///
/// The upstream Barrier/Synergy wire protocol uses its own product name here;
/// this implementation uses a distinct literal of the same structural role,
/// a deliberate substitution rather than an unresolved ambiguity.
pub const HELLO_MAGIC: &[u8] = b"SwitchLink";

/// Size in bytes of the big-endian frame length prefix.
pub const LEN_HEADER_SIZE: usize = core::mem::size_of::<u32>();
/// Size in bytes of the 4-octet ASCII message code that opens every frame
/// payload (handshake frames are the only ones without one; see
/// [`Message::HelloFromServer`]/[`Message::HelloFromClient`]).
pub const CODE_SIZE: usize = 4;

/// A 4-octet ASCII message code, e.g. `*b"CALV"`.
pub type MessageCode = [u8; CODE_SIZE];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame shorter than its declared length")]
    Truncated,
    #[error("string field exceeds {0} bytes")]
    StringTooLong(usize),
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
    #[error("unrecognised message code {0:?}")]
    UnknownCode(MessageCode),
    #[error("message code {code:?} is not valid at protocol {major}.{minor}")]
    UnsupportedAtVersion { code: MessageCode, major: u16, minor: u16 },
    #[error("malformed file chunk marker {0}")]
    BadChunkMark(u8),
    #[error("file chunk size field is not a well-formed decimal integer")]
    BadChunkSize,
}

/// Upper bound on a single string field, guarding against a hostile peer
/// declaring an absurd length and forcing an unbounded allocation.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;
