//! The message codes enumerated in the protocol table and their version-gated
//! wire shapes.
//!
//! Encoding/decoding a given [`Message`] is a function of the negotiated
//! [`ProtocolVersion`]: a handful of messages grew extra fields across minor
//! versions (see `DKDN`/`DKRP`/`DKUP`/`DMRM`/`DMWM` below). Each of those is
//! one `match` arm on `version`, not a subtype — see the module docs on why
//! this replaced the original's per-version subclass hierarchy.

use bitflags::bitflags;

use crate::{CODE_SIZE, FrameReader, FrameWriter, MessageCode, WireError};

/// Negotiated protocol version. Ordered by `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 6 };
    pub const MIN_SUPPORTED_MAJOR: u16 = 1;

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn at_least(self, major: u16, minor: u16) -> bool {
        self >= ProtocolVersion::new(major, minor)
    }
}

bitflags! {
    /// Opaque modifier bitmask forwarded verbatim between peers.
    ///
    /// The core never interprets individual bits: platform keycode and
    /// modifier tables live entirely in the `Screen` implementation. The bit
    /// positions below are placeholders reserved for that implementation to
    /// define; the wire only needs `u16` marshalling, which this newtype
    /// provides.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyModifierMask: u16 {
        const SHIFT   = 0x0001;
        const CONTROL = 0x0002;
        const ALT     = 0x0004;
        const META    = 0x0008;
        const SUPER   = 0x0010;
        const CAPS_LOCK   = 0x1000;
        const NUM_LOCK    = 0x2000;
        const SCROLL_LOCK = 0x4000;
    }
}

/// Which of the four clipboard "slots" (mirroring the original's selection
/// vs. clipboard distinction) an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipboardSlot(pub u8);

pub mod codes {
    use crate::MessageCode;

    pub const CNOP: MessageCode = *b"CNOP";
    pub const CALV: MessageCode = *b"CALV";
    pub const CIAK: MessageCode = *b"CIAK";
    pub const QINF: MessageCode = *b"QINF";
    pub const DINF: MessageCode = *b"DINF";
    pub const CINN: MessageCode = *b"CINN";
    pub const COUT: MessageCode = *b"COUT";
    pub const DKDN: MessageCode = *b"DKDN";
    pub const DKRP: MessageCode = *b"DKRP";
    pub const DKUP: MessageCode = *b"DKUP";
    pub const DMDN: MessageCode = *b"DMDN";
    pub const DMUP: MessageCode = *b"DMUP";
    pub const DMMV: MessageCode = *b"DMMV";
    pub const DMRM: MessageCode = *b"DMRM";
    pub const DMWM: MessageCode = *b"DMWM";
    pub const CCLP: MessageCode = *b"CCLP";
    pub const DCLP: MessageCode = *b"DCLP";
    pub const CSEC: MessageCode = *b"CSEC";
    pub const CROP: MessageCode = *b"CROP";
    pub const DSOP: MessageCode = *b"DSOP";
    pub const DFTR: MessageCode = *b"DFTR";
    pub const DFCR: MessageCode = *b"DFCR";
    pub const EBSY: MessageCode = *b"EBSY";
    pub const EBAD: MessageCode = *b"EBAD";
    pub const EUNK: MessageCode = *b"EUNK";
    pub const CBYE: MessageCode = *b"CBYE";
}

/// A chunk marker for `DFTR`/`DFCR` drag and file transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMark {
    Start { total_size: u64 },
    Data,
    End,
}

/// Fully parsed application message, independent of the TCP framing that
/// carries it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Nop,
    Heartbeat,
    InfoAck,
    QueryInfo,
    ScreenInfo { origin_x: i32, origin_y: i32, width: i32, height: i32, jump_zone: i32, cursor_x: i32, cursor_y: i32 },
    Enter { x: i32, y: i32, seq: u32, mask: KeyModifierMask },
    Leave,
    KeyDown { id: u16, mask: KeyModifierMask, button: u16 },
    KeyRepeat { id: u16, mask: KeyModifierMask, button: u16, count: u16 },
    KeyUp { id: u16, mask: KeyModifierMask, button: u16 },
    MouseDown { id: u8 },
    MouseUp { id: u8 },
    MouseMove { x: i32, y: i32 },
    MouseRelMove { dx: i32, dy: i32 },
    MouseWheel { dx: i32, dy: i32 },
    ClipboardGrab { slot: ClipboardSlot, seq: u32 },
    ClipboardData { slot: ClipboardSlot, seq: u32, data: Vec<u8> },
    ScreenSaver { active: bool },
    ResetOptions,
    SetOptions { raw: Vec<u8> },
    DragInfo { file_count: u16, raw: Vec<u8> },
    FileChunk { mark: ChunkMark, data: Vec<u8> },
    ErrorBusy,
    ErrorBad,
    ErrorUnknown,
    Close,
    HelloFromServer { version: ProtocolVersion },
    HelloFromClient { version: ProtocolVersion, client_name: String },
}

impl Message {
    /// Writes the 4-octet code and body fields (not the length prefix) into
    /// `buf`, choosing the field layout valid at `version`.
    pub fn encode(&self, version: ProtocolVersion, buf: &mut Vec<u8>) {
        let mut w = FrameWriter::new(buf);
        match self {
            Message::Nop => {
                w.put_code(codes::CNOP);
            }
            Message::Heartbeat => {
                w.put_code(codes::CALV);
            }
            Message::InfoAck => {
                w.put_code(codes::CIAK);
            }
            Message::QueryInfo => {
                w.put_code(codes::QINF);
            }
            Message::ScreenInfo { origin_x, origin_y, width, height, jump_zone, cursor_x, cursor_y } => {
                w.put_code(codes::DINF)
                    .put_i16(*origin_x as i16)
                    .put_i16(*origin_y as i16)
                    .put_i16(*width as i16)
                    .put_i16(*height as i16)
                    .put_i16(*jump_zone as i16)
                    .put_i16(*cursor_x as i16)
                    .put_i16(*cursor_y as i16);
            }
            Message::Enter { x, y, seq, mask } => {
                w.put_code(codes::CINN)
                    .put_i16(*x as i16)
                    .put_i16(*y as i16)
                    .put_u32(*seq)
                    .put_u16(mask.bits());
            }
            Message::Leave => {
                w.put_code(codes::COUT);
            }
            Message::KeyDown { id, mask, button } => {
                w.put_code(codes::DKDN).put_u16(*id).put_u16(mask.bits());
                if version.at_least(1, 1) {
                    w.put_u16(*button);
                }
            }
            Message::KeyRepeat { id, mask, button, count } => {
                w.put_code(codes::DKRP).put_u16(*id).put_u16(mask.bits());
                if version.at_least(1, 1) {
                    w.put_u16(*button);
                }
                if version.at_least(1, 2) {
                    w.put_u16(*count);
                }
            }
            Message::KeyUp { id, mask, button } => {
                w.put_code(codes::DKUP).put_u16(*id).put_u16(mask.bits());
                if version.at_least(1, 1) {
                    w.put_u16(*button);
                }
            }
            Message::MouseDown { id } => {
                w.put_code(codes::DMDN).put_u8(*id);
            }
            Message::MouseUp { id } => {
                w.put_code(codes::DMUP).put_u8(*id);
            }
            Message::MouseMove { x, y } => {
                w.put_code(codes::DMMV).put_i16(*x as i16).put_i16(*y as i16);
            }
            Message::MouseRelMove { dx, dy } => {
                w.put_code(codes::DMRM).put_i16(*dx as i16).put_i16(*dy as i16);
            }
            Message::MouseWheel { dx, dy } => {
                w.put_code(codes::DMWM).put_i16(*dx as i16).put_i16(*dy as i16);
            }
            Message::ClipboardGrab { slot, seq } => {
                w.put_code(codes::CCLP).put_u8(slot.0).put_u32(*seq);
            }
            Message::ClipboardData { slot, seq, data } => {
                w.put_code(codes::DCLP).put_u8(slot.0).put_u32(*seq).put_str(data);
            }
            Message::ScreenSaver { active } => {
                w.put_code(codes::CSEC).put_u8(u8::from(*active));
            }
            Message::ResetOptions => {
                w.put_code(codes::CROP);
            }
            Message::SetOptions { raw } => {
                w.put_code(codes::DSOP).put_str(raw);
            }
            Message::DragInfo { file_count, raw } => {
                w.put_code(codes::DFTR).put_u16(*file_count).put_str(raw);
            }
            Message::FileChunk { mark, data } => {
                w.put_code(codes::DFCR);
                match mark {
                    ChunkMark::Start { total_size } => {
                        w.put_u8(0).put_str(total_size.to_string().as_bytes());
                    }
                    ChunkMark::Data => {
                        w.put_u8(1).put_str(data);
                    }
                    ChunkMark::End => {
                        w.put_u8(2);
                    }
                }
            }
            Message::ErrorBusy => {
                w.put_code(codes::EBSY);
            }
            Message::ErrorBad => {
                w.put_code(codes::EBAD);
            }
            Message::ErrorUnknown => {
                w.put_code(codes::EUNK);
            }
            Message::Close => {
                w.put_code(codes::CBYE);
            }
            Message::HelloFromServer { version } => {
                buf.extend_from_slice(crate::HELLO_MAGIC);
                FrameWriter::new(buf).put_u16(version.major).put_u16(version.minor);
            }
            Message::HelloFromClient { version, client_name } => {
                buf.extend_from_slice(crate::HELLO_MAGIC);
                FrameWriter::new(buf).put_u16(version.major).put_u16(version.minor).put_str(client_name.as_bytes());
            }
        }
    }

    /// Decodes a message body that has already had its frame length stripped.
    ///
    /// `body` still contains the leading message code for every message
    /// except the handshake, which is the one frame on the wire that opens
    /// with [`crate::HELLO_MAGIC`] instead of a 4-octet code; callers detect
    /// that case before reaching here by checking the magic prefix.
    pub fn decode(code: MessageCode, body: &[u8], version: ProtocolVersion) -> Result<Message, WireError> {
        let mut r = FrameReader::new(&body[CODE_SIZE..]);
        Ok(match code {
            codes::CNOP => Message::Nop,
            codes::CALV => Message::Heartbeat,
            codes::CIAK => Message::InfoAck,
            codes::QINF => Message::QueryInfo,
            codes::DINF => Message::ScreenInfo {
                origin_x: i32::from(r.get_i16()?),
                origin_y: i32::from(r.get_i16()?),
                width: i32::from(r.get_i16()?),
                height: i32::from(r.get_i16()?),
                jump_zone: i32::from(r.get_i16()?),
                cursor_x: i32::from(r.get_i16()?),
                cursor_y: i32::from(r.get_i16()?),
            },
            codes::CINN => Message::Enter {
                x: i32::from(r.get_i16()?),
                y: i32::from(r.get_i16()?),
                seq: r.get_u32()?,
                mask: KeyModifierMask::from_bits_truncate(r.get_u16()?),
            },
            codes::COUT => Message::Leave,
            codes::DKDN => {
                let id = r.get_u16()?;
                let mask = KeyModifierMask::from_bits_truncate(r.get_u16()?);
                let button = if version.at_least(1, 1) && r.remaining() >= 2 { r.get_u16()? } else { 0 };
                Message::KeyDown { id, mask, button }
            }
            codes::DKRP => {
                let id = r.get_u16()?;
                let mask = KeyModifierMask::from_bits_truncate(r.get_u16()?);
                let button = if version.at_least(1, 1) && r.remaining() >= 2 { r.get_u16()? } else { 0 };
                let count = if version.at_least(1, 2) && r.remaining() >= 2 { r.get_u16()? } else { 1 };
                Message::KeyRepeat { id, mask, button, count }
            }
            codes::DKUP => {
                let id = r.get_u16()?;
                let mask = KeyModifierMask::from_bits_truncate(r.get_u16()?);
                let button = if version.at_least(1, 1) && r.remaining() >= 2 { r.get_u16()? } else { 0 };
                Message::KeyUp { id, mask, button }
            }
            codes::DMDN => Message::MouseDown { id: r.get_u8()? },
            codes::DMUP => Message::MouseUp { id: r.get_u8()? },
            codes::DMMV => Message::MouseMove { x: i32::from(r.get_i16()?), y: i32::from(r.get_i16()?) },
            codes::DMRM => Message::MouseRelMove { dx: i32::from(r.get_i16()?), dy: i32::from(r.get_i16()?) },
            codes::DMWM => Message::MouseWheel { dx: i32::from(r.get_i16()?), dy: i32::from(r.get_i16()?) },
            codes::CCLP => Message::ClipboardGrab { slot: ClipboardSlot(r.get_u8()?), seq: r.get_u32()? },
            codes::DCLP => Message::ClipboardData {
                slot: ClipboardSlot(r.get_u8()?),
                seq: r.get_u32()?,
                data: r.get_bytes()?.to_vec(),
            },
            codes::CSEC => Message::ScreenSaver { active: r.get_u8()? != 0 },
            codes::CROP => Message::ResetOptions,
            codes::DSOP => Message::SetOptions { raw: r.get_bytes()?.to_vec() },
            codes::DFTR => Message::DragInfo { file_count: r.get_u16()?, raw: r.get_bytes()?.to_vec() },
            codes::DFCR => {
                let mark_byte = r.get_u8()?;
                match mark_byte {
                    0 => {
                        let size_str = r.get_string()?;
                        let total_size = parse_strict_decimal(&size_str)?;
                        Message::FileChunk { mark: ChunkMark::Start { total_size }, data: Vec::new() }
                    }
                    1 => Message::FileChunk { mark: ChunkMark::Data, data: r.get_bytes()?.to_vec() },
                    2 => Message::FileChunk { mark: ChunkMark::End, data: Vec::new() },
                    other => return Err(WireError::BadChunkMark(other)),
                }
            }
            codes::EBSY => Message::ErrorBusy,
            codes::EBAD => Message::ErrorBad,
            codes::EUNK => Message::ErrorUnknown,
            codes::CBYE => Message::Close,
            other => return Err(WireError::UnknownCode(other)),
        })
    }
}

/// Validates the `mark=0` total-size string per the strict chunk grammar:
/// `^(0|[1-9][0-9]*)$`, fitting in a `u64`.
fn parse_strict_decimal(s: &str) -> Result<u64, WireError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError::BadChunkSize);
    }
    if s.len() > 1 && s.as_bytes()[0] == b'0' {
        return Err(WireError::BadChunkSize);
    }
    s.parse::<u64>().map_err(|_| WireError::BadChunkSize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message, version: ProtocolVersion) {
        let mut buf = Vec::new();
        msg.encode(version, &mut buf);
        let code: MessageCode = buf[..CODE_SIZE].try_into().unwrap();
        let decoded = Message::decode(code, &buf, version).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn key_down_roundtrips_at_every_version() {
        let msg = Message::KeyDown { id: 0x61, mask: KeyModifierMask::SHIFT, button: 0x1e };
        roundtrip(msg.clone(), ProtocolVersion::new(1, 0));
        roundtrip(msg.clone(), ProtocolVersion::new(1, 1));
        roundtrip(msg, ProtocolVersion::new(1, 6));
    }

    #[test]
    fn version_1_0_key_down_omits_button_on_the_wire() {
        let mut buf = Vec::new();
        let msg = Message::KeyDown { id: 1, mask: KeyModifierMask::empty(), button: 99 };
        msg.encode(ProtocolVersion::new(1, 0), &mut buf);
        // code(4) + id(2) + mask(2), no button field
        assert_eq!(buf.len(), 4 + 2 + 2);
    }

    #[test]
    fn clipboard_grab_roundtrips() {
        roundtrip(Message::ClipboardGrab { slot: ClipboardSlot(0), seq: 42 }, ProtocolVersion::CURRENT);
    }

    #[test]
    fn strict_chunk_size_grammar_rejects_leading_zero_and_non_digits() {
        assert!(parse_strict_decimal("007").is_err());
        assert!(parse_strict_decimal("").is_err());
        assert!(parse_strict_decimal("12a").is_err());
        assert_eq!(parse_strict_decimal("0").unwrap(), 0);
        assert_eq!(parse_strict_decimal("1024").unwrap(), 1024);
    }

    #[test]
    fn unknown_code_is_an_error_not_a_panic() {
        let err = Message::decode(*b"ZZZZ", b"ZZZZ", ProtocolVersion::CURRENT).unwrap_err();
        assert_eq!(err, WireError::UnknownCode(*b"ZZZZ"));
    }
}
