use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("wire framing error: {0}")]
    Wire(#[from] switchlink_wire::WireError),
    #[error("clipboard payload error: {0}")]
    Clipboard(#[from] switchlink_clipboard::ClipboardError),
    #[error("received {code:?} in state {state}, which is not valid there")]
    UnexpectedMessage { code: [u8; 4], state: &'static str },
    #[error("handshake magic mismatch")]
    BadHandshakeMagic,
    #[error("peer's protocol major version {0} is below the minimum supported")]
    UnsupportedMajorVersion(u16),
    #[error("local screen info was never set before the peer requested it")]
    LocalInfoNotSet,
}
