//! Assembles `DFCR` chunk sequences (`mark=0` start, `mark=1` data, `mark=2`
//! end) into one contiguous payload.
//!
//! A malformed `mark=0` size string is rejected at the wire layer
//! ([`switchlink_wire::WireError::BadChunkSize`]) and propagates out of
//! [`crate::Connection::on_frame`] as a fatal error for the whole connection
//! — that's not this type's concern. What this type does guard against is a
//! well-formed but out-of-sequence chunk (data or end with no prior start):
//! the original treats that as a protocol warning, not a reason to tear down
//! the connection, so chunks arriving with nothing to append to are logged
//! and dropped rather than surfaced as an error.

use switchlink_wire::message::ChunkMark;
use tracing::warn;

use crate::ProtoError;

struct Transfer {
    total_size: u64,
    received: Vec<u8>,
}

/// Per-connection file/drag transfer assembly state. One transfer is active
/// at a time; starting a new one implicitly abandons whatever was in
/// progress, matching the original's single `m_file` buffer per stream.
#[derive(Default)]
pub struct FileTransferAssembler {
    transfer: Option<Transfer>,
}

impl FileTransferAssembler {
    /// Feeds one chunk. Returns `Some(data)` once `mark=2` completes a
    /// transfer that was actually started.
    pub fn on_chunk(&mut self, mark: ChunkMark, data: Vec<u8>) -> Result<Option<Vec<u8>>, ProtoError> {
        match mark {
            ChunkMark::Start { total_size } => {
                self.transfer = Some(Transfer { total_size, received: Vec::new() });
                Ok(None)
            }
            ChunkMark::Data => {
                match &mut self.transfer {
                    Some(t) => {
                        t.received.extend_from_slice(&data);
                        if t.received.len() as u64 > t.total_size {
                            warn!(
                                total_size = t.total_size,
                                received = t.received.len(),
                                "switchlink-proto: file transfer exceeded its declared size, discarding"
                            );
                            self.transfer = None;
                        }
                        Ok(None)
                    }
                    None => {
                        warn!("switchlink-proto: file chunk data with no transfer in progress, discarding");
                        Ok(None)
                    }
                }
            }
            ChunkMark::End => match self.transfer.take() {
                Some(t) => Ok(Some(t.received)),
                None => {
                    warn!("switchlink-proto: file chunk end with no transfer in progress, discarding");
                    Ok(None)
                }
            },
        }
    }

    /// Drops any in-progress transfer. Called on disconnect and on fatal
    /// protocol errors: partial transfers are never handed to the caller.
    pub fn discard(&mut self) {
        self.transfer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_start_data_end_into_one_buffer() {
        let mut a = FileTransferAssembler::default();
        assert_eq!(a.on_chunk(ChunkMark::Start { total_size: 10 }, Vec::new()).unwrap(), None);
        assert_eq!(a.on_chunk(ChunkMark::Data, b"hello".to_vec()).unwrap(), None);
        assert_eq!(a.on_chunk(ChunkMark::Data, b"world".to_vec()).unwrap(), None);
        assert_eq!(a.on_chunk(ChunkMark::End, Vec::new()).unwrap(), Some(b"helloworld".to_vec()));
    }

    #[test]
    fn end_with_no_start_is_discarded_not_an_error() {
        let mut a = FileTransferAssembler::default();
        assert_eq!(a.on_chunk(ChunkMark::End, Vec::new()).unwrap(), None);
    }

    #[test]
    fn data_with_no_start_is_discarded_not_an_error() {
        let mut a = FileTransferAssembler::default();
        assert_eq!(a.on_chunk(ChunkMark::Data, b"orphan".to_vec()).unwrap(), None);
    }

    #[test]
    fn discard_drops_partial_transfer() {
        let mut a = FileTransferAssembler::default();
        a.on_chunk(ChunkMark::Start { total_size: 100 }, Vec::new()).unwrap();
        a.on_chunk(ChunkMark::Data, b"partial".to_vec()).unwrap();
        a.discard();
        assert_eq!(a.on_chunk(ChunkMark::End, Vec::new()).unwrap(), None);
    }

    #[test]
    fn oversized_transfer_is_discarded() {
        let mut a = FileTransferAssembler::default();
        a.on_chunk(ChunkMark::Start { total_size: 2 }, Vec::new()).unwrap();
        a.on_chunk(ChunkMark::Data, b"way too long".to_vec()).unwrap();
        assert_eq!(a.on_chunk(ChunkMark::End, Vec::new()).unwrap(), None);
    }
}
