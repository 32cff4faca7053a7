//! Splitting of large encoded messages into MESSAGE_PART frames, and the
//! receiving side that stitches them back together.
//!
//! # How chunking works (for beginners)
//!
//! A clipboard image or a long file list can be far larger than one socket
//! read.  Instead of sending one giant frame, the sender encodes the message
//! normally, then cuts the resulting bytes into slices and wraps every slice
//! in its own MESSAGE_PART frame:
//!
//! ```text
//! encoded message (N bytes) ──► [part 1][part 2] ... [part k]
//!                                  │
//!                                  └─ header id = transfer id (same for all parts)
//!                                     body     = [total N][slice]
//! ```
//!
//! The receiver appends slices per transfer id until it has `N` bytes, then
//! decodes the buffer as if it had arrived in one frame.  The inner message
//! keeps its own id, so request/response matching is unaffected.

use std::collections::HashMap;

use uuid::Uuid;

use crate::protocol::codec::{encode_message, ProtocolError};
use crate::protocol::messages::{Envelope, MessagePartMessage, ShareMessage};

/// Encoded size above which a message is sent as MESSAGE_PART frames.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 256 * 1024;

/// Largest reassembled message accepted from a peer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Chunked transfers one peer may have open at the same time.
pub const DEFAULT_MAX_PENDING_TRANSFERS: usize = 16;

/// Room left in each part for the part's own header and length fields.
const PART_OVERHEAD_MARGIN: usize = 100;

/// Encodes `envelope` into the frames that should be written to the socket.
///
/// Messages whose encoding is at most `threshold` bytes produce exactly one
/// frame.  Larger ones produce consecutive MESSAGE_PART frames that all share
/// one freshly generated transfer id.
///
/// # Errors
///
/// Propagates encoding failures from [`encode_message`].
pub fn encode_frames(envelope: &Envelope, threshold: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let encoded = encode_message(envelope)?;
    if encoded.len() <= threshold {
        return Ok(vec![encoded]);
    }
    split_encoded(&encoded, threshold)
}

/// Cuts an already encoded message into MESSAGE_PART frames.
pub fn split_encoded(encoded: &[u8], threshold: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let total_size =
        u32::try_from(encoded.len()).map_err(|_| ProtocolError::MessageTooLarge(encoded.len()))?;
    let slice_len = threshold.saturating_sub(PART_OVERHEAD_MARGIN).max(1);
    let transfer_id = Uuid::new_v4();

    encoded
        .chunks(slice_len)
        .map(|slice| {
            encode_message(&Envelope::reply(
                transfer_id,
                ShareMessage::MessagePart(MessagePartMessage {
                    total_size,
                    data: slice.to_vec(),
                }),
            ))
        })
        .collect()
}

// ── Reassembly ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PartialTransfer {
    total_size: usize,
    buffer: Vec<u8>,
}

/// Collects MESSAGE_PART slices per transfer id.
///
/// The declared total of a transfer is checked against `max_message_size`
/// before anything is buffered, and buffers grow with the bytes actually
/// received.
#[derive(Debug)]
pub struct Reassembler {
    transfers: HashMap<Uuid, PartialTransfer>,
    max_message_size: usize,
    max_pending: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PENDING_TRANSFERS)
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_message_size: usize, max_pending: usize) -> Self {
        Self {
            transfers: HashMap::new(),
            max_message_size,
            max_pending,
        }
    }

    /// Appends one slice.  Returns the complete encoded message once every
    /// byte of the transfer has arrived.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::DeclaredSizeOutOfRange`] if a new transfer announces
    ///   zero bytes or more than the message size limit.
    /// - [`ProtocolError::TooManyTransfers`] if a new transfer would exceed
    ///   the pending limit.
    /// - [`ProtocolError::InconsistentChunks`] if a slice disagrees with the
    ///   total announced by earlier slices or would overflow it.  The
    ///   transfer is discarded in that case.
    pub fn push(
        &mut self,
        transfer_id: Uuid,
        part: MessagePartMessage,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let total_size = part.total_size as usize;
        if !self.transfers.contains_key(&transfer_id) {
            if total_size == 0 || total_size > self.max_message_size {
                return Err(ProtocolError::DeclaredSizeOutOfRange {
                    transfer_id,
                    declared: total_size,
                    max: self.max_message_size,
                });
            }
            if self.transfers.len() >= self.max_pending {
                return Err(ProtocolError::TooManyTransfers {
                    limit: self.max_pending,
                });
            }
        }
        let entry = self
            .transfers
            .entry(transfer_id)
            .or_insert_with(|| PartialTransfer {
                total_size,
                buffer: Vec::new(),
            });

        if entry.total_size != total_size {
            let detail = format!(
                "total size changed from {} to {total_size}",
                entry.total_size
            );
            self.transfers.remove(&transfer_id);
            return Err(ProtocolError::InconsistentChunks { transfer_id, detail });
        }
        if entry.buffer.len() + part.data.len() > entry.total_size {
            let detail = format!(
                "{} buffered + {} new bytes exceeds total {}",
                entry.buffer.len(),
                part.data.len(),
                entry.total_size
            );
            self.transfers.remove(&transfer_id);
            return Err(ProtocolError::InconsistentChunks { transfer_id, detail });
        }

        entry.buffer.extend_from_slice(&part.data);
        if entry.buffer.len() < entry.total_size {
            return Ok(None);
        }
        Ok(self.transfers.remove(&transfer_id).map(|t| t.buffer))
    }

    /// Number of transfers still waiting for slices.
    pub fn pending(&self) -> usize {
        self.transfers.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payload::ClipboardPayload;
    use crate::protocol::codec::decode_message;
    use crate::protocol::messages::ClipboardDataMessage;

    const THRESHOLD: usize = 4096;

    /// Builds an envelope whose encoding is exactly `encoded_len` bytes.
    fn envelope_of_encoded_len(encoded_len: usize) -> Envelope {
        // header 21 + operation id 16 + kind 1 + blob length 4
        let overhead = 21 + 16 + 1 + 4;
        let env = Envelope::new(ShareMessage::ClipboardData(ClipboardDataMessage {
            operation_id: Uuid::new_v4(),
            payload: ClipboardPayload::Image(vec![0xAB; encoded_len - overhead]),
        }));
        assert_eq!(encode_message(&env).unwrap().len(), encoded_len);
        env
    }

    /// Feeds frames through decode + reassembly, returning the inner envelope.
    fn reassemble(frames: &[Vec<u8>]) -> Envelope {
        let mut reassembler = Reassembler::new();
        let mut finished = None;
        for frame in frames {
            let (env, _) = decode_message(frame).unwrap();
            let ShareMessage::MessagePart(part) = env.message else {
                return env;
            };
            if let Some(bytes) = reassembler.push(env.id, part).unwrap() {
                finished = Some(decode_message(&bytes).unwrap().0);
            }
        }
        assert_eq!(reassembler.pending(), 0);
        finished.expect("transfer never completed")
    }

    #[test]
    fn test_message_at_or_below_threshold_is_single_frame() {
        for len in [THRESHOLD - 1, THRESHOLD] {
            let env = envelope_of_encoded_len(len);
            let frames = encode_frames(&env, THRESHOLD).unwrap();
            assert_eq!(frames.len(), 1, "len {len} should not be chunked");
            assert_eq!(reassemble(&frames), env);
        }
    }

    #[test]
    fn test_message_one_byte_over_threshold_is_chunked() {
        // Arrange
        let env = envelope_of_encoded_len(THRESHOLD + 1);

        // Act
        let frames = encode_frames(&env, THRESHOLD).unwrap();

        // Assert
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() <= THRESHOLD));
        assert_eq!(reassemble(&frames), env);
    }

    #[test]
    fn test_five_times_threshold_reassembles_identically() {
        let env = envelope_of_encoded_len(5 * THRESHOLD);

        let frames = encode_frames(&env, THRESHOLD).unwrap();

        assert!(frames.len() >= 5);
        assert_eq!(reassemble(&frames), env);
    }

    #[test]
    fn test_all_parts_share_transfer_id_distinct_from_inner_id() {
        let env = envelope_of_encoded_len(3 * THRESHOLD);

        let frames = encode_frames(&env, THRESHOLD).unwrap();

        let ids: Vec<Uuid> = frames.iter().map(|f| decode_message(f).unwrap().0.id).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_ne!(ids[0], env.id);
    }

    #[test]
    fn test_interleaved_transfers_reassemble_independently() {
        // Arrange
        let a = envelope_of_encoded_len(2 * THRESHOLD);
        let b = envelope_of_encoded_len(2 * THRESHOLD + 7);
        let frames_a = encode_frames(&a, THRESHOLD).unwrap();
        let frames_b = encode_frames(&b, THRESHOLD).unwrap();
        let mut reassembler = Reassembler::new();
        let mut done = Vec::new();

        // Act
        for (fa, fb) in frames_a.iter().zip(frames_b.iter()) {
            for frame in [fa, fb] {
                let (env, _) = decode_message(frame).unwrap();
                let ShareMessage::MessagePart(part) = env.message else { panic!("not a part") };
                if let Some(bytes) = reassembler.push(env.id, part).unwrap() {
                    done.push(decode_message(&bytes).unwrap().0);
                }
            }
        }

        // Assert
        assert_eq!(done, vec![a, b]);
    }

    #[test]
    fn test_overflowing_slice_is_rejected_and_transfer_dropped() {
        let mut reassembler = Reassembler::new();
        let id = Uuid::new_v4();
        reassembler
            .push(id, MessagePartMessage { total_size: 4, data: vec![1, 2, 3] })
            .unwrap();

        let result = reassembler.push(id, MessagePartMessage { total_size: 4, data: vec![4, 5] });

        assert!(matches!(result, Err(ProtocolError::InconsistentChunks { .. })));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_declared_total_above_limit_is_rejected_before_buffering() {
        // Arrange
        let mut reassembler = Reassembler::with_limits(1024, 4);
        let id = Uuid::new_v4();

        // Act
        let huge = reassembler.push(id, MessagePartMessage { total_size: u32::MAX, data: vec![1] });
        let empty = reassembler.push(Uuid::new_v4(), MessagePartMessage { total_size: 0, data: vec![] });

        // Assert
        assert!(matches!(
            huge,
            Err(ProtocolError::DeclaredSizeOutOfRange { declared, max: 1024, .. }) if declared == u32::MAX as usize
        ));
        assert!(matches!(empty, Err(ProtocolError::DeclaredSizeOutOfRange { declared: 0, .. })));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_default_limit_refuses_a_four_gigabyte_announcement() {
        let mut reassembler = Reassembler::new();

        let result = reassembler.push(
            Uuid::new_v4(),
            MessagePartMessage { total_size: u32::MAX, data: vec![1] },
        );

        assert!(matches!(result, Err(ProtocolError::DeclaredSizeOutOfRange { .. })));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_pending_transfers_are_bounded() {
        // Arrange
        let mut reassembler = Reassembler::with_limits(1024, 2);
        let open = |r: &mut Reassembler| {
            r.push(Uuid::new_v4(), MessagePartMessage { total_size: 10, data: vec![0; 2] })
        };
        open(&mut reassembler).unwrap();
        let second = Uuid::new_v4();
        reassembler
            .push(second, MessagePartMessage { total_size: 4, data: vec![0; 2] })
            .unwrap();

        // Act
        let third = open(&mut reassembler);
        let finished = reassembler
            .push(second, MessagePartMessage { total_size: 4, data: vec![9; 2] })
            .unwrap();

        // Assert
        assert!(matches!(third, Err(ProtocolError::TooManyTransfers { limit: 2 })));
        assert_eq!(finished, Some(vec![0, 0, 9, 9]), "open transfers still complete");
        assert_eq!(reassembler.pending(), 1);
    }

    #[test]
    fn test_changed_total_is_rejected() {
        let mut reassembler = Reassembler::new();
        let id = Uuid::new_v4();
        reassembler
            .push(id, MessagePartMessage { total_size: 10, data: vec![0; 2] })
            .unwrap();

        let result = reassembler.push(id, MessagePartMessage { total_size: 11, data: vec![0; 2] });

        assert!(matches!(result, Err(ProtocolError::InconsistentChunks { .. })));
    }
}
