//! The frame-delta payload format.
//!
//! A delta records the difference between two serialized emulator states of
//! the same size over a fixed 64-byte block grid:
//!
//! ```text
//! u32 block_size     (= 64)
//! u32 block_count    (state_size / block_size)
//! u32 tail_len       (state_size - block_count * block_size)
//! u32 changed_count
//! changed_count * { u32 block_index, u8 data[block_size] }
//! u8 tail_data[tail_len]
//! ```
//!
//! All integers are little-endian. The tail (the final partial block, if
//! any) is always stored verbatim, so a payload is valid against exactly
//! one state size: `block_count * block_size + tail_len`.

use crate::{HistoryError, HistoryErrorKind};

/// Block granularity of the delta grid.
pub const BLOCK_SIZE: usize = 64;

/// Byte size of the fixed payload header.
pub const HEADER_LEN: usize = 16;

/// The largest payload [`encode`] can produce for a state of `state_size`
/// bytes (every block changed).
pub fn max_len(state_size: usize) -> usize {
    let block_count = state_size / BLOCK_SIZE;
    let tail_len = state_size - block_count * BLOCK_SIZE;
    HEADER_LEN + block_count * (4 + BLOCK_SIZE) + tail_len
}

/// Encodes the delta from `prev` to `cur`.
///
/// Both slices must be the same length. The returned payload applied to
/// `prev` via [`apply`] reproduces `cur` exactly.
pub fn encode(prev: &[u8], cur: &[u8]) -> Vec<u8> {
    debug_assert_eq!(prev.len(), cur.len());
    let size = cur.len();
    let block_count = size / BLOCK_SIZE;
    let tail_len = size - block_count * BLOCK_SIZE;

    let mut out = Vec::with_capacity(max_len(size));
    out.extend_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&(block_count as u32).to_le_bytes());
    out.extend_from_slice(&(tail_len as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut changed = 0u32;
    for index in 0..block_count {
        let off = index * BLOCK_SIZE;
        let range = off..off + BLOCK_SIZE;
        if prev[range.clone()] == cur[range.clone()] {
            continue;
        }
        out.extend_from_slice(&(index as u32).to_le_bytes());
        out.extend_from_slice(&cur[range]);
        changed += 1;
    }
    if tail_len > 0 {
        out.extend_from_slice(&cur[block_count * BLOCK_SIZE..]);
    }
    out[12..16].copy_from_slice(&changed.to_le_bytes());
    out
}

fn read_u32(payload: &[u8], pos: usize) -> Option<u32> {
    let bytes = payload.get(pos..pos + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Applies a delta payload to `io`, which holds the base state on entry
/// and the reconstructed state on success.
///
/// Fails without touching the changed blocks' invariants if the payload
/// header does not match `io.len()` or the payload is truncated.
pub fn apply(io: &mut [u8], payload: &[u8]) -> Result<(), HistoryError> {
    let block_size = read_u32(payload, 0).ok_or(HistoryErrorKind::BadDelta)? as usize;
    let block_count = read_u32(payload, 4).ok_or(HistoryErrorKind::BadDelta)? as usize;
    let tail_len = read_u32(payload, 8).ok_or(HistoryErrorKind::BadDelta)? as usize;
    let changed_count = read_u32(payload, 12).ok_or(HistoryErrorKind::BadDelta)?;

    if block_size != BLOCK_SIZE {
        return Err(HistoryErrorKind::BadDelta.into());
    }
    if block_count * block_size + tail_len != io.len() {
        return Err(HistoryErrorKind::BadDelta.into());
    }

    let mut pos = HEADER_LEN;
    for _ in 0..changed_count {
        let index = read_u32(payload, pos).ok_or(HistoryErrorKind::BadDelta)? as usize;
        pos += 4;
        if index >= block_count {
            return Err(HistoryErrorKind::BadDelta.into());
        }
        let data = payload
            .get(pos..pos + block_size)
            .ok_or(HistoryErrorKind::BadDelta)?;
        io[index * block_size..(index + 1) * block_size].copy_from_slice(data);
        pos += block_size;
    }
    if tail_len > 0 {
        let data = payload
            .get(pos..pos + tail_len)
            .ok_or(HistoryErrorKind::BadDelta)?;
        io[block_count * block_size..].copy_from_slice(data);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_identical_states() {
        let state = vec![0xAAu8; 256];
        let payload = encode(&state, &state);
        // Header + tail only; no changed blocks, no tail on an even size.
        assert_eq!(payload.len(), HEADER_LEN);
        let mut io = state.clone();
        apply(&mut io, &payload).unwrap();
        assert_eq!(io, state);
    }

    #[test]
    fn test_single_block_change() {
        let prev = vec![0u8; 256];
        let mut cur = prev.clone();
        cur[70] = 0xFF;
        let payload = encode(&prev, &cur);
        assert_eq!(payload.len(), HEADER_LEN + 4 + BLOCK_SIZE);
        let mut io = prev.clone();
        apply(&mut io, &payload).unwrap();
        assert_eq!(io, cur);
    }

    #[test]
    fn test_tail_always_written() {
        let prev = vec![1u8; 100];
        let mut cur = prev.clone();
        cur[99] = 9;
        let payload = encode(&prev, &cur);
        // One 64-byte block (unchanged) plus a 36-byte tail.
        assert_eq!(payload.len(), HEADER_LEN + 36);
        let mut io = prev.clone();
        apply(&mut io, &payload).unwrap();
        assert_eq!(io, cur);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let prev = vec![0u8; 128];
        let cur = vec![1u8; 128];
        let payload = encode(&prev, &cur);
        let mut io = vec![0u8; 192];
        assert!(apply(&mut io, &payload).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let prev = vec![0u8; 128];
        let cur = vec![1u8; 128];
        let payload = encode(&prev, &cur);
        let mut io = prev.clone();
        assert!(apply(&mut io, &payload[..payload.len() - 1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            prev in proptest::collection::vec(any::<u8>(), 0..600),
            flips in proptest::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..32),
        ) {
            let mut cur = prev.clone();
            if !cur.is_empty() {
                for (index, value) in flips {
                    let i = index.index(cur.len());
                    cur[i] = value;
                }
            }
            let payload = encode(&prev, &cur);
            prop_assert!(payload.len() <= max_len(prev.len()));
            let mut io = prev.clone();
            apply(&mut io, &payload).unwrap();
            prop_assert_eq!(io, cur);
        }
    }
}
