//! On-disk persistence of the rolling state buffer.
//!
//! A snapshot file carries the retained frame records plus the "previous
//! state" scratch buffer, so a restored session deltas its next capture
//! against the same state the saved session would have:
//!
//! ```text
//! u8  magic[8]          "E9KSNAP\0"
//! u32 version           (= 2)
//! u64 current_frame_no
//! u64 rom_checksum      FNV-1a 64 of the ROM file
//! u64 count
//! u64 prev_size
//! count * { u64 id, u64 frame_no, u32 is_keyframe,
//!           u64 state_size, u64 payload_size, u8 payload[payload_size] }
//! u8  prev_state[prev_size]
//! ```
//!
//! All integers are little-endian fixed-width. The loader rejects files
//! whose version is not exactly [`SNAPSHOT_VERSION`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::ring::{FrameRecord, StateRing};
use crate::{HistoryError, HistoryErrorKind};

/// The magic file preamble identifying snapshot files.
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"E9KSNAP\0";

/// The snapshot format version this engine reads and writes.
pub const SNAPSHOT_VERSION: u32 = 2;

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), HistoryError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), HistoryError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, HistoryError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, HistoryError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Writes `ring` to `path`, tagged with the ROM's checksum.
pub fn save(ring: &StateRing, path: &Path, rom_checksum: u64) -> Result<(), HistoryError> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&SNAPSHOT_MAGIC)?;
    write_u32(&mut w, SNAPSHOT_VERSION)?;
    write_u64(&mut w, ring.current_frame_no())?;
    write_u64(&mut w, rom_checksum)?;
    write_u64(&mut w, ring.count() as u64)?;
    write_u64(&mut w, ring.prev_state().len() as u64)?;
    for record in ring.records() {
        write_u64(&mut w, record.id)?;
        write_u64(&mut w, record.frame_no)?;
        write_u32(&mut w, record.is_keyframe as u32)?;
        write_u64(&mut w, record.state_size as u64)?;
        write_u64(&mut w, record.payload.len() as u64)?;
        w.write_all(&record.payload)?;
    }
    w.write_all(ring.prev_state())?;
    w.flush()?;
    Ok(())
}

/// Loads a snapshot from `path`.
///
/// Returns the reconstructed ring (with a zero byte budget; callers set
/// the budget of the running session) and the ROM checksum recorded at
/// save time. Comparing that checksum against the current ROM is up to the
/// caller.
pub fn load(path: &Path) -> Result<(StateRing, u64), HistoryError> {
    let mut r = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if magic != SNAPSHOT_MAGIC {
        return Err(HistoryErrorKind::BadFileMagic.into());
    }
    let version = read_u32(&mut r)?;
    if version != SNAPSHOT_VERSION {
        return Err(HistoryErrorKind::UnsupportedVersion.into());
    }

    let current_frame_no = read_u64(&mut r)?;
    let rom_checksum = read_u64(&mut r)?;
    let count = read_u64(&mut r)?;
    let prev_size = read_u64(&mut r)?;

    let mut records = Vec::with_capacity(count.min(1 << 20) as usize);
    let mut last_id = 0u64;
    for _ in 0..count {
        let id = read_u64(&mut r)?;
        let frame_no = read_u64(&mut r)?;
        let is_keyframe = read_u32(&mut r)? != 0;
        let state_size = read_u64(&mut r)? as usize;
        let payload_size = read_u64(&mut r)? as usize;
        let mut payload = vec![0u8; payload_size];
        r.read_exact(&mut payload)?;
        records.push(FrameRecord {
            id,
            frame_no,
            is_keyframe,
            state_size,
            payload,
        });
        last_id = id;
    }
    let mut prev_state = vec![0u8; prev_size as usize];
    r.read_exact(&mut prev_state)?;

    let mut ring = StateRing::new(0);
    ring.restore_records(records, last_id.wrapping_add(1));
    ring.set_prev_state(prev_state);
    ring.set_current_frame_no(current_frame_no);
    Ok((ring, rom_checksum))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::StateSource;

    struct Counter {
        size: usize,
        value: u8,
    }

    impl StateSource for Counter {
        fn serialize_size(&mut self) -> Option<usize> {
            Some(self.size)
        }

        fn serialize(&mut self, out: &mut [u8]) -> bool {
            out.fill(self.value);
            true
        }

        fn unserialize(&mut self, _data: &[u8]) -> bool {
            true
        }
    }

    fn sample_ring() -> StateRing {
        let mut ring = StateRing::new(1 << 20);
        let mut emu = Counter { size: 512, value: 0 };
        for frame_no in 0..20 {
            emu.value = frame_no as u8;
            ring.set_current_frame_no(frame_no);
            ring.capture(&mut emu).unwrap();
        }
        ring
    }

    #[test]
    fn test_round_trip() {
        let ring = sample_ring();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.bin.e9k-save");

        save(&ring, &path, 0xDEAD_BEEF).unwrap();
        let (loaded, checksum) = load(&path).unwrap();

        assert_eq!(checksum, 0xDEAD_BEEF);
        assert_eq!(loaded.count(), ring.count());
        assert_eq!(loaded.current_frame_no(), ring.current_frame_no());
        assert_eq!(loaded.prev_state(), ring.prev_state());
        let want: Vec<_> = ring.records().cloned().collect();
        let got: Vec<_> = loaded.records().cloned().collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.e9k-save");
        std::fs::write(&path, b"NOTSNAP\0rest").unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::BadFileMagic);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let ring = sample_ring();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.bin.e9k-save");
        save(&ring, &path, 1).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::UnsupportedVersion);
    }

    #[test]
    fn test_truncated_file_rejected() {
        let ring = sample_ring();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.bin.e9k-save");
        save(&ring, &path, 1).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), HistoryErrorKind::Io);
    }
}
