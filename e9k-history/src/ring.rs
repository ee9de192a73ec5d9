use std::collections::VecDeque;

use crate::delta;
use crate::source::StateSource;
use crate::{HistoryError, HistoryErrorKind};

/// One retained frame of emulator state.
///
/// `payload` is either the full serialized state (`is_keyframe`) or a delta
/// against the logically preceding state (see [`crate::delta`]).
/// `state_size` is always the uncompressed state size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    /// Monotonically increasing capture id.
    pub id: u64,
    /// Frame number at capture time.
    pub frame_no: u64,
    /// True if `payload` is a full serialized state.
    pub is_keyframe: bool,
    /// Uncompressed state size in bytes.
    pub state_size: usize,
    /// Keyframe bytes or delta payload.
    pub payload: Vec<u8>,
}

/// The byte-budgeted keyframe+delta ring.
///
/// Invariants, enforced after every mutation:
/// - the first retained record is a keyframe;
/// - every delta's `state_size` equals its preceding keyframe's;
/// - the summed payload bytes stay within the budget (or the ring is
///   empty).
#[derive(Clone, Debug, Default)]
pub struct StateRing {
    frames: VecDeque<FrameRecord>,
    max_bytes: usize,
    total_bytes: usize,
    next_id: u64,
    prev_state: Vec<u8>,
    temp_state: Vec<u8>,
    recon_a: Vec<u8>,
    recon_b: Vec<u8>,
    paused: bool,
    current_frame_no: u64,
}

impl StateRing {
    /// Creates an empty ring with the given byte budget. A budget of zero
    /// disables capturing.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Number of retained frames.
    pub fn count(&self) -> usize {
        self.frames.len()
    }

    /// Summed payload bytes of the retained frames.
    pub fn used_bytes(&self) -> usize {
        self.total_bytes
    }

    /// The configured byte budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Adjusts the byte budget and trims to it.
    pub fn set_max_bytes(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;
        self.trim();
    }

    /// Suspends or resumes capturing.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// True while capturing is suspended.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The frame number the next capture will be tagged with.
    pub fn current_frame_no(&self) -> u64 {
        self.current_frame_no
    }

    /// Sets the frame number for the next capture (or after a restore).
    pub fn set_current_frame_no(&mut self, frame_no: u64) {
        self.current_frame_no = frame_no;
    }

    /// Iterates the retained records oldest-first.
    pub fn records(&self) -> impl Iterator<Item = &FrameRecord> {
        self.frames.iter()
    }

    /// True if `frame_no` is in the retained window.
    pub fn has_frame_no(&self, frame_no: u64) -> bool {
        self.index_of(frame_no).is_some()
    }

    /// The record that sits at `percent` (0.0..=1.0) of the retained
    /// window, oldest to newest.
    pub fn frame_at_percent(&self, percent: f32) -> Option<&FrameRecord> {
        if self.frames.is_empty() {
            return None;
        }
        self.frames.get(self.index_at_percent(percent))
    }

    fn index_at_percent(&self, percent: f32) -> usize {
        let percent = percent.clamp(0.0, 1.0);
        let last = self.frames.len() - 1;
        (((last as f32) * percent + 0.5) as usize).min(last)
    }

    fn index_of(&self, frame_no: u64) -> Option<usize> {
        // Linear scan; the retained count is bounded by budget/state_size.
        self.frames.iter().position(|f| f.frame_no == frame_no)
    }

    /// Captures the current emulator state, tagged with the current frame
    /// number. No-op while paused or with a zero budget.
    ///
    /// On error the ring is unchanged; a record is committed only after
    /// serialization and encoding have succeeded.
    pub fn capture<S: StateSource>(&mut self, source: &mut S) -> Result<(), HistoryError> {
        if self.paused || self.max_bytes == 0 {
            return Ok(());
        }
        let state_size = source
            .serialize_size()
            .filter(|&size| size > 0)
            .ok_or(HistoryErrorKind::EmptyState)?;
        self.temp_state.resize(state_size, 0);
        if !source.serialize(&mut self.temp_state) {
            return Err(HistoryErrorKind::SerializeFailed.into());
        }

        let have_prev = self.prev_state.len() == state_size;
        let (is_keyframe, payload) = if have_prev {
            let encoded = delta::encode(&self.prev_state, &self.temp_state);
            if encoded.len() < state_size {
                (false, encoded)
            } else {
                (true, self.temp_state.clone())
            }
        } else {
            (true, self.temp_state.clone())
        };

        let is_keyframe = is_keyframe || self.frames.is_empty();
        let payload = if is_keyframe && payload.len() != state_size {
            self.temp_state.clone()
        } else {
            payload
        };

        self.total_bytes += payload.len();
        self.frames.push_back(FrameRecord {
            id: self.next_id,
            frame_no: self.current_frame_no,
            is_keyframe,
            state_size,
            payload,
        });
        self.next_id += 1;

        self.prev_state.clear();
        self.prev_state.extend_from_slice(&self.temp_state);

        self.trim();
        Ok(())
    }

    /// Promotes the second record to a keyframe before the first one is
    /// dropped, preserving the first-is-keyframe invariant.
    fn promote_next(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        let (first, next) = {
            let first = &self.frames[0];
            let next = &self.frames[1];
            if next.is_keyframe
                || !first.is_keyframe
                || first.state_size == 0
                || next.state_size != first.state_size
            {
                return;
            }
            (first.payload.clone(), next.payload.clone())
        };
        let mut full = first;
        if delta::apply(&mut full, &next).is_err() {
            return;
        }
        let next = &mut self.frames[1];
        self.total_bytes -= next.payload.len();
        self.total_bytes += full.len();
        next.payload = full;
        next.is_keyframe = true;
    }

    fn trim(&mut self) {
        while self.total_bytes > self.max_bytes && !self.frames.is_empty() {
            if self.frames.len() >= 2 {
                self.promote_next();
            }
            if let Some(oldest) = self.frames.pop_front() {
                self.total_bytes -= oldest.payload.len();
            }
        }
    }

    /// Reconstructs the full state of the record at `idx` into `recon_a`.
    fn reconstruct_index(&mut self, idx: usize) -> Result<(), HistoryError> {
        let target = self.frames.get(idx).ok_or(HistoryErrorKind::UnknownFrame)?;
        if target.state_size == 0 {
            return Err(HistoryErrorKind::UnknownFrame.into());
        }

        let mut key_idx = idx;
        while key_idx > 0 && !self.frames[key_idx].is_keyframe {
            key_idx -= 1;
        }
        let key = &self.frames[key_idx];
        if !key.is_keyframe || key.state_size == 0 {
            return Err(HistoryErrorKind::BadDelta.into());
        }
        let state_size = key.state_size;

        self.recon_a.resize(state_size, 0);
        self.recon_b.resize(state_size, 0);
        self.recon_a.copy_from_slice(&key.payload);

        for i in key_idx + 1..=idx {
            let frame = &self.frames[i];
            if frame.state_size != state_size {
                return Err(HistoryErrorKind::BadDelta.into());
            }
            if frame.is_keyframe {
                self.recon_a.copy_from_slice(&frame.payload);
                continue;
            }
            self.recon_b.copy_from_slice(&self.recon_a);
            delta::apply(&mut self.recon_b, &frame.payload)?;
            std::mem::swap(&mut self.recon_a, &mut self.recon_b);
        }
        Ok(())
    }

    /// Reconstructs the state captured for `frame_no` and returns a copy.
    pub fn reconstruct_frame_no(&mut self, frame_no: u64) -> Result<Vec<u8>, HistoryError> {
        let idx = self
            .index_of(frame_no)
            .ok_or(HistoryErrorKind::UnknownFrame)?;
        self.reconstruct_index(idx)?;
        Ok(self.recon_a.clone())
    }

    /// Reconstructs `frame_no` and feeds it back into the emulator.
    ///
    /// On success the ring's current frame number is set to `frame_no`.
    pub fn restore_frame_no<S: StateSource>(
        &mut self,
        source: &mut S,
        frame_no: u64,
    ) -> Result<(), HistoryError> {
        let idx = self
            .index_of(frame_no)
            .ok_or(HistoryErrorKind::UnknownFrame)?;
        self.reconstruct_index(idx)?;
        if !source.unserialize(&self.recon_a) {
            return Err(HistoryErrorKind::UnserializeFailed.into());
        }
        self.current_frame_no = frame_no;
        Ok(())
    }

    fn trim_after_index(&mut self, idx: usize) -> Result<(), HistoryError> {
        if idx + 1 >= self.frames.len() {
            return Ok(());
        }
        self.reconstruct_index(idx)?;
        while self.frames.len() > idx + 1 {
            if let Some(dropped) = self.frames.pop_back() {
                self.total_bytes -= dropped.payload.len();
            }
        }
        // The next capture deltas against the newly newest state.
        self.prev_state.clear();
        self.prev_state.extend_from_slice(&self.recon_a);
        Ok(())
    }

    /// Drops every record after `frame_no`, clipping the future when the
    /// user diverges from a restored frame.
    pub fn trim_after_frame_no(&mut self, frame_no: u64) -> Result<(), HistoryError> {
        let idx = self
            .index_of(frame_no)
            .ok_or(HistoryErrorKind::UnknownFrame)?;
        self.trim_after_index(idx)
    }

    /// [`trim_after_frame_no`](Self::trim_after_frame_no) with the cut
    /// point given as a fraction of the retained window.
    pub fn trim_after_percent(&mut self, percent: f32) -> Result<(), HistoryError> {
        if self.frames.is_empty() {
            return Err(HistoryErrorKind::UnknownFrame.into());
        }
        let idx = self.index_at_percent(percent);
        self.trim_after_index(idx)
    }

    /// Reconstructs the state at the ring's current frame number (or the
    /// newest record if the current frame is not retained) and returns it
    /// together with its frame number. Used to seed the emulator from a
    /// loaded snapshot.
    pub fn latest_state(&mut self) -> Result<(Vec<u8>, u64), HistoryError> {
        if self.frames.is_empty() {
            return Err(HistoryErrorKind::UnknownFrame.into());
        }
        let idx = match self.current_frame_no {
            0 => self.frames.len() - 1,
            frame_no => self.index_of(frame_no).unwrap_or(self.frames.len() - 1),
        };
        let frame_no = self.frames[idx].frame_no;
        self.reconstruct_index(idx)?;
        Ok((self.recon_a.clone(), frame_no))
    }

    pub(crate) fn prev_state(&self) -> &[u8] {
        &self.prev_state
    }

    pub(crate) fn set_prev_state(&mut self, prev: Vec<u8>) {
        self.prev_state = prev;
    }

    pub(crate) fn restore_records(&mut self, records: Vec<FrameRecord>, next_id: u64) {
        self.total_bytes = records.iter().map(|r| r.payload.len()).sum();
        self.frames = VecDeque::from(records);
        self.next_id = next_id;
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    /// A synthetic emulator whose state is the frame number repeated in
    /// every 8-byte word of a fixed-size buffer.
    struct WordFill {
        size: usize,
        value: u64,
        restored: Option<Vec<u8>>,
    }

    impl WordFill {
        fn new(size: usize) -> Self {
            Self {
                size,
                value: 0,
                restored: None,
            }
        }

        fn state(&self) -> Vec<u8> {
            let mut out = vec![0u8; self.size];
            for chunk in out.chunks_exact_mut(8) {
                chunk.copy_from_slice(&self.value.to_le_bytes());
            }
            out
        }
    }

    impl StateSource for WordFill {
        fn serialize_size(&mut self) -> Option<usize> {
            Some(self.size)
        }

        fn serialize(&mut self, out: &mut [u8]) -> bool {
            out.copy_from_slice(&self.state());
            true
        }

        fn unserialize(&mut self, data: &[u8]) -> bool {
            self.restored = Some(data.to_vec());
            true
        }
    }

    fn capture_frames(ring: &mut StateRing, emu: &mut WordFill, count: u64) {
        for frame_no in 0..count {
            emu.value = frame_no;
            ring.set_current_frame_no(frame_no);
            ring.capture(emu).unwrap();
        }
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let mut ring = StateRing::new(1 << 20);
        let mut emu = WordFill::new(4096);
        capture_frames(&mut ring, &mut emu, 3);
        let records: Vec<_> = ring.records().collect();
        assert!(records[0].is_keyframe);
        assert!(!records[1].is_keyframe);
        assert!(!records[2].is_keyframe);
    }

    #[test]
    fn test_delta_state_size_matches_keyframe() {
        let mut ring = StateRing::new(1 << 20);
        let mut emu = WordFill::new(4096);
        capture_frames(&mut ring, &mut emu, 10);
        let mut key_size = 0;
        for record in ring.records() {
            if record.is_keyframe {
                key_size = record.state_size;
            } else {
                assert_eq!(record.state_size, key_size);
            }
        }
    }

    #[test]
    fn test_budget_bound_and_trim_promotion() {
        // Budget fits only a handful of frames; the survivor of each trim
        // must still start with a keyframe and reconstruct correctly.
        let size = 4096;
        let mut ring = StateRing::new(size * 3);
        let mut emu = WordFill::new(size);
        capture_frames(&mut ring, &mut emu, 50);
        assert!(ring.used_bytes() <= ring.max_bytes() || ring.count() == 0);
        assert!(ring.count() > 0);
        assert!(ring.records().next().unwrap().is_keyframe);

        let newest = ring.records().last().unwrap().frame_no;
        let state = ring.reconstruct_frame_no(newest).unwrap();
        emu.value = newest;
        assert_eq!(state, emu.state());
    }

    #[test]
    fn test_seek_round_trip() {
        // Every word changes every frame, so all 1000 captures are
        // keyframes; the budget is sized to retain all of them.
        let mut ring = StateRing::new(128 << 20);
        let mut emu = WordFill::new(64 * 1024);
        capture_frames(&mut ring, &mut emu, 1000);

        ring.restore_frame_no(&mut emu, 500).unwrap();
        emu.value = 500;
        let want = emu.state();
        assert_eq!(emu.restored.as_ref().unwrap(), &want);
        assert_eq!(ring.current_frame_no(), 500);

        ring.restore_frame_no(&mut emu, 0).unwrap();
        emu.value = 0;
        let want = emu.state();
        assert_eq!(emu.restored.as_ref().unwrap(), &want);
        assert_eq!(ring.current_frame_no(), 0);
    }

    #[test]
    fn test_trim_after_frame_no() {
        let mut ring = StateRing::new(128 << 20);
        let mut emu = WordFill::new(64 * 1024);
        capture_frames(&mut ring, &mut emu, 1000);

        ring.trim_after_frame_no(250).unwrap();
        assert_eq!(ring.count(), 251);
        assert!(ring.records().all(|r| r.frame_no <= 250));

        let err = ring.restore_frame_no(&mut emu, 260).unwrap_err();
        assert_eq!(err.kind(), crate::HistoryErrorKind::UnknownFrame);

        // The prev buffer now matches frame 250, so the next capture
        // deltas against it.
        emu.value = 250;
        assert_eq!(ring.prev_state(), emu.state());
    }

    #[test]
    fn test_trim_after_percent_endpoints() {
        let mut ring = StateRing::new(128 << 20);
        let mut emu = WordFill::new(4096);
        capture_frames(&mut ring, &mut emu, 11);

        ring.trim_after_percent(1.0).unwrap();
        assert_eq!(ring.count(), 11);

        ring.trim_after_percent(0.0).unwrap();
        assert_eq!(ring.count(), 1);
        assert_eq!(ring.records().next().unwrap().frame_no, 0);
    }

    /// A synthetic emulator that touches a single 64-byte block per frame,
    /// so captures after the first are genuine deltas.
    struct SparseTouch {
        size: usize,
        frame: u64,
        restored: Option<Vec<u8>>,
    }

    impl SparseTouch {
        fn state_for(size: usize, frame: u64) -> Vec<u8> {
            let mut out = vec![0u8; size];
            for f in 0..=frame {
                let block = (f as usize * 64) % size;
                out[block] = (f & 0xff) as u8;
            }
            out
        }
    }

    impl StateSource for SparseTouch {
        fn serialize_size(&mut self) -> Option<usize> {
            Some(self.size)
        }

        fn serialize(&mut self, out: &mut [u8]) -> bool {
            out.copy_from_slice(&Self::state_for(self.size, self.frame));
            true
        }

        fn unserialize(&mut self, data: &[u8]) -> bool {
            self.restored = Some(data.to_vec());
            true
        }
    }

    #[test]
    fn test_trim_promotes_delta_to_keyframe() {
        let size = 8192;
        // Room for one keyframe plus a few deltas; trimming must promote.
        let mut ring = StateRing::new(size + 2048);
        let mut emu = SparseTouch {
            size,
            frame: 0,
            restored: None,
        };
        for frame_no in 0..40 {
            emu.frame = frame_no;
            ring.set_current_frame_no(frame_no);
            ring.capture(&mut emu).unwrap();
        }
        assert!(ring.used_bytes() <= ring.max_bytes());
        let first = ring.records().next().unwrap().clone();
        assert!(first.is_keyframe);
        assert!(first.frame_no > 0);

        // Every retained frame still reconstructs to the synthetic truth.
        let frame_nos: Vec<u64> = ring.records().map(|r| r.frame_no).collect();
        for frame_no in frame_nos {
            let state = ring.reconstruct_frame_no(frame_no).unwrap();
            assert_eq!(state, SparseTouch::state_for(size, frame_no));
        }
    }

    #[test]
    fn test_capture_paused_is_noop() {
        let mut ring = StateRing::new(1 << 20);
        let mut emu = WordFill::new(4096);
        ring.set_paused(true);
        ring.capture(&mut emu).unwrap();
        assert_eq!(ring.count(), 0);
    }

    #[test]
    fn test_state_size_change_forces_keyframe() {
        let mut ring = StateRing::new(8 << 20);
        let mut emu = WordFill::new(4096);
        capture_frames(&mut ring, &mut emu, 3);
        let mut bigger = WordFill::new(8192);
        bigger.value = 3;
        ring.set_current_frame_no(3);
        ring.capture(&mut bigger).unwrap();
        assert!(ring.records().last().unwrap().is_keyframe);
        assert_eq!(ring.records().last().unwrap().state_size, 8192);
    }
}
