/// Queued PCM awaiting the audio output.
///
/// Samples are interleaved stereo `i16`. When the queued bytes exceed the
/// budget (`buffer_ms` worth of output), the entire backlog is dropped
/// rather than blocking the frame loop: the process is a debugger, not a
/// player, and a glitch on resume beats stalling the emulation while the
/// user sits at a breakpoint.
#[derive(Clone, Debug, Default)]
pub struct AudioQueue {
    samples: Vec<i16>,
    max_bytes: usize,
    enabled: bool,
    sample_rate: u32,
}

impl AudioQueue {
    /// Configures the queue for a sample rate and a budget in
    /// milliseconds, and enables it.
    pub fn open(&mut self, sample_rate: u32, buffer_ms: u32) {
        let rate = if sample_rate == 0 { 44_100 } else { sample_rate };
        let ms = if buffer_ms == 0 { 50 } else { buffer_ms };
        let bytes_per_sec = rate as usize * 2 * std::mem::size_of::<i16>();
        self.max_bytes = bytes_per_sec * ms as usize / 1000;
        self.sample_rate = rate;
        self.samples.clear();
        self.enabled = true;
    }

    /// Drops the backlog and stops accepting samples.
    pub fn close(&mut self) {
        self.samples.clear();
        self.enabled = false;
        self.max_bytes = 0;
        self.sample_rate = 0;
    }

    /// True while the queue accepts samples.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The negotiated output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    /// Queues one stereo sample pair.
    pub fn push_sample(&mut self, left: i16, right: i16) {
        if !self.enabled {
            return;
        }
        if self.max_bytes > 0 && self.queued_bytes() >= self.max_bytes {
            self.samples.clear();
            return;
        }
        self.samples.push(left);
        self.samples.push(right);
    }

    /// Queues a batch of interleaved stereo samples. Returns the number of
    /// frames consumed (always all of them; overflow drops the backlog
    /// instead of rejecting input).
    pub fn push_batch(&mut self, data: &[i16]) -> usize {
        let frames = data.len() / 2;
        if !self.enabled {
            return frames;
        }
        if self.max_bytes > 0 && self.queued_bytes() >= self.max_bytes {
            self.samples.clear();
            return frames;
        }
        self.samples.extend_from_slice(data);
        frames
    }

    /// Moves up to `max_samples` queued samples into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<i16>, max_samples: usize) {
        let take = self.samples.len().min(max_samples);
        out.extend(self.samples.drain(..take));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_from_rate_and_ms() {
        let mut q = AudioQueue::default();
        q.open(48_000, 50);
        // 48000 Hz * 2 ch * 2 bytes * 50ms / 1000
        assert_eq!(q.max_bytes, 9600);
    }

    #[test]
    fn test_overflow_drops_backlog() {
        let mut q = AudioQueue::default();
        q.open(1000, 1); // budget: 1000 * 2 * 2 / 1000 = 4 bytes
        q.push_sample(1, 2);
        assert_eq!(q.queued_bytes(), 4);
        // At the budget: the entire queue is dropped, the new pair is not
        // queued.
        q.push_sample(3, 4);
        assert_eq!(q.queued_bytes(), 0);
        q.push_sample(5, 6);
        assert_eq!(q.queued_bytes(), 4);
    }

    #[test]
    fn test_batch_reports_all_frames_consumed() {
        let mut q = AudioQueue::default();
        q.open(1000, 1);
        let data = [0i16; 64];
        assert_eq!(q.push_batch(&data), 32);
    }

    #[test]
    fn test_disabled_queue_ignores_samples() {
        let mut q = AudioQueue::default();
        q.push_sample(1, 2);
        assert_eq!(q.queued_bytes(), 0);
        q.open(44_100, 50);
        q.push_sample(1, 2);
        q.close();
        assert_eq!(q.queued_bytes(), 0);
    }

    #[test]
    fn test_drain() {
        let mut q = AudioQueue::default();
        q.open(44_100, 50);
        q.push_sample(1, 2);
        q.push_sample(3, 4);
        let mut out = Vec::new();
        q.drain_into(&mut out, 3);
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(q.queued_bytes(), 2);
    }
}
