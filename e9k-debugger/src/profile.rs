//! Lightweight profiling over the core's checkpoint counters and
//! profiler stream.

use std::path::Path;

use e9k_host::abi::CHECKPOINT_COUNT;
use e9k_host::Checkpoint;

use crate::app::App;

/// Host-side profiler bookkeeping.
#[derive(Debug, Default)]
pub struct ProfileState {
    /// Packets drained from the core's profiler stream this session.
    pub stream_packets: u64,
}

/// Drains pending profiler stream packets. Called once per tick.
pub fn drain_stream(app: &mut App) {
    loop {
        match app.bridge.profiler_stream_next() {
            Ok(Some(_packet)) => app.profile.stream_packets += 1,
            _ => break,
        }
    }
}

/// Formats the checkpoint counters for display.
pub fn checkpoint_report(app: &App) -> Vec<String> {
    let mut entries = [Checkpoint::default(); CHECKPOINT_COUNT];
    let count = match app.bridge.read_checkpoints(&mut entries) {
        Ok(count) => count,
        Err(_) => return vec!["profile: checkpoints unavailable".to_owned()],
    };
    let mut out = Vec::new();
    for (i, cp) in entries.iter().enumerate().take(count) {
        if cp.count == 0 {
            continue;
        }
        out.push(format!(
            "{i:02} avg:{} min:{} max:{}",
            cp.average, cp.minimum, cp.maximum
        ));
    }
    if out.is_empty() {
        out.push("No checkpoints".to_owned());
    }
    out
}

/// Dumps the checkpoint counters as JSON (the `E9K_PROFILE_JSON` hook).
pub fn dump_json(app: &App, path: &Path) {
    let mut entries = [Checkpoint::default(); CHECKPOINT_COUNT];
    let count = match app.bridge.read_checkpoints(&mut entries) {
        Ok(count) => count,
        Err(_) => return,
    };
    let checkpoints: Vec<_> = entries
        .iter()
        .enumerate()
        .take(count)
        .filter(|(_, cp)| cp.count > 0)
        .map(|(i, cp)| {
            serde_json::json!({
                "index": i,
                "count": cp.count,
                "average": cp.average,
                "minimum": cp.minimum,
                "maximum": cp.maximum,
            })
        })
        .collect();
    let report = serde_json::json!({
        "stream_packets": app.profile.stream_packets,
        "checkpoints": checkpoints,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            if let Err(e) = std::fs::write(path, text) {
                tracing::warn!(path = %path.display(), error = %e, "profile dump failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "profile serialization failed"),
    }
}
