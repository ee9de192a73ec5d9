//! Session snapshot persistence: the rolling state buffer is written to
//! `<save_dir>/<rom_basename>.e9k-save` on exit and restored on the next
//! boot, gated on the ROM's FNV-1a checksum.

use std::path::{Path, PathBuf};

use e9k_common::checksum_file;
use e9k_history::snapshot;

use crate::app::App;

fn snapshot_path(save_dir: &Path, rom_path: &Path) -> Option<PathBuf> {
    let base = rom_path.file_name()?;
    let mut name = base.to_os_string();
    name.push(".e9k-save");
    Some(save_dir.join(name))
}

/// Restores a previous session's state buffer, if one exists for this
/// ROM. On success the bridge's save-state slot is seeded with the
/// newest reconstructed state.
pub fn load_on_boot(app: &mut App, save_dir: &Path) {
    let Some(rom_path) = app.bridge.rom_path().map(Path::to_owned) else {
        return;
    };
    let Some(path) = snapshot_path(save_dir, &rom_path) else {
        return;
    };
    if !path.is_file() {
        return;
    }
    let Ok(rom_checksum) = checksum_file(&rom_path) else {
        return;
    };

    let (mut ring, saved_checksum) = match snapshot::load(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring snapshot");
            return;
        }
    };
    if saved_checksum != 0 && saved_checksum != rom_checksum {
        tracing::warn!(path = %path.display(), "snapshot is for a different ROM, ignoring");
        return;
    }

    if let Ok((state, frame_no)) = ring.latest_state() {
        app.bridge.set_state_data(&state);
        app.frame_counter.set(frame_no);
        app.has_state_snapshot = true;
        tracing::info!(path = %path.display(), frame_no, "session snapshot loaded");
    }
    ring.set_max_bytes(app.history.max_bytes());
    app.save_slot = Some(ring);
}

/// Persists the current rolling buffer for the next session. With an
/// empty buffer, a snapshot restored at boot is re-saved so it is not
/// lost.
pub fn save_on_exit(app: &App, save_dir: &Path) {
    if !app.rolling_record {
        return;
    }
    let ring = if app.history.count() > 0 {
        &app.history
    } else if app.has_state_snapshot {
        match &app.save_slot {
            Some(slot) if slot.count() > 0 => slot,
            _ => return,
        }
    } else {
        return;
    };
    let Some(rom_path) = app.bridge.rom_path().map(Path::to_owned) else {
        return;
    };
    if !save_dir.is_dir() {
        return;
    }
    let Some(path) = snapshot_path(save_dir, &rom_path) else {
        return;
    };
    let Ok(rom_checksum) = checksum_file(&rom_path) else {
        return;
    };
    match snapshot::save(ring, &path, rom_checksum) {
        Ok(()) => tracing::info!(path = %path.display(), "session snapshot saved"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "snapshot save failed"),
    }
}
