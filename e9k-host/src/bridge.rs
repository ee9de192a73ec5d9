use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

use e9k_common::AccessWidth;
use e9k_history::StateSource;

use crate::abi::{
    self, Checkpoint, CoreApi, GameInfo, ProtectEntry, SystemAvInfo, Watchbreak, Watchpoint,
};
use crate::options::OptionStore;
use crate::record::{InputEventKind, InputRecorder};
use crate::shared::{self, HostShared};
use crate::video::FrameRef;
use crate::{HostError, HostErrorKind};

/// Result of [`HostBridge::save_state`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SaveStateInfo {
    /// Serialized state size in bytes.
    pub size: usize,
    /// Bytes that differ from the previously saved state, if there was
    /// one of the same size.
    pub diff_bytes: usize,
}

/// The bridge between the debugger and a dynamically loaded core.
///
/// See the [crate docs](crate) for the capability model. A bridge starts
/// empty; [`start`](Self::start) loads a core and ROM, and
/// [`shutdown`](Self::shutdown) releases everything in reverse order.
pub struct HostBridge {
    core: Option<CoreApi>,
    running: bool,
    game_loaded: bool,
    rom_path: PathBuf,
    rom_path_c: CString,
    rom_data: Vec<u8>,
    av_info: SystemAvInfo,
    recorder: InputRecorder,
    state_slot: Vec<u8>,
    audio_buffer_ms: u32,
    audio_enabled: bool,
    skip_bios_logo: bool,
    pending_overrides: Vec<(String, String)>,
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge {
    pub fn new() -> Self {
        Self {
            core: None,
            running: false,
            game_loaded: false,
            rom_path: PathBuf::new(),
            rom_path_c: CString::default(),
            rom_data: Vec::new(),
            av_info: SystemAvInfo::default(),
            recorder: InputRecorder::default(),
            state_slot: Vec::new(),
            audio_buffer_ms: 50,
            audio_enabled: true,
            skip_bios_logo: false,
            pending_overrides: Vec::new(),
        }
    }

    /// Configures the audio backlog budget. Takes effect at the next
    /// `start` or audio re-enable.
    pub fn set_audio_buffer_ms(&mut self, ms: u32) {
        self.audio_buffer_ms = ms;
    }

    /// Auto-press START after boot to skip the BIOS logo.
    pub fn set_skip_bios_logo(&mut self, skip: bool) {
        self.skip_bios_logo = skip;
    }

    /// Sets (or, with an empty value, removes) a core option override.
    /// Overrides installed before [`start`](Self::start) are applied when
    /// the core enumerates its options.
    pub fn set_core_option(&mut self, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        self.pending_overrides.retain(|(k, _)| k != key);
        if !value.is_empty() {
            self.pending_overrides.push((key.to_owned(), value.to_owned()));
        }
        // A core that is already running picks the change up immediately.
        let (key, value) = (key.to_owned(), value.to_owned());
        shared::with_do(move |host| {
            host.options.set_override(&key, &value);
            host.options.apply_overrides();
        });
    }

    /// Loads the core and the ROM, wires the callbacks and starts the
    /// session.
    pub fn start(
        &mut self,
        core_path: &Path,
        rom_path: &Path,
        system_dir: &Path,
        save_dir: Option<&Path>,
    ) -> Result<(), HostError> {
        if self.core.is_some() {
            self.shutdown();
        }

        let rom_data = std::fs::read(rom_path).map_err(|e| {
            HostError::new(
                HostErrorKind::Load,
                format!("failed to read rom {}: {e}", rom_path.display()),
            )
        })?;
        if rom_data.is_empty() {
            return Err(HostError::with_context(
                HostErrorKind::Load,
                format!("rom {} is empty", rom_path.display()),
            ));
        }

        let save_dir = save_dir.unwrap_or(system_dir);
        std::fs::create_dir_all(system_dir)
            .and_then(|_| std::fs::create_dir_all(save_dir))
            .map_err(|e| HostError::new(HostErrorKind::Load, format!("failed to create directories: {e}")))?;

        let core = CoreApi::load(core_path)?;

        let mut options = OptionStore::default();
        for (key, value) in &self.pending_overrides {
            options.set_override(key, value);
        }
        let system_dir_c = CString::new(system_dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        let save_dir_c =
            CString::new(save_dir.to_string_lossy().into_owned()).unwrap_or_default();
        shared::install(HostShared::new(system_dir_c, save_dir_c, options));

        unsafe {
            (core.set_environment)(shared::environment);
            (core.set_video_refresh)(shared::video_refresh);
            if let Some(set_audio_sample) = core.set_audio_sample {
                set_audio_sample(shared::audio_sample);
            }
            if let Some(set_audio_sample_batch) = core.set_audio_sample_batch {
                set_audio_sample_batch(shared::audio_sample_batch);
            }
            (core.set_input_poll)(shared::input_poll);
            (core.set_input_state)(shared::input_state);
            (core.init)();
        }

        self.rom_path = rom_path.to_owned();
        self.rom_path_c =
            CString::new(rom_path.to_string_lossy().into_owned()).unwrap_or_default();
        self.rom_data = rom_data;

        let info = GameInfo {
            path: self.rom_path_c.as_ptr(),
            data: self.rom_data.as_ptr() as *const c_void,
            size: self.rom_data.len(),
            meta: std::ptr::null(),
        };
        let loaded = unsafe { (core.load_game)(&info) };
        if !loaded {
            unsafe { (core.deinit)() };
            shared::teardown();
            return Err(HostError::with_context(
                HostErrorKind::Load,
                format!("core rejected rom {}", rom_path.display()),
            ));
        }
        self.game_loaded = true;

        if let Some(reset) = core.reset {
            unsafe { reset() };
        }

        shared::with_do(|host| {
            if self.skip_bios_logo {
                host.ports.schedule_auto_press(85, 5);
            } else {
                host.ports.schedule_auto_press(0, 0);
            }
        });

        let mut av_info = SystemAvInfo::default();
        unsafe { (core.get_system_av_info)(&mut av_info) };
        self.av_info = av_info;

        if self.audio_enabled {
            let sample_rate = av_info.timing.sample_rate as u32;
            let buffer_ms = self.audio_buffer_ms;
            shared::with_do(|host| host.audio.open(sample_rate, buffer_ms));
        }

        self.core = Some(core);
        self.running = true;
        tracing::info!(
            core = %core_path.display(),
            rom = %rom_path.display(),
            fps = av_info.timing.fps,
            "core started"
        );
        Ok(())
    }

    /// Releases the core in reverse order of `start`.
    pub fn shutdown(&mut self) {
        if let Some(core) = self.core.take() {
            unsafe {
                if self.game_loaded {
                    if let Some(unload_game) = core.unload_game {
                        unload_game();
                    }
                }
                (core.deinit)();
            }
            // Dropping `core` closes the library.
        }
        shared::teardown();
        self.running = false;
        self.game_loaded = false;
        self.rom_data = Vec::new();
        self.state_slot = Vec::new();
        self.av_info = SystemAvInfo::default();
    }

    /// True while a core session is active.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Path of the loaded ROM, if any.
    pub fn rom_path(&self) -> Option<&Path> {
        self.running.then_some(self.rom_path.as_path())
    }

    /// Runs a single emulated frame. Blocks the calling thread for the
    /// frame duration; callbacks (video, audio, input, vblank) fire
    /// inside this call.
    pub fn run_once(&mut self) {
        if !self.running {
            return;
        }
        if let Some(core) = &self.core {
            unsafe { (core.run)() };
        }
    }

    /// Frames-per-second reported by the core (0.0 if unknown).
    pub fn timing_fps(&self) -> f64 {
        self.av_info.timing.fps
    }

    /// Display aspect ratio reported by the core.
    pub fn display_aspect(&self) -> f32 {
        let geometry = &self.av_info.geometry;
        if geometry.aspect_ratio > 0.0 {
            geometry.aspect_ratio
        } else if geometry.base_height > 0 {
            geometry.base_width as f32 / geometry.base_height as f32
        } else {
            4.0 / 3.0
        }
    }

    /// Runs `f` against the most recent video frame (XRGB8888).
    pub fn with_frame<R>(&self, f: impl FnOnce(FrameRef<'_>) -> R) -> Option<R> {
        shared::with(|host| host.frame.frame().map(f)).flatten()
    }

    fn core(&self) -> Result<&CoreApi, HostError> {
        self.core.as_ref().ok_or_else(|| HostErrorKind::NotRunning.into())
    }

    // --- input -----------------------------------------------------------

    /// Access to the input recorder (record/playback flags, persistence).
    pub fn recorder(&self) -> &InputRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut InputRecorder {
        &mut self.recorder
    }

    /// Presses or releases a joypad button. `record_frame` is the frame
    /// the event applies before (callers pass `frame_counter + 1`).
    /// Ignored while playback owns the input stream.
    pub fn set_joypad(&mut self, record_frame: u64, port: u32, id: u32, pressed: bool) {
        if self.recorder.blocks_input() {
            return;
        }
        if port as usize >= abi::MAX_PORTS || id >= 32 {
            return;
        }
        shared::with_do(|host| host.ports.set_joypad(port, id, pressed));
        self.recorder
            .record_joypad(record_frame, port as u8, id as u8, pressed);
    }

    /// Releases every joypad button on every port.
    pub fn clear_joypads(&mut self, record_frame: u64) {
        if self.recorder.blocks_input() {
            return;
        }
        shared::with_do(|host| host.ports.clear_joypads());
        self.recorder.record_clear(record_frame);
    }

    /// Delivers a keyboard event to the core.
    pub fn send_key(
        &mut self,
        record_frame: u64,
        keycode: u32,
        character: u32,
        modifiers: u16,
        pressed: bool,
    ) {
        if self.recorder.blocks_input() {
            return;
        }
        let cb = shared::with(|host| {
            host.ports.set_key(keycode, pressed);
            host.keyboard_cb
        })
        .flatten();
        if let Some(cb) = cb {
            unsafe { cb(pressed, keycode, character, modifiers) };
        }
        self.recorder
            .record_key(record_frame, keycode, character, modifiers, pressed);
    }

    /// Dispatches every recorded event tagged with `frame_no` as if the
    /// user had performed it, before the frame runs.
    pub fn replay_frame(&mut self, frame_no: u64) {
        let events = self.recorder.events_for_frame(frame_no);
        if events.is_empty() {
            return;
        }
        self.recorder.set_injecting(true);
        for event in events {
            match event.kind {
                InputEventKind::JoypadPress { port, id, pressed } => {
                    self.set_joypad(frame_no, port as u32, id as u32, pressed)
                }
                InputEventKind::JoypadClear => self.clear_joypads(frame_no),
                InputEventKind::KeyEvent {
                    keycode,
                    character,
                    modifiers,
                    pressed,
                } => self.send_key(frame_no, keycode, character, modifiers, pressed),
            }
        }
        self.recorder.set_injecting(false);
    }

    // --- audio -----------------------------------------------------------

    /// Opens or closes the audio queue.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        if !self.running {
            return;
        }
        let sample_rate = self.av_info.timing.sample_rate as u32;
        let buffer_ms = self.audio_buffer_ms;
        shared::with_do(|host| {
            if enabled {
                host.audio.open(sample_rate, buffer_ms);
            } else {
                host.audio.close();
            }
        });
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// Moves queued PCM into `out` for the audio output.
    pub fn drain_audio(&mut self, out: &mut Vec<i16>, max_samples: usize) {
        shared::with_do(|host| host.audio.drain_into(out, max_samples));
    }

    // --- vblank ----------------------------------------------------------

    /// Installs the per-frame vblank hook. The hook fires inside
    /// [`run_once`](Self::run_once), once per emulated frame, and is the
    /// only synchronization point the state-history engine needs.
    pub fn set_vblank_hook(&mut self, hook: Box<dyn FnMut()>) -> Result<(), HostError> {
        let core = self.core()?;
        let register = core
            .set_vblank_callback
            .ok_or_else(|| HostError::unsupported("geo_set_vblank_callback"))?;
        shared::with_do(|host| host.vblank_hook = Some(hook));
        unsafe { register(shared::vblank_trampoline, std::ptr::null_mut()) };
        Ok(())
    }

    // --- serialization ---------------------------------------------------

    /// Size of the serialized emulator state, if the core supports
    /// serialization.
    pub fn serialize_size(&self) -> Option<usize> {
        let core = self.core.as_ref()?;
        let serialize_size = core.serialize_size?;
        let size = unsafe { serialize_size() };
        (size > 0).then_some(size)
    }

    /// Serializes the emulator state into `out`.
    pub fn serialize_to(&self, out: &mut [u8]) -> bool {
        let Some(core) = self.core.as_ref() else {
            return false;
        };
        let Some(serialize) = core.serialize else {
            return false;
        };
        !out.is_empty() && unsafe { serialize(out.as_mut_ptr() as *mut c_void, out.len()) }
    }

    /// Restores the emulator state from `data`.
    pub fn unserialize_from(&mut self, data: &[u8]) -> bool {
        let Some(core) = self.core.as_ref() else {
            return false;
        };
        let Some(unserialize) = core.unserialize else {
            return false;
        };
        !data.is_empty() && unsafe { unserialize(data.as_ptr() as *const c_void, data.len()) }
    }

    /// Seeds the in-bridge save-state slot (e.g. from a session
    /// snapshot).
    pub fn set_state_data(&mut self, data: &[u8]) {
        self.state_slot.clear();
        self.state_slot.extend_from_slice(data);
    }

    /// Serializes into the save-state slot, reporting how many bytes
    /// changed since the previous save of the same size.
    pub fn save_state(&mut self) -> Result<SaveStateInfo, HostError> {
        let size = self
            .serialize_size()
            .ok_or_else(|| HostError::unsupported("retro_serialize_size"))?;
        let prev = (self.state_slot.len() == size).then(|| self.state_slot.clone());
        self.state_slot.resize(size, 0);
        let mut slot = std::mem::take(&mut self.state_slot);
        let ok = self.serialize_to(&mut slot);
        self.state_slot = slot;
        if !ok {
            return Err(HostError::unsupported("retro_serialize"));
        }
        let diff_bytes = prev.map_or(0, |prev| {
            prev.iter()
                .zip(self.state_slot.iter())
                .filter(|(a, b)| a != b)
                .count()
        });
        Ok(SaveStateInfo { size, diff_bytes })
    }

    /// Restores the save-state slot into the core. Returns the state
    /// size.
    pub fn restore_state(&mut self) -> Result<usize, HostError> {
        if self.state_slot.is_empty() {
            return Err(HostErrorKind::NotRunning.into());
        }
        let slot = std::mem::take(&mut self.state_slot);
        let ok = self.unserialize_from(&slot);
        let size = slot.len();
        self.state_slot = slot;
        if ok {
            Ok(size)
        } else {
            Err(HostError::unsupported("retro_unserialize"))
        }
    }

    // --- debug surface ---------------------------------------------------

    /// Reads the register file. Returns the number of registers.
    pub fn read_regs(&self, out: &mut [u32]) -> Result<usize, HostError> {
        let read_regs = self
            .core()?
            .debug_read_regs
            .ok_or_else(|| HostError::unsupported("geo_debug_read_regs"))?;
        let count = unsafe { read_regs(out.as_mut_ptr(), out.len()) };
        Ok(count.min(out.len()))
    }

    pub fn pause(&self) -> Result<(), HostError> {
        let pause = self
            .core()?
            .debug_pause
            .ok_or_else(|| HostError::unsupported("geo_debug_pause"))?;
        unsafe { pause() };
        Ok(())
    }

    pub fn resume(&self) -> Result<(), HostError> {
        let resume = self
            .core()?
            .debug_resume
            .ok_or_else(|| HostError::unsupported("geo_debug_resume"))?;
        unsafe { resume() };
        Ok(())
    }

    pub fn is_paused(&self) -> Result<bool, HostError> {
        let is_paused = self
            .core()?
            .debug_is_paused
            .ok_or_else(|| HostError::unsupported("geo_debug_is_paused"))?;
        Ok(unsafe { is_paused() } != 0)
    }

    pub fn step_instr(&self) -> Result<(), HostError> {
        let step = self
            .core()?
            .debug_step_instr
            .ok_or_else(|| HostError::unsupported("geo_debug_step_instr"))?;
        unsafe { step() };
        Ok(())
    }

    pub fn step_line(&self) -> Result<(), HostError> {
        let step = self
            .core()?
            .debug_step_line
            .ok_or_else(|| HostError::unsupported("geo_debug_step_line"))?;
        unsafe { step() };
        Ok(())
    }

    pub fn step_next(&self) -> Result<(), HostError> {
        let step = self
            .core()?
            .debug_step_next
            .ok_or_else(|| HostError::unsupported("geo_debug_step_next"))?;
        unsafe { step() };
        Ok(())
    }

    pub fn add_breakpoint(&self, addr: u32) -> Result<(), HostError> {
        let add = self
            .core()?
            .debug_add_breakpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_add_breakpoint"))?;
        unsafe { add(addr) };
        Ok(())
    }

    pub fn remove_breakpoint(&self, addr: u32) -> Result<(), HostError> {
        let remove = self
            .core()?
            .debug_remove_breakpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_remove_breakpoint"))?;
        unsafe { remove(addr) };
        Ok(())
    }

    pub fn add_temp_breakpoint(&self, addr: u32) -> Result<(), HostError> {
        let add = self
            .core()?
            .debug_add_temp_breakpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_add_temp_breakpoint"))?;
        unsafe { add(addr) };
        Ok(())
    }

    pub fn remove_temp_breakpoint(&self, addr: u32) -> Result<(), HostError> {
        let remove = self
            .core()?
            .debug_remove_temp_breakpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_remove_temp_breakpoint"))?;
        unsafe { remove(addr) };
        Ok(())
    }

    pub fn reset_watchpoints(&self) -> Result<(), HostError> {
        let reset = self
            .core()?
            .debug_reset_watchpoints
            .ok_or_else(|| HostError::unsupported("geo_debug_reset_watchpoints"))?;
        unsafe { reset() };
        Ok(())
    }

    /// Installs a watchpoint; returns its stable table index.
    #[allow(clippy::too_many_arguments)]
    pub fn add_watchpoint(
        &self,
        addr: u32,
        op_mask: u32,
        diff: u32,
        value: u32,
        old_value: u32,
        size: u32,
        addr_mask: u32,
    ) -> Result<u32, HostError> {
        let add = self
            .core()?
            .debug_add_watchpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_add_watchpoint"))?;
        let index = unsafe { add(addr, op_mask, diff, value, old_value, size, addr_mask) };
        if index < 0 {
            return Err(HostError::with_context(
                HostErrorKind::Unsupported,
                "watchpoint table full",
            ));
        }
        Ok(index as u32)
    }

    pub fn remove_watchpoint(&self, index: u32) -> Result<(), HostError> {
        let remove = self
            .core()?
            .debug_remove_watchpoint
            .ok_or_else(|| HostError::unsupported("geo_debug_remove_watchpoint"))?;
        unsafe { remove(index) };
        Ok(())
    }

    pub fn read_watchpoints(&self, out: &mut [Watchpoint]) -> Result<usize, HostError> {
        let read = self
            .core()?
            .debug_read_watchpoints
            .ok_or_else(|| HostError::unsupported("geo_debug_read_watchpoints"))?;
        let count = unsafe { read(out.as_mut_ptr(), out.len()) };
        Ok(count.min(out.len()))
    }

    pub fn watchpoint_enabled_mask(&self) -> Result<u64, HostError> {
        let get = self
            .core()?
            .debug_get_watchpoint_enabled_mask
            .ok_or_else(|| HostError::unsupported("geo_debug_get_watchpoint_enabled_mask"))?;
        Ok(unsafe { get() })
    }

    pub fn set_watchpoint_enabled_mask(&self, mask: u64) -> Result<(), HostError> {
        let set = self
            .core()?
            .debug_set_watchpoint_enabled_mask
            .ok_or_else(|| HostError::unsupported("geo_debug_set_watchpoint_enabled_mask"))?;
        unsafe { set(mask) };
        Ok(())
    }

    /// Pops the pending watchbreak, if the core reported one.
    pub fn consume_watchbreak(&self) -> Result<Option<Watchbreak>, HostError> {
        let consume = self
            .core()?
            .debug_consume_watchbreak
            .ok_or_else(|| HostError::unsupported("geo_debug_consume_watchbreak"))?;
        let mut out = Watchbreak::default();
        let pending = unsafe { consume(&mut out) } != 0;
        Ok(pending.then_some(out))
    }

    pub fn reset_protects(&self) -> Result<(), HostError> {
        let reset = self
            .core()?
            .debug_reset_protects
            .ok_or_else(|| HostError::unsupported("geo_debug_reset_protects"))?;
        unsafe { reset() };
        Ok(())
    }

    /// Installs a protect entry; returns its stable table index.
    pub fn add_protect(
        &self,
        addr: u32,
        size_bits: u32,
        mode: u32,
        value: u32,
    ) -> Result<u32, HostError> {
        let add = self
            .core()?
            .debug_add_protect
            .ok_or_else(|| HostError::unsupported("geo_debug_add_protect"))?;
        let index = unsafe { add(addr, size_bits, mode, value) };
        if index < 0 {
            return Err(HostError::with_context(
                HostErrorKind::Unsupported,
                "protect table full",
            ));
        }
        Ok(index as u32)
    }

    pub fn remove_protect(&self, index: u32) -> Result<(), HostError> {
        let remove = self
            .core()?
            .debug_remove_protect
            .ok_or_else(|| HostError::unsupported("geo_debug_remove_protect"))?;
        unsafe { remove(index) };
        Ok(())
    }

    pub fn read_protects(&self, out: &mut [ProtectEntry]) -> Result<usize, HostError> {
        let read = self
            .core()?
            .debug_read_protects
            .ok_or_else(|| HostError::unsupported("geo_debug_read_protects"))?;
        let count = unsafe { read(out.as_mut_ptr(), out.len()) };
        Ok(count.min(out.len()))
    }

    pub fn protect_enabled_mask(&self) -> Result<u64, HostError> {
        let get = self
            .core()?
            .debug_get_protect_enabled_mask
            .ok_or_else(|| HostError::unsupported("geo_debug_get_protect_enabled_mask"))?;
        Ok(unsafe { get() })
    }

    pub fn set_protect_enabled_mask(&self, mask: u64) -> Result<(), HostError> {
        let set = self
            .core()?
            .debug_set_protect_enabled_mask
            .ok_or_else(|| HostError::unsupported("geo_debug_set_protect_enabled_mask"))?;
        unsafe { set(mask) };
        Ok(())
    }

    /// Reads the guest call stack (return addresses, innermost first).
    pub fn read_callstack(&self, out: &mut [u32]) -> Result<usize, HostError> {
        let read = self
            .core()?
            .debug_read_callstack
            .ok_or_else(|| HostError::unsupported("geo_debug_read_callstack"))?;
        let count = unsafe { read(out.as_mut_ptr(), out.len()) };
        Ok(count.min(out.len()))
    }

    /// Reads `out.len()` bytes of guest memory at `addr`.
    pub fn read_memory(&self, addr: u32, out: &mut [u8]) -> Result<(), HostError> {
        let read = self
            .core()?
            .debug_read_memory
            .ok_or_else(|| HostError::unsupported("geo_debug_read_memory"))?;
        let got = unsafe { read(addr, out.as_mut_ptr(), out.len()) };
        if got == out.len() {
            Ok(())
        } else {
            Err(HostError::with_context(
                HostErrorKind::Memory,
                format!("read of {} bytes at 0x{addr:06X} failed", out.len()),
            ))
        }
    }

    /// Writes a value of the given width to guest memory.
    pub fn write_memory(&self, addr: u32, value: u32, width: AccessWidth) -> Result<(), HostError> {
        let write = self
            .core()?
            .debug_write_memory
            .ok_or_else(|| HostError::unsupported("geo_debug_write_memory"))?;
        if unsafe { write(addr, value, width.bytes()) } != 0 {
            Ok(())
        } else {
            Err(HostError::with_context(
                HostErrorKind::Memory,
                format!("write of 0x{value:X} to 0x{addr:06X} rejected"),
            ))
        }
    }

    /// Direct view of a core memory region (e.g. system RAM). Valid until
    /// the next core call.
    pub fn memory_region(&self, id: u32) -> Option<&[u8]> {
        let core = self.core.as_ref()?;
        if !self.game_loaded {
            return None;
        }
        let data = unsafe { core.get_memory_data?(id) };
        let size = unsafe { core.get_memory_size?(id) };
        if data.is_null() || size == 0 {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(data as *const u8, size) })
    }

    /// System RAM, if the core exposes it.
    pub fn system_ram(&self) -> Option<&[u8]> {
        self.memory_region(abi::MEMORY_SYSTEM_RAM)
    }

    /// Resets the core, re-arming the BIOS-logo auto-press if
    /// configured.
    pub fn reset_core(&mut self) -> Result<(), HostError> {
        let reset = self
            .core()?
            .reset
            .ok_or_else(|| HostError::unsupported("retro_reset"))?;
        unsafe { reset() };
        let skip = self.skip_bios_logo;
        shared::with_do(move |host| {
            if skip {
                host.ports.schedule_auto_press(80, 3);
            } else {
                host.ports.schedule_auto_press(0, 0);
            }
        });
        Ok(())
    }

    /// The sprite engine's VRAM, if the core exposes it. Valid until the
    /// next core call.
    pub fn sprite_vram(&self) -> Result<&[u16], HostError> {
        let get = self
            .core()?
            .debug_get_sprite_state
            .ok_or_else(|| HostError::unsupported("geo_debug_get_sprite_state"))?;
        let mut state = abi::SpriteState {
            vram: std::ptr::null(),
            vram_words: 0,
        };
        let got = unsafe { get(&mut state, std::mem::size_of::<abi::SpriteState>()) };
        if got == 0 || state.vram.is_null() || state.vram_words == 0 {
            return Err(HostErrorKind::Memory.into());
        }
        Ok(unsafe { std::slice::from_raw_parts(state.vram, state.vram_words) })
    }

    /// The cartridge's program ROM region, if the core exposes it. Valid
    /// until the next core call.
    pub fn p1_rom(&self) -> Result<&[u8], HostError> {
        let get = self
            .core()?
            .debug_get_p1_rom
            .ok_or_else(|| HostError::unsupported("geo_debug_get_p1_rom"))?;
        let mut region = abi::RomRegion {
            data: std::ptr::null(),
            size: 0,
        };
        let got = unsafe { get(&mut region, std::mem::size_of::<abi::RomRegion>()) };
        if got == 0 || region.data.is_null() || region.size == 0 {
            return Err(HostErrorKind::Memory.into());
        }
        Ok(unsafe { std::slice::from_raw_parts(region.data, region.size) })
    }

    /// Drains pending core debug text into `out`; returns bytes read.
    pub fn debug_text_read(&self, out: &mut [u8]) -> usize {
        let Some(core) = self.core.as_ref() else {
            return 0;
        };
        let Some(read) = core.debug_text_read else {
            return 0;
        };
        unsafe { read(out.as_mut_ptr() as *mut _, out.len()) }
    }

    /// Disassembles the instruction at `pc`. Returns the text and the
    /// instruction length in bytes.
    pub fn disassemble_quick(&self, pc: u32) -> Result<(String, usize), HostError> {
        let disassemble = self
            .core()?
            .debug_disassemble_quick
            .ok_or_else(|| HostError::unsupported("geo_debug_disassemble_quick"))?;
        let mut buf = [0u8; 256];
        let len = unsafe { disassemble(pc, buf.as_mut_ptr() as *mut _, buf.len()) };
        if len == 0 {
            return Err(HostError::with_context(
                HostErrorKind::Memory,
                format!("cannot disassemble at 0x{pc:06X}"),
            ));
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok((String::from_utf8_lossy(&buf[..end]).into_owned(), len))
    }

    pub fn read_checkpoints(&self, out: &mut [Checkpoint]) -> Result<usize, HostError> {
        let read = self
            .core()?
            .debug_read_checkpoints
            .ok_or_else(|| HostError::unsupported("geo_debug_read_checkpoints"))?;
        let bytes = unsafe { read(out.as_mut_ptr(), std::mem::size_of_val(out)) };
        Ok((bytes / std::mem::size_of::<Checkpoint>()).min(out.len()))
    }

    pub fn reset_checkpoints(&self) -> Result<(), HostError> {
        let reset = self
            .core()?
            .debug_reset_checkpoints
            .ok_or_else(|| HostError::unsupported("geo_debug_reset_checkpoints"))?;
        unsafe { reset() };
        Ok(())
    }

    pub fn set_checkpoint_enabled(&self, enabled: bool) -> Result<(), HostError> {
        let set = self
            .core()?
            .debug_set_checkpoint_enabled
            .ok_or_else(|| HostError::unsupported("geo_debug_set_checkpoint_enabled"))?;
        unsafe { set(enabled as i32) };
        Ok(())
    }

    pub fn checkpoint_enabled(&self) -> Result<bool, HostError> {
        let get = self
            .core()?
            .debug_get_checkpoint_enabled
            .ok_or_else(|| HostError::unsupported("geo_debug_get_checkpoint_enabled"))?;
        Ok(unsafe { get() } != 0)
    }

    pub fn read_cycle_count(&self) -> Result<u64, HostError> {
        let read = self
            .core()?
            .debug_read_cycle_count
            .ok_or_else(|| HostError::unsupported("geo_debug_read_cycle_count"))?;
        Ok(unsafe { read() })
    }

    pub fn profiler_start(&self, stream: bool) -> Result<(), HostError> {
        let start = self
            .core()?
            .profiler_start
            .ok_or_else(|| HostError::unsupported("geo_debug_profiler_start"))?;
        unsafe { start(stream as i32) };
        Ok(())
    }

    pub fn profiler_stop(&self) -> Result<(), HostError> {
        let stop = self
            .core()?
            .profiler_stop
            .ok_or_else(|| HostError::unsupported("geo_debug_profiler_stop"))?;
        unsafe { stop() };
        Ok(())
    }

    pub fn profiler_is_enabled(&self) -> Result<bool, HostError> {
        let is_enabled = self
            .core()?
            .profiler_is_enabled
            .ok_or_else(|| HostError::unsupported("geo_debug_profiler_is_enabled"))?;
        Ok(unsafe { is_enabled() } != 0)
    }

    /// Pops the next profiler stream packet, if any.
    pub fn profiler_stream_next(&self) -> Result<Option<Vec<u8>>, HostError> {
        let next = self
            .core()?
            .profiler_stream_next
            .ok_or_else(|| HostError::unsupported("geo_debug_profiler_stream_next"))?;
        let mut buf = vec![0u8; 4096];
        let len = unsafe { next(buf.as_mut_ptr() as *mut _, buf.len()) };
        if len == 0 {
            return Ok(None);
        }
        buf.truncate(len.min(4096));
        Ok(Some(buf))
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        if self.core.is_some() {
            self.shutdown();
        }
    }
}

impl StateSource for HostBridge {
    fn serialize_size(&mut self) -> Option<usize> {
        HostBridge::serialize_size(self)
    }

    fn serialize(&mut self, out: &mut [u8]) -> bool {
        self.serialize_to(out)
    }

    fn unserialize(&mut self, data: &[u8]) -> bool {
        self.unserialize_from(data)
    }
}
