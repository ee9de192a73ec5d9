//! The dynamically resolved core ABI.
//!
//! This module mirrors the subset of the libretro API the debugger uses,
//! plus the `geo_debug_*` debug extension exported by instrumented cores.
//! [`CoreApi`] owns the loaded library and the raw function pointers
//! resolved from it; the pointers stay valid for as long as the `CoreApi`
//! (and therefore the library mapping) is alive.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::path::Path;

use libloading::Library;

use crate::{HostError, HostErrorKind};

// Environment command numbers from libretro.h.
pub const ENV_SET_ROTATION: u32 = 1;
pub const ENV_SET_MESSAGE: u32 = 6;
pub const ENV_SET_PERFORMANCE_LEVEL: u32 = 8;
pub const ENV_GET_SYSTEM_DIRECTORY: u32 = 9;
pub const ENV_SET_PIXEL_FORMAT: u32 = 10;
pub const ENV_SET_INPUT_DESCRIPTORS: u32 = 11;
pub const ENV_SET_KEYBOARD_CALLBACK: u32 = 12;
pub const ENV_GET_VARIABLE: u32 = 15;
pub const ENV_SET_VARIABLES: u32 = 16;
pub const ENV_GET_VARIABLE_UPDATE: u32 = 17;
pub const ENV_SET_SUPPORT_NO_GAME: u32 = 18;
pub const ENV_GET_LOG_INTERFACE: u32 = 27;
pub const ENV_GET_SAVE_DIRECTORY: u32 = 31;
pub const ENV_GET_CORE_OPTIONS_VERSION: u32 = 52;
pub const ENV_SET_CORE_OPTIONS: u32 = 53;
pub const ENV_SET_CORE_OPTIONS_INTL: u32 = 54;
pub const ENV_SET_CORE_OPTIONS_DISPLAY: u32 = 55;
pub const ENV_SET_CORE_OPTIONS_UPDATE_DISPLAY_CALLBACK: u32 = 69;
pub const ENV_SET_VARIABLE: u32 = 70;

pub const DEVICE_JOYPAD: u32 = 1;
pub const DEVICE_KEYBOARD: u32 = 3;

pub const PIXEL_FORMAT_0RGB1555: u32 = 0;
pub const PIXEL_FORMAT_XRGB8888: u32 = 1;
pub const PIXEL_FORMAT_RGB565: u32 = 2;

pub const MEMORY_SYSTEM_RAM: u32 = 2;

/// Upper bound of the libretro keycode space (`RETROK_LAST`).
pub const KEY_LAST: usize = 324;

pub const LOG_DEBUG: u32 = 0;
pub const LOG_INFO: u32 = 1;

/// Number of joypad ports the host tracks.
pub const MAX_PORTS: usize = 4;

/// Size of the core-side watchpoint table.
pub const WATCHPOINT_COUNT: usize = 64;

/// Size of the core-side protect table.
pub const PROTECT_COUNT: usize = 64;

/// Size of the core-side checkpoint table.
pub const CHECKPOINT_COUNT: usize = 64;

/// Watchpoint trigger flags (`op_mask` bits).
pub mod watch_op {
    /// Fire on reads.
    pub const READ: u32 = 1 << 0;
    /// Fire on writes.
    pub const WRITE: u32 = 1 << 1;
    /// Only fire for accesses of `size` bits.
    pub const ACCESS_SIZE: u32 = 1 << 2;
    /// Compare `addr & addr_mask` instead of the exact address. A mask of
    /// zero matches every address.
    pub const ADDR_COMPARE_MASK: u32 = 1 << 3;
    /// Only fire when the written/read value equals `value`.
    pub const VALUE_EQ: u32 = 1 << 4;
    /// Only fire when the previous memory value equals `old_value`.
    pub const OLD_VALUE_EQ: u32 = 1 << 5;
    /// Only fire when the value actually changes.
    pub const VALUE_NEQ_OLD: u32 = 1 << 6;
}

/// Access kind reported in a [`Watchbreak`].
pub const WATCH_ACCESS_READ: u32 = 0;
pub const WATCH_ACCESS_WRITE: u32 = 1;

/// Protect modes.
pub const PROTECT_MODE_BLOCK: u32 = 0;
pub const PROTECT_MODE_SET: u32 = 1;

/// One entry of the core-side watchpoint table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watchpoint {
    pub addr: u32,
    pub op_mask: u32,
    pub size: u32,
    pub addr_mask: u32,
    pub value: u32,
    pub old_value: u32,
    pub diff: u32,
}

/// A debug event emitted by the core when a watchpoint fires.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Watchbreak {
    pub index: u32,
    pub access_kind: u32,
    pub access_addr: u32,
    pub value: u32,
    pub old_value: u32,
    pub old_value_valid: u32,
}

impl Watchbreak {
    /// The previous memory value, when the core reported one.
    pub fn old_value(&self) -> Option<u32> {
        (self.old_value_valid != 0).then_some(self.old_value)
    }

    /// True if the break was triggered by a write.
    pub fn is_write(&self) -> bool {
        self.access_kind == WATCH_ACCESS_WRITE
    }
}

/// One entry of the core-side protect table.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtectEntry {
    pub addr: u32,
    pub size_bits: u32,
    pub mode: u32,
    pub value: u32,
    pub addr_mask: u32,
}

/// One profiler checkpoint counter.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Checkpoint {
    pub count: u64,
    pub average: u64,
    pub minimum: u64,
    pub maximum: u64,
}

/// Sprite-engine state reported by the core. The VRAM pointer is owned
/// by the core and valid until the next core call.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SpriteState {
    pub vram: *const u16,
    pub vram_words: usize,
}

/// A directly mapped ROM region owned by the core.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RomRegion {
    pub data: *const u8,
    pub size: usize,
}

#[repr(C)]
pub struct GameInfo {
    pub path: *const c_char,
    pub data: *const c_void,
    pub size: usize,
    pub meta: *const c_char,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GameGeometry {
    pub base_width: u32,
    pub base_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub aspect_ratio: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTiming {
    pub fps: f64,
    pub sample_rate: f64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAvInfo {
    pub geometry: GameGeometry,
    pub timing: SystemTiming,
}

#[repr(C)]
pub struct Variable {
    pub key: *const c_char,
    pub value: *const c_char,
}

#[repr(C)]
pub struct Message {
    pub msg: *const c_char,
    pub frames: u32,
}

#[repr(C)]
pub struct LogCallback {
    pub log: LogPrintFn,
}

#[repr(C)]
pub struct KeyboardCallback {
    pub callback: KeyboardEventFn,
}

/// Maximum values per core option definition (from libretro.h).
pub const NUM_CORE_OPTION_VALUES_MAX: usize = 128;

#[repr(C)]
pub struct CoreOptionValue {
    pub value: *const c_char,
    pub label: *const c_char,
}

#[repr(C)]
pub struct CoreOptionDefinition {
    pub key: *const c_char,
    pub desc: *const c_char,
    pub info: *const c_char,
    pub values: [CoreOptionValue; NUM_CORE_OPTION_VALUES_MAX],
    pub default_value: *const c_char,
}

#[repr(C)]
pub struct CoreOptionsIntl {
    pub us: *const CoreOptionDefinition,
    pub local: *const CoreOptionDefinition,
}

pub type EnvironmentFn = unsafe extern "C" fn(cmd: u32, data: *mut c_void) -> bool;
pub type VideoRefreshFn =
    unsafe extern "C" fn(data: *const c_void, width: u32, height: u32, pitch: usize);
pub type AudioSampleFn = unsafe extern "C" fn(left: i16, right: i16);
pub type AudioSampleBatchFn = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
pub type InputPollFn = unsafe extern "C" fn();
pub type InputStateFn = unsafe extern "C" fn(port: u32, device: u32, index: u32, id: u32) -> i16;
// Declared variadic in libretro.h; the host-side printer only reads the
// fixed arguments and prints the format string verbatim.
pub type LogPrintFn = unsafe extern "C" fn(level: u32, fmt: *const c_char);
pub type KeyboardEventFn =
    unsafe extern "C" fn(down: bool, keycode: u32, character: u32, key_modifiers: u16);
pub type VblankFn = unsafe extern "C" fn(user: *mut c_void);

type SetEnvironmentFn = unsafe extern "C" fn(EnvironmentFn);
type SetVideoRefreshFn = unsafe extern "C" fn(VideoRefreshFn);
type SetAudioSampleFn = unsafe extern "C" fn(AudioSampleFn);
type SetAudioSampleBatchFn = unsafe extern "C" fn(AudioSampleBatchFn);
type SetInputPollFn = unsafe extern "C" fn(InputPollFn);
type SetInputStateFn = unsafe extern "C" fn(InputStateFn);
type InitFn = unsafe extern "C" fn();
type DeinitFn = unsafe extern "C" fn();
type LoadGameFn = unsafe extern "C" fn(*const GameInfo) -> bool;
type UnloadGameFn = unsafe extern "C" fn();
type RunFn = unsafe extern "C" fn();
type ResetFn = unsafe extern "C" fn();
type GetSystemAvInfoFn = unsafe extern "C" fn(*mut SystemAvInfo);
type GetMemoryDataFn = unsafe extern "C" fn(id: u32) -> *mut c_void;
type GetMemorySizeFn = unsafe extern "C" fn(id: u32) -> usize;
type SerializeSizeFn = unsafe extern "C" fn() -> usize;
type SerializeFn = unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool;
type UnserializeFn = unsafe extern "C" fn(data: *const c_void, size: usize) -> bool;

type DebugReadRegsFn = unsafe extern "C" fn(out: *mut u32, cap: usize) -> usize;
type DebugVoidFn = unsafe extern "C" fn();
type DebugIsPausedFn = unsafe extern "C" fn() -> i32;
type DebugAddrFn = unsafe extern "C" fn(addr: u32);
type DebugAddWatchpointFn = unsafe extern "C" fn(
    addr: u32,
    op_mask: u32,
    diff_operand: u32,
    value_operand: u32,
    old_value_operand: u32,
    size_operand: u32,
    addr_mask_operand: u32,
) -> i32;
type DebugRemoveIndexFn = unsafe extern "C" fn(index: u32);
type DebugReadWatchpointsFn = unsafe extern "C" fn(out: *mut Watchpoint, cap: usize) -> usize;
type DebugGetMaskFn = unsafe extern "C" fn() -> u64;
type DebugSetMaskFn = unsafe extern "C" fn(mask: u64);
type DebugConsumeWatchbreakFn = unsafe extern "C" fn(out: *mut Watchbreak) -> i32;
type DebugAddProtectFn =
    unsafe extern "C" fn(addr: u32, size_bits: u32, mode: u32, value: u32) -> i32;
type DebugReadProtectsFn = unsafe extern "C" fn(out: *mut ProtectEntry, cap: usize) -> usize;
type DebugReadCallstackFn = unsafe extern "C" fn(out: *mut u32, cap: usize) -> usize;
type DebugReadMemoryFn = unsafe extern "C" fn(addr: u32, out: *mut u8, cap: usize) -> usize;
type DebugWriteMemoryFn = unsafe extern "C" fn(addr: u32, value: u32, size: usize) -> i32;
type DebugTextReadFn = unsafe extern "C" fn(out: *mut c_char, cap: usize) -> usize;
type DebugGetSpriteStateFn = unsafe extern "C" fn(out: *mut SpriteState, cap: usize) -> usize;
type DebugGetP1RomFn = unsafe extern "C" fn(out: *mut RomRegion, cap: usize) -> usize;
type DebugDisassembleQuickFn =
    unsafe extern "C" fn(pc: u32, out: *mut c_char, cap: usize) -> usize;
type DebugReadCheckpointsFn = unsafe extern "C" fn(out: *mut Checkpoint, cap: usize) -> usize;
type DebugSetEnabledFn = unsafe extern "C" fn(enabled: i32);
type DebugGetEnabledFn = unsafe extern "C" fn() -> i32;
type DebugReadCycleCountFn = unsafe extern "C" fn() -> u64;
type ProfilerStartFn = unsafe extern "C" fn(stream: i32);
type ProfilerStreamNextFn = unsafe extern "C" fn(out: *mut c_char, cap: usize) -> usize;
type SetVblankCallbackFn = unsafe extern "C" fn(cb: VblankFn, user: *mut c_void);

macro_rules! resolve_required {
    ($lib:expr, $name:literal) => {{
        let symbol = unsafe { $lib.get(concat!($name, "\0").as_bytes()) }.map_err(|e| {
            HostError::new(HostErrorKind::Load, e)
        })?;
        *symbol
    }};
}

macro_rules! resolve_optional {
    ($lib:expr, $name:literal) => {{
        match unsafe { $lib.get(concat!($name, "\0").as_bytes()) } {
            Ok(symbol) => Some(*symbol),
            Err(_) => {
                tracing::debug!(symbol = $name, "core does not export symbol");
                None
            }
        }
    }};
}

/// The resolved core entry points.
///
/// Raw function pointers extracted from the library; `_lib` keeps the
/// mapping alive for as long as the pointers are used.
pub struct CoreApi {
    _lib: Library,

    pub set_environment: SetEnvironmentFn,
    pub set_video_refresh: SetVideoRefreshFn,
    pub set_audio_sample: Option<SetAudioSampleFn>,
    pub set_audio_sample_batch: Option<SetAudioSampleBatchFn>,
    pub set_input_poll: SetInputPollFn,
    pub set_input_state: SetInputStateFn,
    pub init: InitFn,
    pub deinit: DeinitFn,
    pub load_game: LoadGameFn,
    pub unload_game: Option<UnloadGameFn>,
    pub run: RunFn,
    pub reset: Option<ResetFn>,
    pub get_system_av_info: GetSystemAvInfoFn,
    pub get_memory_data: Option<GetMemoryDataFn>,
    pub get_memory_size: Option<GetMemorySizeFn>,
    pub serialize_size: Option<SerializeSizeFn>,
    pub serialize: Option<SerializeFn>,
    pub unserialize: Option<UnserializeFn>,

    pub debug_read_regs: Option<DebugReadRegsFn>,
    pub debug_pause: Option<DebugVoidFn>,
    pub debug_resume: Option<DebugVoidFn>,
    pub debug_is_paused: Option<DebugIsPausedFn>,
    pub debug_step_instr: Option<DebugVoidFn>,
    pub debug_step_line: Option<DebugVoidFn>,
    pub debug_step_next: Option<DebugVoidFn>,
    pub debug_add_breakpoint: Option<DebugAddrFn>,
    pub debug_remove_breakpoint: Option<DebugAddrFn>,
    pub debug_add_temp_breakpoint: Option<DebugAddrFn>,
    pub debug_remove_temp_breakpoint: Option<DebugAddrFn>,
    pub debug_reset_watchpoints: Option<DebugVoidFn>,
    pub debug_add_watchpoint: Option<DebugAddWatchpointFn>,
    pub debug_remove_watchpoint: Option<DebugRemoveIndexFn>,
    pub debug_read_watchpoints: Option<DebugReadWatchpointsFn>,
    pub debug_get_watchpoint_enabled_mask: Option<DebugGetMaskFn>,
    pub debug_set_watchpoint_enabled_mask: Option<DebugSetMaskFn>,
    pub debug_consume_watchbreak: Option<DebugConsumeWatchbreakFn>,
    pub debug_reset_protects: Option<DebugVoidFn>,
    pub debug_add_protect: Option<DebugAddProtectFn>,
    pub debug_remove_protect: Option<DebugRemoveIndexFn>,
    pub debug_read_protects: Option<DebugReadProtectsFn>,
    pub debug_get_protect_enabled_mask: Option<DebugGetMaskFn>,
    pub debug_set_protect_enabled_mask: Option<DebugSetMaskFn>,
    pub debug_read_callstack: Option<DebugReadCallstackFn>,
    pub debug_read_memory: Option<DebugReadMemoryFn>,
    pub debug_write_memory: Option<DebugWriteMemoryFn>,
    pub debug_text_read: Option<DebugTextReadFn>,
    pub debug_get_sprite_state: Option<DebugGetSpriteStateFn>,
    pub debug_get_p1_rom: Option<DebugGetP1RomFn>,
    pub debug_disassemble_quick: Option<DebugDisassembleQuickFn>,
    pub debug_read_checkpoints: Option<DebugReadCheckpointsFn>,
    pub debug_reset_checkpoints: Option<DebugVoidFn>,
    pub debug_set_checkpoint_enabled: Option<DebugSetEnabledFn>,
    pub debug_get_checkpoint_enabled: Option<DebugGetEnabledFn>,
    pub debug_read_cycle_count: Option<DebugReadCycleCountFn>,
    pub profiler_start: Option<ProfilerStartFn>,
    pub profiler_stop: Option<DebugVoidFn>,
    pub profiler_is_enabled: Option<DebugGetEnabledFn>,
    pub profiler_stream_next: Option<ProfilerStreamNextFn>,
    pub set_vblank_callback: Option<SetVblankCallbackFn>,
}

impl CoreApi {
    /// Loads the core library and resolves its symbol set.
    ///
    /// Fails with a [`Load`](HostErrorKind::Load) error if the library
    /// cannot be opened or one of the mandatory libretro entry points is
    /// missing; optional symbols merely downgrade their capability.
    pub fn load(core_path: &Path) -> Result<Self, HostError> {
        let lib = unsafe { Library::new(core_path) }?;

        Ok(Self {
            set_environment: resolve_required!(lib, "retro_set_environment"),
            set_video_refresh: resolve_required!(lib, "retro_set_video_refresh"),
            set_audio_sample: resolve_optional!(lib, "retro_set_audio_sample"),
            set_audio_sample_batch: resolve_optional!(lib, "retro_set_audio_sample_batch"),
            set_input_poll: resolve_required!(lib, "retro_set_input_poll"),
            set_input_state: resolve_required!(lib, "retro_set_input_state"),
            init: resolve_required!(lib, "retro_init"),
            deinit: resolve_required!(lib, "retro_deinit"),
            load_game: resolve_required!(lib, "retro_load_game"),
            unload_game: resolve_optional!(lib, "retro_unload_game"),
            run: resolve_required!(lib, "retro_run"),
            reset: resolve_optional!(lib, "retro_reset"),
            get_system_av_info: resolve_required!(lib, "retro_get_system_av_info"),
            get_memory_data: resolve_optional!(lib, "retro_get_memory_data"),
            get_memory_size: resolve_optional!(lib, "retro_get_memory_size"),
            serialize_size: resolve_optional!(lib, "retro_serialize_size"),
            serialize: resolve_optional!(lib, "retro_serialize"),
            unserialize: resolve_optional!(lib, "retro_unserialize"),

            debug_read_regs: resolve_optional!(lib, "geo_debug_read_regs"),
            debug_pause: resolve_optional!(lib, "geo_debug_pause"),
            debug_resume: resolve_optional!(lib, "geo_debug_resume"),
            debug_is_paused: resolve_optional!(lib, "geo_debug_is_paused"),
            debug_step_instr: resolve_optional!(lib, "geo_debug_step_instr"),
            debug_step_line: resolve_optional!(lib, "geo_debug_step_line"),
            debug_step_next: resolve_optional!(lib, "geo_debug_step_next"),
            debug_add_breakpoint: resolve_optional!(lib, "geo_debug_add_breakpoint"),
            debug_remove_breakpoint: resolve_optional!(lib, "geo_debug_remove_breakpoint"),
            debug_add_temp_breakpoint: resolve_optional!(lib, "geo_debug_add_temp_breakpoint"),
            debug_remove_temp_breakpoint: resolve_optional!(
                lib,
                "geo_debug_remove_temp_breakpoint"
            ),
            debug_reset_watchpoints: resolve_optional!(lib, "geo_debug_reset_watchpoints"),
            debug_add_watchpoint: resolve_optional!(lib, "geo_debug_add_watchpoint"),
            debug_remove_watchpoint: resolve_optional!(lib, "geo_debug_remove_watchpoint"),
            debug_read_watchpoints: resolve_optional!(lib, "geo_debug_read_watchpoints"),
            debug_get_watchpoint_enabled_mask: resolve_optional!(
                lib,
                "geo_debug_get_watchpoint_enabled_mask"
            ),
            debug_set_watchpoint_enabled_mask: resolve_optional!(
                lib,
                "geo_debug_set_watchpoint_enabled_mask"
            ),
            debug_consume_watchbreak: resolve_optional!(lib, "geo_debug_consume_watchbreak"),
            debug_reset_protects: resolve_optional!(lib, "geo_debug_reset_protects"),
            debug_add_protect: resolve_optional!(lib, "geo_debug_add_protect"),
            debug_remove_protect: resolve_optional!(lib, "geo_debug_remove_protect"),
            debug_read_protects: resolve_optional!(lib, "geo_debug_read_protects"),
            debug_get_protect_enabled_mask: resolve_optional!(
                lib,
                "geo_debug_get_protect_enabled_mask"
            ),
            debug_set_protect_enabled_mask: resolve_optional!(
                lib,
                "geo_debug_set_protect_enabled_mask"
            ),
            debug_read_callstack: resolve_optional!(lib, "geo_debug_read_callstack"),
            debug_read_memory: resolve_optional!(lib, "geo_debug_read_memory"),
            debug_write_memory: resolve_optional!(lib, "geo_debug_write_memory"),
            debug_text_read: resolve_optional!(lib, "geo_debug_text_read"),
            debug_get_sprite_state: resolve_optional!(lib, "geo_debug_get_sprite_state"),
            debug_get_p1_rom: resolve_optional!(lib, "geo_debug_get_p1_rom"),
            debug_disassemble_quick: resolve_optional!(lib, "geo_debug_disassemble_quick"),
            debug_read_checkpoints: resolve_optional!(lib, "geo_debug_read_checkpoints"),
            debug_reset_checkpoints: resolve_optional!(lib, "geo_debug_reset_checkpoints"),
            debug_set_checkpoint_enabled: resolve_optional!(
                lib,
                "geo_debug_set_checkpoint_enabled"
            ),
            debug_get_checkpoint_enabled: resolve_optional!(
                lib,
                "geo_debug_get_checkpoint_enabled"
            ),
            debug_read_cycle_count: resolve_optional!(lib, "geo_debug_read_cycle_count"),
            profiler_start: resolve_optional!(lib, "geo_debug_profiler_start"),
            profiler_stop: resolve_optional!(lib, "geo_debug_profiler_stop"),
            profiler_is_enabled: resolve_optional!(lib, "geo_debug_profiler_is_enabled"),
            profiler_stream_next: resolve_optional!(lib, "geo_debug_profiler_stream_next"),
            set_vblank_callback: resolve_optional!(lib, "geo_set_vblank_callback"),
            _lib: lib,
        })
    }
}
