//! Callback-visible host state.
//!
//! The core calls back into the host while `retro_run` executes, through
//! plain C function pointers that cannot carry a context argument. The
//! state those thunks touch lives in a thread-local cell: the run loop is
//! single-threaded, the process hosts one core at a time, and the cell is
//! installed by `HostBridge::start` and cleared by `HostBridge::shutdown`.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

use crate::abi::{self, KeyboardCallback, KeyboardEventFn, LogCallback};
use crate::audio::AudioQueue;
use crate::input::InputPorts;
use crate::options::OptionStore;
use crate::video::{FrameBuffer, PixelFormat};

pub(crate) struct HostShared {
    pub frame: FrameBuffer,
    pub audio: AudioQueue,
    pub ports: InputPorts,
    pub options: OptionStore,
    pub pixel_format: PixelFormat,
    pub system_dir: CString,
    pub save_dir: CString,
    pub keyboard_cb: Option<KeyboardEventFn>,
    pub vblank_hook: Option<Box<dyn FnMut()>>,
}

impl HostShared {
    pub fn new(system_dir: CString, save_dir: CString, options: OptionStore) -> Self {
        Self {
            frame: FrameBuffer::default(),
            audio: AudioQueue::default(),
            ports: InputPorts::default(),
            options,
            pixel_format: PixelFormat::Xrgb8888,
            system_dir,
            save_dir,
            keyboard_cb: None,
            vblank_hook: None,
        }
    }
}

thread_local! {
    static HOST: RefCell<Option<HostShared>> = const { RefCell::new(None) };
}

pub(crate) fn install(shared: HostShared) {
    HOST.with(|cell| *cell.borrow_mut() = Some(shared));
}

pub(crate) fn teardown() {
    HOST.with(|cell| *cell.borrow_mut() = None);
}

/// Runs `f` against the installed host state, if any.
pub(crate) fn with<R>(f: impl FnOnce(&mut HostShared) -> R) -> Option<R> {
    HOST.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// [`with`], discarding the result.
pub(crate) fn with_do(f: impl FnOnce(&mut HostShared)) {
    let _ = with(f);
}

pub(crate) unsafe extern "C" fn video_refresh(
    data: *const c_void,
    width: u32,
    height: u32,
    pitch: usize,
) {
    if data.is_null() || width == 0 || height == 0 {
        return;
    }
    let src = unsafe { std::slice::from_raw_parts(data as *const u8, height as usize * pitch) };
    with_do(|host| {
        let format = host.pixel_format;
        host.frame.store(src, width, height, pitch, format);
    });
}

pub(crate) unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    with_do(|host| host.audio.push_sample(left, right));
}

pub(crate) unsafe extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    if data.is_null() || frames == 0 {
        return frames;
    }
    let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
    with(|host| host.audio.push_batch(samples)).unwrap_or(frames)
}

pub(crate) unsafe extern "C" fn input_poll() {
    with_do(|host| host.ports.poll());
}

pub(crate) unsafe extern "C" fn input_state(port: u32, device: u32, index: u32, id: u32) -> i16 {
    with(|host| host.ports.state(port, device, index, id)).unwrap_or(0)
}

// Handed out for GET_LOG_INTERFACE. The libretro prototype is variadic;
// only the fixed arguments are read and the format string is reported
// verbatim.
pub(crate) unsafe extern "C" fn host_log(level: u32, fmt: *const c_char) {
    if level == abi::LOG_DEBUG || level == abi::LOG_INFO || fmt.is_null() {
        return;
    }
    let msg = unsafe { CStr::from_ptr(fmt) }.to_string_lossy();
    tracing::warn!(target: "e9k_host::core", "{}", msg.trim_end());
}

pub(crate) unsafe extern "C" fn vblank_trampoline(_user: *mut c_void) {
    // Take the hook out so it may call freely back into host state.
    let hook = with(|host| host.vblank_hook.take()).flatten();
    if let Some(mut hook) = hook {
        hook();
        with_do(|host| {
            if host.vblank_hook.is_none() {
                host.vblank_hook = Some(hook);
            }
        });
    }
}

unsafe fn cstr_opt<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

unsafe fn define_options(defs: *const abi::CoreOptionDefinition) {
    if defs.is_null() {
        return;
    }
    let mut parsed = Vec::new();
    let mut cursor = defs;
    loop {
        let def = unsafe { &*cursor };
        let Some(key) = (unsafe { cstr_opt(def.key) }) else {
            break;
        };
        let default_value = unsafe { cstr_opt(def.default_value) }.map(str::to_owned);
        parsed.push((key.to_owned(), default_value));
        cursor = unsafe { cursor.add(1) };
    }
    with_do(|host| host.options.define(parsed));
}

pub(crate) unsafe extern "C" fn environment(cmd: u32, data: *mut c_void) -> bool {
    match cmd {
        abi::ENV_SET_ROTATION
        | abi::ENV_SET_PERFORMANCE_LEVEL
        | abi::ENV_SET_SUPPORT_NO_GAME
        | abi::ENV_SET_INPUT_DESCRIPTORS
        | abi::ENV_SET_CORE_OPTIONS_DISPLAY
        | abi::ENV_SET_CORE_OPTIONS_UPDATE_DISPLAY_CALLBACK => true,

        abi::ENV_SET_MESSAGE => {
            if data.is_null() {
                return false;
            }
            let msg = unsafe { &*(data as *const abi::Message) };
            if let Some(text) = unsafe { cstr_opt(msg.msg) } {
                tracing::info!(target: "e9k_host::core", "{}", text);
            }
            true
        }

        abi::ENV_GET_SYSTEM_DIRECTORY => with(|host| {
            if data.is_null() || host.system_dir.as_bytes().is_empty() {
                return false;
            }
            unsafe { *(data as *mut *const c_char) = host.system_dir.as_ptr() };
            true
        })
        .unwrap_or(false),

        abi::ENV_GET_SAVE_DIRECTORY => with(|host| {
            if data.is_null() || host.save_dir.as_bytes().is_empty() {
                return false;
            }
            unsafe { *(data as *mut *const c_char) = host.save_dir.as_ptr() };
            true
        })
        .unwrap_or(false),

        abi::ENV_GET_VARIABLE => {
            if data.is_null() {
                return false;
            }
            let var = unsafe { &mut *(data as *mut abi::Variable) };
            let Some(key) = (unsafe { cstr_opt(var.key) }) else {
                return false;
            };
            with(|host| match host.options.lookup(key) {
                Some(value) => {
                    var.value = value.as_ptr();
                    true
                }
                None => false,
            })
            .unwrap_or(false)
        }

        abi::ENV_SET_VARIABLE => {
            if data.is_null() {
                return false;
            }
            let var = unsafe { &*(data as *const abi::Variable) };
            let Some(key) = (unsafe { cstr_opt(var.key) }) else {
                return false;
            };
            let value = unsafe { cstr_opt(var.value) };
            with_do(|host| host.options.set_value(key, value));
            true
        }

        abi::ENV_SET_VARIABLES => {
            if data.is_null() {
                return false;
            }
            let mut cursor = data as *const abi::Variable;
            loop {
                let var = unsafe { &*cursor };
                let Some(key) = (unsafe { cstr_opt(var.key) }) else {
                    break;
                };
                let value = unsafe { cstr_opt(var.value) };
                with_do(|host| host.options.set_value(key, value));
                cursor = unsafe { cursor.add(1) };
            }
            true
        }

        abi::ENV_SET_PIXEL_FORMAT => {
            if data.is_null() {
                return false;
            }
            let requested = unsafe { *(data as *const u32) };
            match PixelFormat::from_retro(requested) {
                // Only the 32-bit format is accepted; cores falling back
                // to a 16-bit format get converted in the video thunk.
                Some(PixelFormat::Xrgb8888) => {
                    with_do(|host| host.pixel_format = PixelFormat::Xrgb8888);
                    true
                }
                _ => false,
            }
        }

        abi::ENV_GET_LOG_INTERFACE => {
            if data.is_null() {
                return false;
            }
            unsafe { (*(data as *mut LogCallback)).log = host_log };
            true
        }

        abi::ENV_SET_CORE_OPTIONS => {
            unsafe { define_options(data as *const abi::CoreOptionDefinition) };
            true
        }

        abi::ENV_SET_CORE_OPTIONS_INTL => {
            if data.is_null() {
                return false;
            }
            let intl = unsafe { &*(data as *const abi::CoreOptionsIntl) };
            let defs = if intl.local.is_null() { intl.us } else { intl.local };
            unsafe { define_options(defs) };
            true
        }

        abi::ENV_SET_KEYBOARD_CALLBACK => {
            if data.is_null() {
                return false;
            }
            let cb = unsafe { &*(data as *const KeyboardCallback) };
            with_do(|host| host.keyboard_cb = Some(cb.callback));
            true
        }

        abi::ENV_GET_CORE_OPTIONS_VERSION => {
            if data.is_null() {
                return false;
            }
            unsafe { *(data as *mut u32) = 1 };
            true
        }

        abi::ENV_GET_VARIABLE_UPDATE => {
            if data.is_null() {
                return false;
            }
            unsafe { *(data as *mut bool) = false };
            true
        }

        _ => false,
    }
}
