use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use e9k_debuginfo::DebugSession;
use e9k_history::StateRing;
use e9k_host::HostBridge;

use crate::config::Config;
use crate::console::Console;
use crate::history::PromptHistory;
use crate::machine::Machine;
use crate::profile::ProfileState;
use crate::train::Train;

/// The whole debugger session, constructed once in `main` and threaded
/// as an explicit reference into every subsystem.
pub struct App {
    pub bridge: HostBridge,
    pub history: StateRing,
    pub save_slot: Option<StateRing>,
    pub machine: Machine,
    pub console: Console,
    pub debug: DebugSession,
    pub train: Train,
    pub profile: ProfileState,
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub prompt_history: PromptHistory,

    /// Completed-frame counter, shared with the vblank hook.
    pub frame_counter: Rc<Cell<u64>>,
    pub loop_range: Option<(u64, u64)>,
    pub seeking: bool,
    pub speed_multiplier: u32,
    pub frame_step_mode: bool,
    /// Pending frame-step direction: +1 forward, -1 backward.
    pub frame_step_pending: i32,
    /// Breakpoint temporarily lifted so a step can leave its address.
    pub suppressed_bp: Option<u32>,
    pub vblank_hooked: bool,
    pub rolling_record: bool,
    pub has_state_snapshot: bool,

    pub elf_path: Option<PathBuf>,
    pub toolchain_prefix: String,
    pub transition_mode: String,
    pub quit: bool,
}

impl App {
    pub fn new(state_budget_bytes: usize, echo_console: bool) -> Self {
        Self {
            bridge: HostBridge::new(),
            history: StateRing::new(state_budget_bytes),
            save_slot: None,
            machine: Machine::default(),
            console: Console::new(echo_console),
            debug: DebugSession::default(),
            train: Train::default(),
            profile: ProfileState::default(),
            config: Config::default(),
            config_path: Config::default_path(),
            prompt_history: PromptHistory::default(),
            frame_counter: Rc::new(Cell::new(0)),
            loop_range: None,
            seeking: false,
            speed_multiplier: 1,
            frame_step_mode: false,
            frame_step_pending: 0,
            suppressed_bp: None,
            vblank_hooked: false,
            rolling_record: true,
            has_state_snapshot: false,
            elf_path: None,
            toolchain_prefix: String::new(),
            transition_mode: "none".to_owned(),
            quit: false,
        }
    }

    pub fn clear_frame_step(&mut self) {
        self.frame_step_mode = false;
        self.frame_step_pending = 0;
    }

    /// Refreshes the register snapshot when the core is paused (register
    /// reads are only coherent between frames).
    pub fn refresh_regs_if_paused(&mut self) {
        if !self.machine.is_running() {
            self.machine.refresh_regs(&self.bridge);
        }
    }

    /// Temporarily removes a breakpoint sitting at the current pc so a
    /// step can leave the address; the run loop reinstalls it at the
    /// next pause.
    pub fn suppress_breakpoint_at_pc(&mut self) {
        self.refresh_regs_if_paused();
        let Some(pc) = self.machine.pc() else {
            return;
        };
        if !self.machine.has_breakpoint(pc) || self.suppressed_bp.is_some() {
            return;
        }
        if self.bridge.remove_breakpoint(pc).is_ok() {
            self.suppressed_bp = Some(pc);
        }
    }

    /// Reinstalls the breakpoint lifted by
    /// [`suppress_breakpoint_at_pc`](Self::suppress_breakpoint_at_pc).
    pub fn restore_suppressed_breakpoint(&mut self) {
        if let Some(addr) = self.suppressed_bp.take() {
            let _ = self.bridge.add_breakpoint(addr);
        }
    }

    pub fn save_config(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        if let Err(e) = self.config.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save config");
        }
    }
}
