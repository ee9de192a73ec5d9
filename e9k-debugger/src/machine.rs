use std::collections::BTreeSet;

use e9k_common::{mask24, RegisterFile};
use e9k_debuginfo::SectionBases;
use e9k_host::HostBridge;

/// The debugger's view of the emulated machine.
///
/// Everything here mirrors state the core owns: the register snapshot is
/// refreshed whenever the core pauses, and the breakpoint set mirrors
/// what has been installed through the bridge so the UI can list it
/// without another core round-trip.
#[derive(Debug, Default)]
pub struct Machine {
    regs: RegisterFile,
    running: bool,
    breakpoints: BTreeSet<u32>,
    pub bases: SectionBases,
}

impl Machine {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Re-reads the register file from the core.
    pub fn refresh_regs(&mut self, bridge: &HostBridge) {
        let mut words = [0u32; 32];
        if let Ok(count) = bridge.read_regs(&mut words) {
            self.regs.update(&words[..count]);
        }
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    /// The current program counter, masked to the bus width.
    pub fn pc(&self) -> Option<u32> {
        self.regs.get("PC").map(mask24)
    }

    pub fn add_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(mask24(addr));
    }

    pub fn has_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.contains(&mask24(addr))
    }
}

/// The [`e9k_eval::Machine`] view over the machine and the bridge.
///
/// Memory reads go through the core's debug ABI; when that fails, reads
/// inside the main RAM window fall back to the directly mapped system
/// RAM region.
pub struct EvalMachine<'a> {
    pub machine: &'a Machine,
    pub bridge: &'a HostBridge,
}

const RAM_WINDOW_START: u32 = 0x0010_0000;
const RAM_WINDOW_END: u32 = 0x001f_ffff;

impl e9k_eval::Machine for EvalMachine<'_> {
    fn reg(&self, name: &str) -> Option<u32> {
        self.machine.regs.get(name)
    }

    fn reg_dwarf(&self, reg: u8) -> Option<u32> {
        self.machine.regs.get_dwarf(reg)
    }

    fn read_memory(&self, addr: u32, out: &mut [u8]) -> bool {
        if self.bridge.read_memory(addr, out).is_ok() {
            return true;
        }
        let Some(ram) = self.bridge.system_ram() else {
            return false;
        };
        for (i, slot) in out.iter_mut().enumerate() {
            let cur = addr.wrapping_add(i as u32);
            if !(RAM_WINDOW_START..=RAM_WINDOW_END).contains(&cur) {
                return false;
            }
            let offset = (cur & 0xffff) as usize;
            match ram.get(offset) {
                Some(&b) => *slot = b,
                None => return false,
            }
        }
        true
    }

    fn is_running(&self) -> bool {
        self.machine.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_mirror() {
        let mut machine = Machine::default();
        machine.add_breakpoint(0xff40_0010);
        assert!(machine.has_breakpoint(0x40_0010));
        assert!(!machine.has_breakpoint(0x40_0014));
    }
}
