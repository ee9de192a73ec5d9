use e9k_common::mask24;
use e9k_host::abi::{PROTECT_COUNT, PROTECT_MODE_BLOCK, PROTECT_MODE_SET};
use e9k_host::{HostBridge, HostError, ProtectEntry};

fn size_ok(size_bits: u32) -> bool {
    matches!(size_bits, 8 | 16 | 32)
}

/// Installs a write-blocking protect entry.
pub fn add_block(bridge: &HostBridge, addr: u32, size_bits: u32) -> Result<u32, HostError> {
    debug_assert!(size_ok(size_bits));
    bridge.add_protect(mask24(addr), size_bits, PROTECT_MODE_BLOCK, 0)
}

/// Installs a value-substituting protect entry.
pub fn add_set(
    bridge: &HostBridge,
    addr: u32,
    value: u32,
    size_bits: u32,
) -> Result<u32, HostError> {
    debug_assert!(size_ok(size_bits));
    bridge.add_protect(mask24(addr), size_bits, PROTECT_MODE_SET, value)
}

/// Removes the first enabled entry matching `addr` (through the entry's
/// address mask) and, when nonzero, `size_bits`.
pub fn remove(bridge: &HostBridge, addr: u32, size_bits: u32) -> Result<bool, HostError> {
    let addr = mask24(addr);
    let mut entries = [ProtectEntry::default(); PROTECT_COUNT];
    let count = bridge.read_protects(&mut entries)?;
    let enabled = bridge.protect_enabled_mask()?;

    for (i, entry) in entries.iter().enumerate().take(count) {
        if (enabled >> i) & 1 == 0 {
            continue;
        }
        if size_bits != 0 && entry.size_bits != size_bits {
            continue;
        }
        if (addr & entry.addr_mask) != (entry.addr & entry.addr_mask) {
            continue;
        }
        bridge.remove_protect(i as u32)?;
        return Ok(true);
    }
    Ok(false)
}

/// Formats the enabled protect table for the console.
pub fn list(bridge: &HostBridge) -> Result<Vec<String>, HostError> {
    let mut entries = [ProtectEntry::default(); PROTECT_COUNT];
    let count = bridge.read_protects(&mut entries)?;
    let enabled = bridge.protect_enabled_mask()?;

    let enabled_count = (0..count).filter(|i| (enabled >> i) & 1 != 0).count();
    let mut out = vec![format!(
        "protect: {} entr{}",
        enabled_count,
        if enabled_count == 1 { "y" } else { "ies" }
    )];
    for (i, entry) in entries.iter().enumerate().take(count) {
        if (enabled >> i) & 1 == 0 {
            continue;
        }
        if entry.mode == PROTECT_MODE_SET {
            out.push(format!(
                "  [{}] set addr=0x{:06X} size={} val=0x{:08X} mask=0x{:06X}",
                i,
                mask24(entry.addr),
                entry.size_bits,
                entry.value,
                mask24(entry.addr_mask)
            ));
        } else {
            out.push(format!(
                "  [{}] block addr=0x{:06X} size={} mask=0x{:06X}",
                i,
                mask24(entry.addr),
                entry.size_bits,
                mask24(entry.addr_mask)
            ));
        }
    }
    Ok(out)
}
