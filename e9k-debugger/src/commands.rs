//! The tokenized command engine.
//!
//! A line is split on whitespace (no quoting), the first token selects a
//! command by name or shortcut (case-insensitive), and the handler
//! composes the host bridge, the state history, the debug-info index and
//! the evaluator into one user operation. Errors never abort the loop;
//! they print as `<cmd>: <reason>`.

use std::fmt;

use e9k_common::{mask24, read_be, AccessWidth};
use e9k_debuginfo::{resolve_file_line, DumpSource, ToolchainDump};
use e9k_eval as eval;
use e9k_host::abi::WATCHPOINT_COUNT;
use e9k_host::{watch_op, HostError, HostErrorKind, Watchpoint};

use crate::app::App;
use crate::machine::EvalMachine;
use crate::protect;

/// The error kind for [`CommandError`], mirroring the debugger's error
/// taxonomy.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandErrorKind {
    Config,
    Load,
    Unsupported,
    Parse,
    Resolution,
    Memory,
    Capture,
}

/// An error reported by a command handler.
#[derive(Debug)]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
}

impl CommandError {
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Parse, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Resolution, message)
    }

    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<HostError> for CommandError {
    fn from(e: HostError) -> Self {
        let kind = match e.kind() {
            HostErrorKind::Unsupported | HostErrorKind::NotRunning => CommandErrorKind::Unsupported,
            HostErrorKind::Memory => CommandErrorKind::Memory,
            HostErrorKind::Load => CommandErrorKind::Load,
            _ => CommandErrorKind::Config,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<eval::EvalError> for CommandError {
    fn from(e: eval::EvalError) -> Self {
        let kind = match e.kind() {
            eval::EvalErrorKind::Resolution => CommandErrorKind::Resolution,
            eval::EvalErrorKind::Memory => CommandErrorKind::Memory,
            _ => CommandErrorKind::Parse,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<e9k_debuginfo::DebugInfoError> for CommandError {
    fn from(e: e9k_debuginfo::DebugInfoError) -> Self {
        let kind = match e.kind() {
            e9k_debuginfo::DebugInfoErrorKind::Parse => CommandErrorKind::Parse,
            _ => CommandErrorKind::Resolution,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<e9k_history::HistoryError> for CommandError {
    fn from(e: e9k_history::HistoryError) -> Self {
        let kind = match e.kind() {
            e9k_history::HistoryErrorKind::UnknownFrame => CommandErrorKind::Resolution,
            _ => CommandErrorKind::Capture,
        };
        Self::new(kind, e.to_string())
    }
}

type Handler = fn(&mut App, &[&str]) -> Result<(), CommandError>;
type Completer = fn(&mut App, &str) -> Vec<String>;

/// One console command.
pub struct CommandSpec {
    pub name: &'static str,
    pub shortcut: Option<&'static str>,
    pub usage: &'static str,
    pub help: &'static str,
    handler: Handler,
    complete: Option<Completer>,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        shortcut: Some("h"),
        usage: "help [command]",
        help: "Show available commands or detailed help.",
        handler: cmd_help,
        complete: None,
    },
    CommandSpec {
        name: "break",
        shortcut: Some("b"),
        usage: "break <addr|symbol|file:line>",
        help: "Set a breakpoint at an address, symbol, or file:line.",
        handler: cmd_break,
        complete: Some(complete_break),
    },
    CommandSpec {
        name: "cls",
        shortcut: None,
        usage: "cls",
        help: "Clear the console output.",
        handler: cmd_cls,
        complete: None,
    },
    CommandSpec {
        name: "continue",
        shortcut: Some("c"),
        usage: "continue",
        help: "Continue execution and defocus the prompt.",
        handler: cmd_continue,
        complete: None,
    },
    CommandSpec {
        name: "diff",
        shortcut: None,
        usage: "diff <fromFrame> <toFrame> [size=8|16|32]",
        help: "Show RAM addresses that differ between two recorded frames.",
        handler: cmd_diff,
        complete: None,
    },
    CommandSpec {
        name: "loop",
        shortcut: None,
        usage: "loop <from> <to>\nloop\nloop clear",
        help: "Loop between two recorded frame numbers (decimal).",
        handler: cmd_loop,
        complete: None,
    },
    CommandSpec {
        name: "print",
        shortcut: Some("p"),
        usage: "print <expr>",
        help: "Print an expression using DWARF + symbol info.",
        handler: cmd_print,
        complete: Some(complete_print),
    },
    CommandSpec {
        name: "protect",
        shortcut: None,
        usage: "protect\nprotect clear\nprotect del <addr> [size=8|16|32]\nprotect <addr> block [size=8|16|32]\nprotect <addr> set=0x... [size=8|16|32]",
        help: "Protect addresses by blocking writes or forcing a value (core-side).",
        handler: cmd_protect,
        complete: None,
    },
    CommandSpec {
        name: "next",
        shortcut: Some("n"),
        usage: "next",
        help: "Step over the next line.",
        handler: cmd_next,
        complete: None,
    },
    CommandSpec {
        name: "step",
        shortcut: Some("s"),
        usage: "step",
        help: "Step to next source line.",
        handler: cmd_step,
        complete: None,
    },
    CommandSpec {
        name: "stepi",
        shortcut: Some("i"),
        usage: "stepi",
        help: "Step one instruction.",
        handler: cmd_stepi,
        complete: None,
    },
    CommandSpec {
        name: "train",
        shortcut: None,
        usage: "train <from> <to> [size=8|16|32]\ntrain ignore\ntrain clear",
        help: "Train by breaking on a value transition (from/to accept decimal or 0x...).",
        handler: cmd_train,
        complete: None,
    },
    CommandSpec {
        name: "transition",
        shortcut: None,
        usage: "transition <slide|explode|doom|flip|rbar|random|cycle|none>",
        help: "Set the transition mode for startup and fullscreen.",
        handler: cmd_transition,
        complete: Some(complete_transition),
    },
    CommandSpec {
        name: "watch",
        shortcut: Some("wa"),
        usage: "watch [addr] [r|w|rw] [size=8|16|32] [mask=0x...] [val=0x...] [old=0x...] [diff=0x...]\nwatch del <idx>\nwatch clear",
        help: "Set or list watchpoints.",
        handler: cmd_watch,
        complete: None,
    },
    CommandSpec {
        name: "write",
        shortcut: None,
        usage: "write <dest> <value>",
        help: "Write a hex value to an address or symbol.",
        handler: cmd_write,
        complete: Some(complete_write),
    },
];

/// Finds a command by name or shortcut, case-insensitively.
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|cmd| {
        cmd.name.eq_ignore_ascii_case(name)
            || cmd
                .shortcut
                .is_some_and(|short| short.eq_ignore_ascii_case(name))
    })
}

/// Tokenizes and dispatches one console line.
pub fn dispatch(app: &mut App, line: &str) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&name) = tokens.first() else {
        return;
    };
    let Some(cmd) = find_command(name) else {
        app.console.push(format!("console: unknown command '{name}'"));
        return;
    };
    if let Err(e) = (cmd.handler)(app, &tokens) {
        tracing::debug!(command = cmd.name, kind = ?e.kind(), "command failed");
        app.console.push(format!("{}: {e}", cmd.name));
    }
}

/// Pauses the core from the prompt (Ctrl-C).
pub fn send_interrupt(app: &mut App) {
    match app.bridge.pause() {
        Ok(()) => {
            app.machine.set_running(false);
            app.clear_frame_step();
        }
        Err(_) => app.console.push("console: interrupt failed"),
    }
}

// --- argument parsing ----------------------------------------------------

/// Hex with optional `0x`, masked to the 24-bit bus.
fn parse_hex24(s: &str) -> Option<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok().map(|v| mask24(v as u32))
}

/// Hex requiring the `0x` prefix; also reports the digit count, which
/// `write` uses to infer the access width.
fn parse_hex_strict(s: &str) -> Option<(u64, usize)> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16)
        .ok()
        .map(|v| (v, digits.len()))
}

fn parse_u32_strict(s: &str) -> Option<u32> {
    let (value, _) = parse_hex_strict(s)?;
    u32::try_from(value).ok()
}

/// Decimal or `0x` hex.
fn parse_u32_auto(s: &str) -> Option<u32> {
    if s.starts_with('-') {
        return None;
    }
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(digits, 16).ok();
    }
    s.parse().ok()
}

fn parse_u64_dec(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

enum SizeOpt {
    NotSize,
    Invalid,
    Bits(u32),
}

fn parse_size_bits_opt(token: &str) -> SizeOpt {
    let Some(rest) = strip_prefix_ignore_case(token, "size=") else {
        return SizeOpt::NotSize;
    };
    match rest.parse() {
        Ok(bits @ (8 | 16 | 32)) => SizeOpt::Bits(bits),
        _ => SizeOpt::Invalid,
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

// --- handlers ------------------------------------------------------------

fn cmd_help(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        app.console.push("Commands:");
        for cmd in COMMANDS {
            match cmd.shortcut {
                Some(short) => app.console.push(format!("  {} ({})", cmd.name, short)),
                None => app.console.push(format!("  {}", cmd.name)),
            }
        }
        return Ok(());
    }
    let cmd = find_command(args[1])
        .ok_or_else(|| CommandError::parse(format!("unknown command '{}'", args[1])))?;
    app.console.push(String::new());
    app.console.push(cmd.help);
    app.console.push(String::new());
    for line in cmd.usage.lines() {
        app.console.push(line);
    }
    Ok(())
}

fn cmd_break(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        app.console.push("Usage: break <addr|symbol|file:line>");
        return Ok(());
    }
    let Some(elf) = app.elf_path.clone() else {
        return Err(CommandError::new(
            CommandErrorKind::Config,
            "no ELF path configured (set --elf)",
        ));
    };
    let arg = args[1];
    let dump = ToolchainDump::new(app.toolchain_prefix.clone(), &elf);

    // file:line first, then a bare hex address, then a symbol.
    let mut addr = None;
    if let Some((file, line)) = arg.rsplit_once(':') {
        if let Ok(line_no) = line.parse::<u32>() {
            if line_no > 0 && !file.is_empty() {
                if let Ok(listing) = dump.line_listing() {
                    addr = resolve_file_line(&listing, file, line_no);
                }
            }
        }
    }
    if addr.is_none() {
        addr = parse_hex24(arg);
    }
    if addr.is_none() {
        let index = app.debug.index(&dump, &elf, app.machine.bases)?;
        addr = index.symbols.resolve(arg).map(|s| s.addr);
    }
    let addr = addr.ok_or_else(|| CommandError::resolution(format!("failed to resolve '{arg}'")))?;

    app.bridge.add_breakpoint(addr)?;
    app.machine.add_breakpoint(addr);
    app.console.push(format!("break: added at 0x{addr:06X}"));
    Ok(())
}

fn cmd_cls(app: &mut App, _args: &[&str]) -> Result<(), CommandError> {
    app.console.clear();
    Ok(())
}

fn cmd_continue(app: &mut App, _args: &[&str]) -> Result<(), CommandError> {
    app.bridge.resume()?;
    app.machine.set_running(true);
    app.clear_frame_step();
    Ok(())
}

fn cmd_step(app: &mut App, _args: &[&str]) -> Result<(), CommandError> {
    app.suppress_breakpoint_at_pc();
    app.bridge.step_line()?;
    app.machine.set_running(true);
    Ok(())
}

fn cmd_stepi(app: &mut App, _args: &[&str]) -> Result<(), CommandError> {
    app.suppress_breakpoint_at_pc();
    app.bridge.step_instr()?;
    app.machine.set_running(true);
    Ok(())
}

fn cmd_next(app: &mut App, _args: &[&str]) -> Result<(), CommandError> {
    app.suppress_breakpoint_at_pc();
    app.bridge.step_next()?;
    app.machine.set_running(true);
    Ok(())
}

fn cmd_write(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 3 {
        app.console.push("Usage: write <dest> <value>");
        return Ok(());
    }
    let dest = args[1];
    let (value, digits) = parse_hex_strict(args[2])
        .ok_or_else(|| CommandError::parse("value must be hex (0x...)"))?;
    let width = AccessWidth::from_hex_digits(digits)
        .ok_or_else(|| CommandError::parse("value too wide (max 32-bit hex)"))?;

    if dest.starts_with("0x") || dest.starts_with("0X") {
        let (addr, _) = parse_hex_strict(dest)
            .ok_or_else(|| CommandError::parse("address must be hex (0x...)"))?;
        let addr = u32::try_from(addr)
            .map_err(|_| CommandError::parse("address out of range"))?;
        app.bridge.write_memory(addr, value as u32, width)?;
        app.console
            .push(format!("{dest} = 0x{value:X} ({} bits)", width.bits()));
        return Ok(());
    }

    app.refresh_regs_if_paused();
    let Some(elf) = app.elf_path.clone() else {
        return Err(CommandError::resolution(format!("unknown symbol '{dest}'")));
    };
    let dump = ToolchainDump::new(app.toolchain_prefix.clone(), &elf);
    let index = app.debug.index(&dump, &elf, app.machine.bases)?;
    let eval_machine = EvalMachine {
        machine: &app.machine,
        bridge: &app.bridge,
    };
    let (addr, size) = eval::resolve_address(dest, index, &eval_machine)
        .map_err(|_| CommandError::resolution(format!("unknown symbol '{dest}'")))?;
    if size > 4 {
        return Err(CommandError::parse(format!(
            "can't write to {dest} (size {size}); use \"write 0x{addr:08X} {}\" to write the address directly",
            args[2]
        )));
    }
    if digits > size * 2 {
        return Err(CommandError::parse(format!(
            "value too large for {dest} ({size} bytes)"
        )));
    }
    let width = match size {
        1 => AccessWidth::Byte,
        2 => AccessWidth::Word,
        _ => AccessWidth::Long,
    };
    app.bridge.write_memory(addr, value as u32, width)?;
    app.console
        .push(format!("{dest} = 0x{value:X} ({} bits)", width.bits()));
    Ok(())
}

fn cmd_print(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        app.console.push("Usage: print <expr>");
        return Ok(());
    }
    let expr = args[1..].join(" ");

    // Fast-path simple numeric expressions so `print *0xADDR` works
    // without an ELF.
    if let Some((deref, number)) = parse_numeric_fast_path(&expr) {
        if deref {
            let addr = mask24(number as u32);
            let mut buf = [0u8; 4];
            app.bridge
                .read_memory(addr, &mut buf)
                .map_err(|_| {
                    CommandError::new(
                        CommandErrorKind::Memory,
                        format!("failed to read memory at 0x{addr:06X}"),
                    )
                })?;
            let value = read_be(&buf, 4).unwrap_or(0);
            app.console
                .push(format!("*0x{addr:06X}: 0x{value:08X}"));
        } else {
            app.console
                .push(format!("{expr}: {number} (0x{number:X})"));
        }
        return Ok(());
    }

    app.refresh_regs_if_paused();
    let Some(elf) = app.elf_path.clone() else {
        return Err(CommandError::new(
            CommandErrorKind::Config,
            "failed to load symbols (check --elf)",
        ));
    };
    let dump = ToolchainDump::new(app.toolchain_prefix.clone(), &elf);
    let index = app.debug.index(&dump, &elf, app.machine.bases)?;
    let eval_machine = EvalMachine {
        machine: &app.machine,
        bridge: &app.bridge,
    };
    let value = eval::evaluate(&expr, index, &eval_machine, false)?;
    let lines = eval::print_value(&expr, &value, index, &eval_machine);
    app.console.extend(lines);
    Ok(())
}

/// Recognizes `[*] [(] NUMBER [)]` (decimal or 0x hex). Returns
/// `(deref, number)`.
fn parse_numeric_fast_path(expr: &str) -> Option<(bool, u64)> {
    let mut rest = expr.trim();
    let deref = if let Some(stripped) = rest.strip_prefix('*') {
        rest = stripped.trim_start();
        true
    } else {
        false
    };
    let paren = if let Some(stripped) = rest.strip_prefix('(') {
        rest = stripped.trim_start();
        true
    } else {
        false
    };
    let (digits, radix) = match rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (rest, 10),
    };
    let end = digits
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_hexdigit())
        .count();
    if end == 0 {
        return None;
    }
    let number = u64::from_str_radix(&digits[..end], radix).ok()?;
    let mut tail = digits[end..].trim_start();
    if paren {
        tail = tail.strip_prefix(')')?.trim_start();
    }
    tail.is_empty().then_some((deref, number))
}

fn cmd_watch(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        return watch_list(app);
    }
    if args[1].eq_ignore_ascii_case("clear") {
        app.bridge.reset_watchpoints()?;
        app.console.push("watch: cleared");
        return Ok(());
    }
    if ["del", "rm", "remove"]
        .iter()
        .any(|alias| args[1].eq_ignore_ascii_case(alias))
    {
        if args.len() < 3 {
            app.console.push("Usage: watch del <idx>");
            return Ok(());
        }
        let index = parse_u32_auto(args[2])
            .ok_or_else(|| CommandError::parse(format!("invalid index '{}'", args[2])))?;
        app.bridge.remove_watchpoint(index)?;
        app.console.push(format!("watch: removed {index}"));
        return Ok(());
    }

    let addr = parse_hex24(args[1])
        .ok_or_else(|| CommandError::parse(format!("expected address, got '{}'", args[1])))?;

    let mut op_mask = 0u32;
    let mut diff = 0u32;
    let mut value = 0u32;
    let mut old_value = 0u32;
    let mut size = 0u32;
    let mut addr_mask = 0u32;
    let mut have_rw = false;

    for &token in &args[2..] {
        match token.to_ascii_lowercase().as_str() {
            "r" | "read" => {
                op_mask |= watch_op::READ;
                have_rw = true;
                continue;
            }
            "w" | "write" => {
                op_mask |= watch_op::WRITE;
                have_rw = true;
                continue;
            }
            "rw" | "wr" => {
                op_mask |= watch_op::READ | watch_op::WRITE;
                have_rw = true;
                continue;
            }
            _ => {}
        }
        match parse_size_bits_opt(token) {
            SizeOpt::Bits(bits) => {
                op_mask |= watch_op::ACCESS_SIZE;
                size = bits;
                continue;
            }
            SizeOpt::Invalid => {
                return Err(CommandError::parse(format!(
                    "invalid size '{token}' (expected 8/16/32)"
                )));
            }
            SizeOpt::NotSize => {}
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "mask=") {
            addr_mask = parse_u32_strict(rest)
                .ok_or_else(|| CommandError::parse(format!("invalid mask '{rest}' (expected 0x...)")))?;
            op_mask |= watch_op::ADDR_COMPARE_MASK;
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "val=")
            .or_else(|| strip_prefix_ignore_case(token, "value="))
        {
            value = parse_u32_strict(rest)
                .ok_or_else(|| CommandError::parse(format!("invalid val '{rest}' (expected 0x...)")))?;
            op_mask |= watch_op::VALUE_EQ;
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "old=") {
            old_value = parse_u32_strict(rest)
                .ok_or_else(|| CommandError::parse(format!("invalid old '{rest}' (expected 0x...)")))?;
            op_mask |= watch_op::OLD_VALUE_EQ;
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "diff=")
            .or_else(|| strip_prefix_ignore_case(token, "neq="))
        {
            diff = parse_u32_strict(rest)
                .ok_or_else(|| CommandError::parse(format!("invalid diff '{rest}' (expected 0x...)")))?;
            op_mask |= watch_op::VALUE_NEQ_OLD;
            continue;
        }
        return Err(CommandError::parse(format!("unknown option '{token}'")));
    }

    if !have_rw {
        op_mask |= watch_op::READ | watch_op::WRITE;
    }

    let index = app
        .bridge
        .add_watchpoint(addr, op_mask, diff, value, old_value, size, addr_mask)?;
    app.console
        .push(format!("watch: added [{index}] at 0x{addr:06X}"));
    Ok(())
}

fn watch_list(app: &mut App) -> Result<(), CommandError> {
    let mut entries = [Watchpoint::default(); WATCHPOINT_COUNT];
    let count = app.bridge.read_watchpoints(&mut entries)?;
    let enabled = app.bridge.watchpoint_enabled_mask().unwrap_or(0);

    app.console
        .push(format!("Watchpoints (enabled=0x{enabled:016X}):"));
    for (i, wp) in entries.iter().enumerate().take(count) {
        let is_enabled = (enabled >> i) & 1 != 0;
        if !is_enabled && wp.op_mask == 0 {
            continue;
        }
        let rw = match (
            wp.op_mask & watch_op::READ != 0,
            wp.op_mask & watch_op::WRITE != 0,
        ) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "",
        };
        let mut line = format!(
            "  [{:02}] {} addr=0x{:06X} op=0x{:08X} {}",
            i,
            if is_enabled { "on " } else { "off" },
            mask24(wp.addr),
            wp.op_mask,
            rw
        );
        if wp.op_mask & watch_op::ACCESS_SIZE != 0 {
            line.push_str(&format!(" size={}", wp.size));
        }
        if wp.op_mask & watch_op::ADDR_COMPARE_MASK != 0 {
            line.push_str(&format!(" mask=0x{:08X}", wp.addr_mask));
        }
        if wp.op_mask & watch_op::VALUE_EQ != 0 {
            line.push_str(&format!(" val=0x{:08X}", wp.value));
        }
        if wp.op_mask & watch_op::OLD_VALUE_EQ != 0 {
            line.push_str(&format!(" old=0x{:08X}", wp.old_value));
        }
        if wp.op_mask & watch_op::VALUE_NEQ_OLD != 0 {
            line.push_str(&format!(" diff=0x{:08X}", wp.diff));
        }
        app.console.push(line);
    }
    Ok(())
}

fn cmd_train(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        app.console
            .push("Usage: train <from> <to> [size=8|16|32] | train ignore | train clear");
        return Ok(());
    }
    if args[1].eq_ignore_ascii_case("clear") {
        app.train.clear_ignore();
        app.console.push("train: ignore list cleared");
        return Ok(());
    }
    if args[1].eq_ignore_ascii_case("ignore") {
        let addr = app
            .train
            .last_watchbreak_addr()
            .ok_or_else(|| CommandError::resolution("no watchbreak to ignore yet"))?;
        app.train.add_ignore(addr);
        app.console.push(format!("train: ignoring 0x{addr:06X}"));
        return Ok(());
    }
    if args.len() < 3 {
        app.console.push("Usage: train <from> <to> [size=8|16|32]");
        return Ok(());
    }

    let from = parse_u32_auto(args[1]).ok_or_else(|| {
        CommandError::parse(format!("invalid from '{}' (expected decimal or 0x...)", args[1]))
    })?;
    let to = parse_u32_auto(args[2]).ok_or_else(|| {
        CommandError::parse(format!("invalid to '{}' (expected decimal or 0x...)", args[2]))
    })?;

    let mut op_mask = 0u32;
    let mut size = 0u32;
    for &token in &args[3..] {
        match parse_size_bits_opt(token) {
            SizeOpt::Bits(bits) => {
                op_mask |= watch_op::ACCESS_SIZE;
                size = bits;
            }
            SizeOpt::Invalid => {
                return Err(CommandError::parse(format!(
                    "invalid size '{token}' (expected 8/16/32)"
                )));
            }
            SizeOpt::NotSize => {
                return Err(CommandError::parse(format!("unknown option '{token}'")));
            }
        }
    }

    // Any address: address compare with mask=0 matches everything, so
    // only the old->new value transition gates the break.
    op_mask |= watch_op::ADDR_COMPARE_MASK
        | watch_op::WRITE
        | watch_op::OLD_VALUE_EQ
        | watch_op::VALUE_EQ;

    let index = app
        .bridge
        .add_watchpoint(0, op_mask, 0, to, from, size, 0)?;
    app.train.set_watch_index(index);
    app.console.push(format!(
        "train: watchpoint [{index}] old=0x{from:08X} -> val=0x{to:08X}"
    ));
    Ok(())
}

fn cmd_loop(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        match app.loop_range {
            Some((from, to)) => app
                .console
                .push(format!("loop: enabled from={from} to={to}")),
            None => app.console.push("loop: disabled"),
        }
        return Ok(());
    }
    if args[1].eq_ignore_ascii_case("clear") {
        app.loop_range = None;
        app.console.push("loop: cleared");
        return Ok(());
    }
    if args.len() < 3 {
        app.console.push("Usage: loop <from> <to>");
        return Ok(());
    }
    let from = parse_u64_dec(args[1]).ok_or_else(|| {
        CommandError::parse(format!("invalid from '{}' (expected decimal integer)", args[1]))
    })?;
    let to = parse_u64_dec(args[2]).ok_or_else(|| {
        CommandError::parse(format!("invalid to '{}' (expected decimal integer)", args[2]))
    })?;
    if from >= to {
        return Err(CommandError::parse("expected from < to"));
    }
    if !app.history.has_frame_no(from) {
        return Err(CommandError::resolution(format!(
            "from frame {from} not in state buffer"
        )));
    }
    if !app.history.has_frame_no(to) {
        return Err(CommandError::resolution(format!(
            "to frame {to} not in state buffer"
        )));
    }
    app.loop_range = Some((from, to));
    Ok(())
}

fn cmd_protect(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        let lines = protect::list(&app.bridge)?;
        app.console.extend(lines);
        return Ok(());
    }
    if args[1].eq_ignore_ascii_case("clear") {
        app.bridge.reset_protects()?;
        app.console.push("protect: cleared");
        return Ok(());
    }
    if ["del", "rm", "remove"]
        .iter()
        .any(|alias| args[1].eq_ignore_ascii_case(alias))
    {
        if args.len() < 3 {
            app.console.push("Usage: protect del <addr> [size=8|16|32]");
            return Ok(());
        }
        let addr = parse_hex24(args[2])
            .ok_or_else(|| CommandError::parse(format!("invalid address '{}'", args[2])))?;
        let mut size_bits = 8;
        for &token in &args[3..] {
            match parse_size_bits_opt(token) {
                SizeOpt::Bits(bits) => size_bits = bits,
                SizeOpt::Invalid => {
                    return Err(CommandError::parse(format!("invalid size '{token}'")))
                }
                SizeOpt::NotSize => {
                    return Err(CommandError::parse(format!("unknown option '{token}'")))
                }
            }
        }
        if !protect::remove(&app.bridge, addr, size_bits)? {
            return Err(CommandError::resolution("not found"));
        }
        app.console.push("protect: removed");
        return Ok(());
    }

    let addr = parse_hex24(args[1])
        .ok_or_else(|| CommandError::parse(format!("invalid address '{}'", args[1])))?;
    let mut size_bits = 8;
    let mut mode_block = false;
    let mut set_value = None;

    for &token in &args[2..] {
        if token.eq_ignore_ascii_case("block") || token.eq_ignore_ascii_case("deny") {
            mode_block = true;
            continue;
        }
        if let Some(rest) = strip_prefix_ignore_case(token, "set=")
            .or_else(|| strip_prefix_ignore_case(token, "value="))
        {
            let value = parse_u32_strict(rest).ok_or_else(|| {
                CommandError::parse(format!("invalid set value '{rest}' (expected 0x...)"))
            })?;
            set_value = Some(value);
            continue;
        }
        match parse_size_bits_opt(token) {
            SizeOpt::Bits(bits) => {
                size_bits = bits;
                continue;
            }
            SizeOpt::Invalid => {
                return Err(CommandError::parse(format!("invalid size '{token}'")))
            }
            SizeOpt::NotSize => {}
        }
        return Err(CommandError::parse(format!("unknown option '{token}'")));
    }

    match (mode_block, set_value) {
        (true, Some(_)) => Err(CommandError::parse("choose either block or set=...")),
        (false, None) => {
            app.console
                .push("Usage: protect <addr> block [size=8|16|32]");
            app.console
                .push("protect <addr> set=0x... [size=8|16|32]");
            Ok(())
        }
        (true, None) => {
            protect::add_block(&app.bridge, addr, size_bits)?;
            app.console.push("protect: added");
            Ok(())
        }
        (false, Some(value)) => {
            protect::add_set(&app.bridge, addr, value, size_bits)?;
            app.console.push("protect: added");
            Ok(())
        }
    }
}

/// RAM regions the `diff` command scans (68k memory map: main RAM and
/// battery-backed RAM).
const DIFF_REGIONS: &[(u32, usize, &str)] = &[
    (0x0010_0000, 0x1_0000, "ram"),
    (0x00d0_0000, 0x1_0000, "backup"),
];

/// Line cap for `diff` output.
const DIFF_MAX_LINES: u64 = 4096;

fn cmd_diff(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 3 {
        return Err(CommandError::parse(
            "usage: diff <fromFrame> <toFrame> [size=8|16|32]",
        ));
    }
    let from = parse_u64_dec(args[1])
        .ok_or_else(|| CommandError::parse("invalid fromFrame (decimal expected)"))?;
    let to = parse_u64_dec(args[2])
        .ok_or_else(|| CommandError::parse("invalid toFrame (decimal expected)"))?;
    let mut access = 1usize;
    for &token in &args[3..] {
        match parse_size_bits_opt(token) {
            SizeOpt::Bits(bits) => access = bits as usize / 8,
            SizeOpt::Invalid => return Err(CommandError::parse("size must be 8, 16, or 32")),
            SizeOpt::NotSize => {
                return Err(CommandError::parse(format!("unknown option '{token}'")))
            }
        }
    }
    if !app.history.has_frame_no(from) {
        return Err(CommandError::resolution(format!(
            "frame {from} not in state buffer"
        )));
    }
    if !app.history.has_frame_no(to) {
        return Err(CommandError::resolution(format!(
            "frame {to} not in state buffer"
        )));
    }

    let restore_frame = app.history.current_frame_no();
    let result = diff_frames(app, from, to, access);

    // Whatever happened, put the emulator back where the user was.
    if app
        .history
        .restore_frame_no(&mut app.bridge, restore_frame)
        .is_ok()
    {
        app.frame_counter.set(restore_frame);
    }
    result
}

fn diff_frames(app: &mut App, from: u64, to: u64, access: usize) -> Result<(), CommandError> {
    app.console.push(format!(
        "diff: frames {from} -> {to} (size={})",
        access * 8
    ));

    let mut changed = 0u64;
    let mut printed = 0u64;
    for &(base, size, name) in DIFF_REGIONS {
        let a = diff_read(app, from, base, size)
            .ok_or_else(|| CommandError::new(CommandErrorKind::Memory, format!("failed to read {name} memory")))?;
        let b = diff_read(app, to, base, size)
            .ok_or_else(|| CommandError::new(CommandErrorKind::Memory, format!("failed to read {name} memory")))?;

        let mut off = 0;
        while off + access <= size {
            let va = read_be(&a[off..], access).unwrap_or(0) as u32;
            let vb = read_be(&b[off..], access).unwrap_or(0) as u32;
            if va != vb {
                changed += 1;
                if printed < DIFF_MAX_LINES {
                    let digits = access * 2;
                    let delta = vb as i64 - va as i64;
                    app.console.push(format!(
                        "0x{:06X}: 0x{:0digits$X} -> 0x{:0digits$X}  delta={:+}",
                        mask24(base + off as u32),
                        va,
                        vb,
                        delta,
                    ));
                    printed += 1;
                }
            }
            off += access;
        }
    }

    if changed == 0 {
        app.console.push("diff: no changes");
    } else if changed > printed {
        app.console.push(format!(
            "diff: {changed} changes (showing {printed}, truncated)"
        ));
    } else {
        app.console.push(format!("diff: {changed} changes"));
    }
    Ok(())
}

fn diff_read(app: &mut App, frame: u64, base: u32, size: usize) -> Option<Vec<u8>> {
    app.history
        .restore_frame_no(&mut app.bridge, frame)
        .ok()?;
    let mut out = vec![0u8; size];
    app.bridge.read_memory(base, &mut out).ok()?;
    Some(out)
}

/// The fixed transition mode list (cosmetic; persisted in config).
pub static TRANSITION_MODES: &[&str] = &[
    "slide", "explode", "doom", "flip", "rbar", "random", "cycle", "none",
];

fn cmd_transition(app: &mut App, args: &[&str]) -> Result<(), CommandError> {
    if args.len() < 2 {
        app.console
            .push(format!("transition: {}", app.transition_mode));
        app.console
            .push("Usage: transition <slide|explode|doom|flip|rbar|random|cycle|none>");
        return Ok(());
    }
    let mode = TRANSITION_MODES
        .iter()
        .find(|m| m.eq_ignore_ascii_case(args[1]))
        .ok_or_else(|| CommandError::parse(format!("unknown mode '{}'", args[1])))?;
    app.transition_mode = (*mode).to_owned();
    app.config.set("transition", *mode);
    app.save_config();
    app.console.push(format!("transition: {mode}"));
    Ok(())
}

// --- completion ----------------------------------------------------------

fn complete_break(app: &mut App, prefix: &str) -> Vec<String> {
    let Some(elf) = app.elf_path.clone() else {
        return Vec::new();
    };
    let dump = ToolchainDump::new(app.toolchain_prefix.clone(), &elf);
    let Ok(index) = app.debug.index(&dump, &elf, app.machine.bases) else {
        return Vec::new();
    };
    index.symbols.complete(prefix).map(str::to_owned).collect()
}

fn complete_print(app: &mut App, prefix: &str) -> Vec<String> {
    let Some(elf) = app.elf_path.clone() else {
        return Vec::new();
    };
    app.refresh_regs_if_paused();
    let dump = ToolchainDump::new(app.toolchain_prefix.clone(), &elf);
    let Ok(index) = app.debug.index(&dump, &elf, app.machine.bases) else {
        return Vec::new();
    };
    let eval_machine = EvalMachine {
        machine: &app.machine,
        bridge: &app.bridge,
    };
    eval::complete(prefix, index, &eval_machine)
}

fn complete_write(app: &mut App, prefix: &str) -> Vec<String> {
    if prefix.is_empty() || prefix.starts_with("0x") || prefix.starts_with("0X") {
        return Vec::new();
    }
    complete_print(app, prefix)
}

fn complete_transition(_app: &mut App, prefix: &str) -> Vec<String> {
    TRANSITION_MODES
        .iter()
        .filter(|m| {
            prefix.is_empty() || m.len() >= prefix.len() && m[..prefix.len()].eq_ignore_ascii_case(prefix)
        })
        .map(|m| (*m).to_owned())
        .collect()
}

fn complete_commands(prefix: &str) -> Vec<String> {
    let mut out = Vec::new();
    for cmd in COMMANDS {
        if prefix.is_empty() || cmd.name.len() >= prefix.len() && cmd.name[..prefix.len()].eq_ignore_ascii_case(prefix) {
            out.push(cmd.name.to_owned());
        }
        if let Some(short) = cmd.shortcut {
            if prefix.is_empty() || short.len() >= prefix.len() && short[..prefix.len()].eq_ignore_ascii_case(prefix) {
                out.push(short.to_owned());
            }
        }
    }
    out
}

/// Completion entry point: returns the candidate list and the byte
/// position where the completed token starts.
pub fn complete(app: &mut App, line: &str, cursor: usize) -> (Vec<String>, usize) {
    let cursor = cursor.min(line.len());
    let token_start = line[..cursor]
        .rfind(|c: char| c.is_whitespace())
        .map(|p| p + 1)
        .unwrap_or(0);
    let token = &line[token_start..cursor];

    let cmd_start = line.len() - line.trim_start().len();
    let cmd_end = line[cmd_start..]
        .find(|c: char| c.is_whitespace())
        .map(|p| cmd_start + p)
        .unwrap_or(line.len());

    if cursor <= cmd_end {
        return (complete_commands(token), token_start);
    }
    let Some(cmd) = find_command(&line[cmd_start..cmd_end]) else {
        return (Vec::new(), 0);
    };
    let Some(completer) = cmd.complete else {
        return (Vec::new(), 0);
    };
    (completer(app, token), token_start)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn test_app() -> App {
        App::new(1 << 20, false)
    }

    #[test]
    fn test_find_command_names_and_shortcuts() {
        assert_eq!(find_command("break").unwrap().name, "break");
        assert_eq!(find_command("B").unwrap().name, "break");
        assert_eq!(find_command("WA").unwrap().name, "watch");
        assert_eq!(find_command("Stepi").unwrap().name, "stepi");
        assert!(find_command("bogus").is_none());
    }

    #[test]
    fn test_dispatch_unknown_command() {
        let mut app = test_app();
        dispatch(&mut app, "frobnicate now");
        assert_eq!(
            app.console.lines(),
            &["console: unknown command 'frobnicate'".to_owned()]
        );
    }

    #[test]
    fn test_help_lists_commands() {
        let mut app = test_app();
        dispatch(&mut app, "help");
        assert!(app.console.lines().iter().any(|l| l.contains("break (b)")));
        assert!(app.console.lines().iter().any(|l| l.contains("train")));
    }

    #[test]
    fn test_parse_hex24() {
        assert_eq!(parse_hex24("0x100200"), Some(0x100200));
        assert_eq!(parse_hex24("FF100200"), Some(0x100200));
        assert_eq!(parse_hex24("0x"), None);
        assert_eq!(parse_hex24("12g4"), None);
    }

    #[test]
    fn test_parse_hex_strict_reports_digits() {
        assert_eq!(parse_hex_strict("0x0042"), Some((0x42, 4)));
        assert_eq!(parse_hex_strict("42"), None);
        assert_eq!(parse_hex_strict("0xZZ"), None);
    }

    #[test]
    fn test_parse_u32_auto() {
        assert_eq!(parse_u32_auto("42"), Some(42));
        assert_eq!(parse_u32_auto("0x2a"), Some(42));
        assert_eq!(parse_u32_auto("-1"), None);
        assert_eq!(parse_u32_auto("2a"), None);
    }

    #[test]
    fn test_numeric_fast_path() {
        assert_eq!(parse_numeric_fast_path("42"), Some((false, 42)));
        assert_eq!(parse_numeric_fast_path("*0x100200"), Some((true, 0x100200)));
        assert_eq!(parse_numeric_fast_path("* ( 42 )"), Some((true, 42)));
        assert_eq!(parse_numeric_fast_path("(0x10)"), Some((false, 0x10)));
        assert_eq!(parse_numeric_fast_path("x"), None);
        assert_eq!(parse_numeric_fast_path("(42"), None);
        assert_eq!(parse_numeric_fast_path("42 junk"), None);
    }

    #[test]
    fn test_print_fast_path_without_core() {
        let mut app = test_app();
        dispatch(&mut app, "print 42");
        assert_eq!(app.console.lines(), &["42: 42 (0x2A)".to_owned()]);
    }

    #[test]
    fn test_break_requires_elf() {
        let mut app = test_app();
        dispatch(&mut app, "break main");
        assert!(app.console.lines()[0].starts_with("break: no ELF path"));
    }

    #[test]
    fn test_loop_requires_recorded_frames() {
        let mut app = test_app();
        dispatch(&mut app, "loop 1 2");
        assert!(app.console.lines()[0].contains("not in state buffer"));

        dispatch(&mut app, "loop 2 1");
        assert!(app.console.lines()[1].contains("expected from < to"));

        dispatch(&mut app, "loop");
        assert_eq!(app.console.lines()[2], "loop: disabled");
    }

    #[test]
    fn test_transition_persists_mode() {
        let mut app = test_app();
        app.config_path = None;
        dispatch(&mut app, "transition doom");
        assert_eq!(app.transition_mode, "doom");
        assert_eq!(app.config.get("transition"), Some("doom"));

        dispatch(&mut app, "transition warp9");
        assert!(app.console.lines().last().unwrap().contains("unknown mode"));
    }

    #[test]
    fn test_steps_without_core_report_unsupported() {
        let mut app = test_app();
        dispatch(&mut app, "stepi");
        assert!(app.console.lines()[0].starts_with("stepi: "));
    }

    #[test]
    fn test_complete_command_word() {
        let mut app = test_app();
        let (items, pos) = complete(&mut app, "pr", 2);
        assert_eq!(items, vec!["print".to_owned(), "protect".to_owned()]);
        assert_eq!(pos, 0);

        let (items, pos) = complete(&mut app, "  st", 4);
        assert_eq!(items, vec!["step".to_owned(), "stepi".to_owned()]);
        assert_eq!(pos, 2);
    }

    #[test]
    fn test_complete_transition_argument() {
        let mut app = test_app();
        let (items, pos) = complete(&mut app, "transition d", 12);
        assert_eq!(items, vec!["doom".to_owned()]);
        assert_eq!(pos, 11);
    }

    #[test]
    fn test_complete_unknown_argument_position() {
        let mut app = test_app();
        let (items, _) = complete(&mut app, "cls anything", 12);
        assert!(items.is_empty());
    }
}
