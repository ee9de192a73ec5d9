mod app;
mod commands;
mod config;
mod console;
mod history;
mod machine;
mod profile;
mod protect;
mod runtime;
mod snapshot;
mod train;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use e9k_debuginfo::SectionBases;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::config::Config;
use crate::history::PromptHistory;

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

/// Time-travel debugger host for libretro-style emulator cores.
#[derive(Debug, Parser)]
#[command(name = "e9k-debugger", version)]
struct Cli {
    /// Path to the core shared object.
    #[arg(long)]
    core: PathBuf,

    /// Path to the cartridge/ROM image.
    #[arg(long)]
    rom: PathBuf,

    /// System/BIOS directory handed to the core.
    #[arg(long)]
    system_dir: PathBuf,

    /// Save directory (defaults to the system directory).
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Guest ELF with debug info for `break`/`print`.
    #[arg(long)]
    elf: Option<PathBuf>,

    /// Toolchain prefix for objdump/readelf (e.g. `m68k-elf-`).
    #[arg(long, default_value = "m68k-neogeo-elf-")]
    toolchain_prefix: String,

    /// Byte budget of the rolling state history, in MiB.
    #[arg(long, default_value_t = 128)]
    state_budget_mb: usize,

    /// Record input to this file.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Replay input from this file.
    #[arg(long)]
    playback: Option<PathBuf>,

    /// Auto-press START after boot to skip the BIOS logo.
    #[arg(long)]
    skip_bios_logo: bool,

    /// Audio backlog budget in milliseconds.
    #[arg(long, default_value_t = 50)]
    audio_buffer_ms: u32,

    /// Disable audio output.
    #[arg(long)]
    no_audio: bool,

    /// Disable the rolling state record (and reverse stepping).
    #[arg(long)]
    no_rolling_record: bool,

    /// Core option override, `KEY=VALUE`. May repeat.
    #[arg(long = "core-option", value_name = "KEY=VALUE")]
    core_options: Vec<String>,

    /// Guest `.text` load address (hex).
    #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
    text_base: u32,

    /// Guest `.data` load address (hex).
    #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
    data_base: u32,

    /// Guest `.bss` load address (hex).
    #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
    bss_base: u32,

    /// Config file path (defaults to the per-user config).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let mut filter = EnvFilter::from_default_env();
    if e9k_common::print_debug_enabled() {
        // E9K_PRINT_DEBUG turns up the debug-info and evaluator
        // diagnostics without a RUST_LOG incantation.
        for directive in ["e9k_debuginfo=debug", "e9k_eval=trace"] {
            if let Ok(directive) = directive.parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut app = App::new(cli.state_budget_mb << 20, true);
    app.elf_path = cli.elf.clone();
    app.toolchain_prefix = cli.toolchain_prefix.clone();
    app.rolling_record = !cli.no_rolling_record;
    app.machine.bases = SectionBases {
        text: cli.text_base,
        data: cli.data_base,
        bss: cli.bss_base,
    };

    if let Some(path) = cli.config.clone().or_else(Config::default_path) {
        app.config_path = Some(path.clone());
        if let Ok(config) = Config::load(&path) {
            app.config = config;
        }
        if let Some(mode) = app.config.get("transition") {
            app.transition_mode = mode.to_owned();
        }
    }
    if let Some(path) = PromptHistory::default_path() {
        app.prompt_history.load(&path);
    }

    app.bridge.set_audio_buffer_ms(cli.audio_buffer_ms);
    app.bridge.set_skip_bios_logo(cli.skip_bios_logo);
    for option in &cli.core_options {
        match option.split_once('=') {
            Some((key, value)) => app.bridge.set_core_option(key, value),
            None => tracing::warn!(option = %option, "ignoring malformed --core-option"),
        }
    }

    app.bridge
        .start(
            &cli.core,
            &cli.rom,
            &cli.system_dir,
            cli.save_dir.as_deref(),
        )
        .with_context(|| format!("failed to start core {}", cli.core.display()))?;
    if cli.no_audio {
        app.bridge.set_audio_enabled(false);
    }

    let save_dir = cli
        .save_dir
        .clone()
        .unwrap_or_else(|| cli.system_dir.clone());
    snapshot::load_on_boot(&mut app, &save_dir);
    runtime::install_vblank_hook(&mut app);

    if let Some(path) = &cli.playback {
        app.bridge
            .recorder_mut()
            .load(path)
            .with_context(|| format!("failed to load input record {}", path.display()))?;
        app.bridge.recorder_mut().set_playback(true);
    }
    if cli.playback.is_none() {
        app.bridge.recorder_mut().start_recording();
    }

    // The prompt thread feeds command lines; everything else stays on
    // this thread.
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    runtime::run_loop(&mut app, rx);

    if let Some(path) = &cli.record {
        if let Err(e) = app.bridge.recorder().save(path) {
            tracing::warn!(path = %path.display(), error = %e, "input record save failed");
        }
    }
    snapshot::save_on_exit(&app, &save_dir);
    if e9k_common::print_perf_enabled() {
        let report = profile::checkpoint_report(&app);
        app.console.extend(report);
    }
    if let Some(path) = e9k_common::profile_json_path() {
        profile::dump_json(&app, std::path::Path::new(&path));
    }
    app.save_config();
    app.bridge.shutdown();
    Ok(())
}
