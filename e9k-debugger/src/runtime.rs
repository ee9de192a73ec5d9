//! The run loop and frame scheduler.
//!
//! A strictly single-threaded cooperative loop: frames execute at the
//! core-reported cadence via a frame-time accumulator, with a speed
//! multiplier, explicit frame stepping in both directions, and loop-range
//! replay from the state history. The vblank hook (installed at startup)
//! increments the shared frame counter; state capture happens at the
//! frame boundary, tagged with the counter value before the hook's
//! increment.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use e9k_common::mask24;

use crate::app::App;
use crate::commands;
use crate::profile;

/// How one frame is driven: a live captured frame, or a replay restored
/// from the state history.
#[derive(Clone, Copy, Debug)]
pub enum RunMode {
    Capture,
    Restore(u64),
}

/// Installs the vblank hook that advances the frame counter.
pub fn install_vblank_hook(app: &mut App) {
    let counter = app.frame_counter.clone();
    match app.bridge.set_vblank_hook(Box::new(move || {
        counter.set(counter.get() + 1);
    })) {
        Ok(()) => app.vblank_hooked = true,
        Err(e) => {
            // Without the hook the loop counts frames itself, at the cost
            // of mid-frame accuracy.
            tracing::warn!(error = %e, "no vblank callback; counting frames per run");
            app.vblank_hooked = false;
        }
    }
}

/// Runs a single frame, capturing or restoring state first.
pub fn execute_frame(app: &mut App, mode: RunMode) {
    match mode {
        RunMode::Capture => {
            app.history.set_current_frame_no(app.frame_counter.get());
            if app.rolling_record {
                if let Err(e) = app.history.capture(&mut app.bridge) {
                    tracing::debug!(error = %e, "state capture skipped");
                }
            }
        }
        RunMode::Restore(frame_no) => {
            app.history.set_current_frame_no(frame_no);
            if let Err(e) = app.history.restore_frame_no(&mut app.bridge, frame_no) {
                tracing::debug!(frame_no, error = %e, "state restore failed");
            }
        }
    }
    app.bridge.run_once();
    if !app.vblank_hooked {
        app.frame_counter.set(app.frame_counter.get() + 1);
    }
}

/// Advances one frame, honoring loop-range replay.
fn execute_next_frame(app: &mut App) {
    if let Some((from, to)) = app.loop_range {
        let frame = app.frame_counter.get();
        if frame < from || frame >= to {
            // Rewind; the next tick replays `from + 1` from history.
            app.frame_counter.set(from);
        } else {
            execute_frame(app, RunMode::Restore(frame + 1));
        }
    } else {
        app.bridge.replay_frame(app.frame_counter.get() + 1);
        execute_frame(app, RunMode::Capture);
    }
}

/// Handles the running -> paused transition: clears any pending frame
/// step, reinstalls a suppressed breakpoint, and consumes the pending
/// watchbreak (auto-resuming when its address is on the train ignore
/// list).
fn on_pause_transition(app: &mut App) {
    app.clear_frame_step();
    app.restore_suppressed_breakpoint();

    if let Ok(Some(wb)) = app.bridge.consume_watchbreak() {
        app.train.set_last_watchbreak(&wb);
        let addr = mask24(wb.access_addr);
        if app.train.is_ignored(addr) {
            let _ = app.bridge.resume();
            app.machine.set_running(true);
            return;
        }
        let kind = if wb.is_write() { "write" } else { "read" };
        match wb.old_value() {
            Some(old) => app.console.push(format!(
                "watchbreak: wp[{}] {kind} addr=0x{addr:06X} value=0x{:08X} old=0x{old:08X}",
                wb.index, wb.value
            )),
            None => app.console.push(format!(
                "watchbreak: wp[{}] {kind} addr=0x{addr:06X} value=0x{:08X}",
                wb.index, wb.value
            )),
        }
    }
    app.machine.refresh_regs(&app.bridge);
}

/// One scheduler tick: poll the pause state, run due frames, drain core
/// debug text and the profiler stream.
pub fn tick(app: &mut App, dt: f64, frame_time_accum: &mut f64) {
    if app.bridge.is_running() {
        if let Ok(paused) = app.bridge.is_paused() {
            let was_running = app.machine.is_running();
            app.machine.set_running(!paused);
            if paused && was_running {
                on_pause_transition(app);
            }
        }

        let running = app.machine.is_running();
        if app.seeking || app.frame_step_mode || !running {
            *frame_time_accum = 0.0;
        }

        if !app.seeking {
            if app.frame_step_mode {
                if app.frame_step_pending > 0 {
                    execute_next_frame(app);
                } else if app.frame_step_pending < 0 {
                    // Step back: restore two frames earlier; the vblank
                    // increment inside the run lands the counter one
                    // frame before where we were.
                    let target = app.frame_counter.get().saturating_sub(2);
                    execute_frame(app, RunMode::Restore(target));
                    app.frame_counter
                        .set(app.frame_counter.get().saturating_sub(2));
                }
                app.frame_step_pending = 0;
            } else if running {
                let mult = app.speed_multiplier.max(1);
                if mult > 1 {
                    *frame_time_accum = 0.0;
                    for _ in 0..mult {
                        app.bridge.replay_frame(app.frame_counter.get() + 1);
                        execute_frame(app, RunMode::Capture);
                    }
                } else {
                    let fps = app.bridge.timing_fps();
                    let frame_time = if fps > 1e-3 { 1.0 / fps } else { 1.0 / 60.0 };
                    *frame_time_accum += dt;
                    while *frame_time_accum >= frame_time {
                        execute_next_frame(app);
                        *frame_time_accum -= frame_time;
                    }
                }
            }
        }

        let mut buf = [0u8; 256];
        loop {
            let n = app.bridge.debug_text_read(&mut buf);
            if n == 0 {
                break;
            }
            app.console.feed_debug_text(&buf[..n.min(buf.len())]);
        }
    }

    profile::drain_stream(app);
}

/// The main loop: commands from the prompt thread, then one tick, at a
/// millisecond poll cadence (frame pacing itself happens through the
/// accumulator).
pub fn run_loop(app: &mut App, prompt: Receiver<String>) {
    let mut last = Instant::now();
    let mut frame_time_accum = 0.0;

    while !app.quit {
        let now = Instant::now();
        let dt = (now - last).as_secs_f64().min(0.25);
        last = now;

        while let Ok(line) = prompt.try_recv() {
            let line = line.trim().to_owned();
            if line.is_empty() {
                continue;
            }
            if matches!(line.as_str(), "quit" | "q" | "exit") {
                app.quit = true;
                break;
            }
            // The UI build pauses from the prompt widget's Ctrl-C; the
            // CLI spells it out.
            if line == "pause" {
                commands::send_interrupt(app);
                continue;
            }
            // Headless hook into the completion engine, for scripts and
            // external frontends.
            if let Some(rest) = line.strip_prefix("complete ") {
                let (items, _) = commands::complete(app, rest, rest.len());
                for item in items {
                    app.console.push(item);
                }
                continue;
            }
            // The CLI stand-ins for the UI frame-step buttons.
            if line == "frame+" || line == "frame-" {
                app.frame_step_mode = true;
                app.frame_step_pending = if line == "frame+" { 1 } else { -1 };
                continue;
            }
            app.prompt_history.push(&line);
            commands::dispatch(app, &line);
        }

        tick(app, dt, &mut frame_time_accum);
        std::thread::sleep(Duration::from_millis(1));
    }
}
