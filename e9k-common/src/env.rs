use std::env;

use once_cell::sync::Lazy;

fn flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => !v.is_empty() && v != "0",
        Err(_) => false,
    }
}

/// `E9K_PRINT_DEBUG`: verbose diagnostics from the debug-info loaders and
/// the expression evaluator.
pub fn print_debug_enabled() -> bool {
    static CACHED: Lazy<bool> = Lazy::new(|| flag("E9K_PRINT_DEBUG"));
    *CACHED
}

/// `E9K_PRINT_PERF`: timing of the debug-info load pipeline.
pub fn print_perf_enabled() -> bool {
    static CACHED: Lazy<bool> = Lazy::new(|| flag("E9K_PRINT_PERF"));
    *CACHED
}

/// `E9K_STABS_PREFER_DATA`: make ambiguous `STSYM` entries default to
/// `.data` instead of `.bss`.
pub fn stabs_prefer_data() -> bool {
    static CACHED: Lazy<bool> = Lazy::new(|| flag("E9K_STABS_PREFER_DATA"));
    *CACHED
}

/// `E9K_PRINT_DEBUG_SYM`: restrict per-symbol diagnostics to names
/// containing this substring. Empty/unset disables the filter.
pub fn print_debug_symbol_filter() -> Option<String> {
    static CACHED: Lazy<Option<String>> =
        Lazy::new(|| env::var("E9K_PRINT_DEBUG_SYM").ok().filter(|v| !v.is_empty()));
    CACHED.clone()
}

/// `E9K_PROFILE_JSON`: path to dump the checkpoint profile report as JSON
/// on shutdown.
pub fn profile_json_path() -> Option<String> {
    static CACHED: Lazy<Option<String>> =
        Lazy::new(|| env::var("E9K_PROFILE_JSON").ok().filter(|v| !v.is_empty()));
    CACHED.clone()
}

/// True if `name` matches the `E9K_PRINT_DEBUG_SYM` filter.
pub fn debug_wants_symbol(name: &str) -> bool {
    match print_debug_symbol_filter() {
        Some(want) => name.contains(&want),
        None => false,
    }
}
