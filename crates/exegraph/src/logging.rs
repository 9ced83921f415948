use std::env;
use std::fmt::Arguments;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy)]
enum TraceLevel {
    Off,
    Basic,
    Full,
}

static TRACE_LEVEL: OnceLock<TraceLevel> = OnceLock::new();

fn parse_trace_level(value: &str) -> TraceLevel {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" => TraceLevel::Basic,
        "full" => TraceLevel::Full,
        _ => TraceLevel::Off,
    }
}

fn trace_level() -> TraceLevel {
    *TRACE_LEVEL.get_or_init(|| {
        env::var("EXEGRAPH_TRACE")
            .ok()
            .as_deref()
            .map(parse_trace_level)
            .unwrap_or(TraceLevel::Off)
    })
}

fn trace_enabled() -> bool {
    matches!(trace_level(), TraceLevel::Basic | TraceLevel::Full)
}

fn trace_full_enabled() -> bool {
    matches!(trace_level(), TraceLevel::Full)
}

fn timestamp_hms() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

fn emit(kind: &str, args: Arguments) {
    eprintln!("{} [{kind}] -- {args}", timestamp_hms());
}

/// Emit a trace message when `EXEGRAPH_TRACE` allows it.
pub fn emit_trace(args: Arguments) {
    if trace_full_enabled() {
        emit("TRACE", args);
    }
}

/// Emit a warning message when `EXEGRAPH_TRACE` allows it.
pub fn emit_warning(args: Arguments) {
    if trace_enabled() {
        emit("WARNING", args);
    }
}

/// Emit an error message when `EXEGRAPH_TRACE` allows it.
pub fn emit_error(args: Arguments) {
    if trace_enabled() {
        emit("ERROR", args);
    }
}

/// Trace-level log line.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::logging::emit_trace(format_args!($($arg)*))
    };
}

/// Warning-level log line.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        $crate::logging::emit_warning(format_args!($($arg)*))
    };
}

/// Error-level log line.
#[macro_export]
macro_rules! error_log {
    ($($arg:tt)*) => {
        $crate::logging::emit_error(format_args!($($arg)*))
    };
}
