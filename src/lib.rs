/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("deploy", "Pushing {} to {}", image, registry);
/// log_status!("pipeline", "Stage {} finished", stage_id);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod output;
pub mod utils;

// Re-export everything from core so callers can write `deployctl::deploy`.
pub use self::core::*;
