//! Structured log events for bulk loads.
//!
//! Every event goes to target `"bulkload"` with a snake_case `event` field and
//! a `component` field naming the stage that emitted it: `mapper`,
//! `assembler`, `commit`, `store` or `job`. Nothing here installs a
//! subscriber; the `bulkload` binary sets one up from `RUST_LOG`.

pub(crate) const BULKLOAD_TARGET: &str = "bulkload";

macro_rules! log_event {
    ($level:ident, $($field:tt)*) => {
        ::tracing::event!(
            target: $crate::observability::BULKLOAD_TARGET,
            ::tracing::Level::$level,
            $($field)*
        )
    };
}

/// ```ignore
/// log_info!(
///     component = "assembler",
///     event = "staged_file_written",
///     partition = %file.partition(),
///     mutations = file.mutations(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        $crate::observability::log_event!(INFO, $($field)*)
    };
}

macro_rules! log_debug {
    ($($field:tt)*) => {
        $crate::observability::log_event!(DEBUG, $($field)*)
    };
}

macro_rules! log_warn {
    ($($field:tt)*) => {
        $crate::observability::log_event!(WARN, $($field)*)
    };
}

macro_rules! log_error {
    ($($field:tt)*) => {
        $crate::observability::log_event!(ERROR, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_event;
pub(crate) use log_info;
pub(crate) use log_warn;
