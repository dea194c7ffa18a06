//! Leveled logging over a sink registered in [`crate::env`].
//!
//! `debug!` is meant for the dispatch hot paths and compiles away unless
//! the `trace-dispatch` feature is enabled. The other levels always
//! format; with no sink registered the record is dropped.

use core::fmt::Arguments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

pub type LogSink = fn(LogLevel, &str, Arguments);

#[doc(hidden)]
pub fn _log(level: LogLevel, module: &str, args: Arguments) {
    if let Some(sink) = crate::env::log_sink() {
        sink(level, module, args);
    }
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logging::_log($crate::logging::LogLevel::Info, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logging::_log($crate::logging::LogLevel::Warn, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logging::_log($crate::logging::LogLevel::Error, module_path!(), format_args!($($arg)*))
    };
}

/// Hot-path tracing, compiled in only with the `trace-dispatch` feature.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "trace-dispatch")]
        $crate::logging::_log($crate::logging::LogLevel::Debug, module_path!(), format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static RECORDS: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(_level: LogLevel, _module: &str, _args: Arguments) {
        RECORDS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn records_reach_the_sink() {
        let _guard = testing::env_guard();
        crate::env::configure(|env| env.log_sink = Some(counting_sink));
        let before = RECORDS.load(Ordering::Relaxed);
        crate::info!("interface map rebuilt for {} types", 3);
        crate::warn!("dispatch map rejected");
        assert_eq!(RECORDS.load(Ordering::Relaxed), before + 2);
        crate::env::configure(|env| env.log_sink = None);
    }

    #[test]
    fn no_sink_drops_records() {
        let _guard = testing::env_guard();
        crate::env::configure(|env| env.log_sink = None);
        crate::error!("nothing listens");
    }
}
