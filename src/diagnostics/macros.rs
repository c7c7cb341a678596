//! Diagnostic macros.
//!
//! These format the runtime context (pool name, class, size) lazily, so the
//! hot paths pay nothing until a diagnostic actually fires.

/// Raise a fatal diagnostic with formatted context. Never returns.
///
/// # Example
///
/// ```rust,ignore
/// gr_fatal!(GR301, "pool '{}': requested {} bytes", name, size);
/// ```
#[macro_export]
macro_rules! gr_fatal {
    ($code:ident, $($arg:tt)+) => {
        $crate::diagnostics::emit::fatal(
            &$crate::diagnostics::kind::$code,
            &::std::format!($($arg)+),
        )
    };
}

/// Emit a non-fatal diagnostic with formatted context.
#[macro_export]
macro_rules! gr_warn {
    ($code:ident, $($arg:tt)+) => {
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::kind::$code,
            &::std::format!($($arg)+),
        )
    };
}

/// Assert an invariant, raising a fatal diagnostic when it does not hold.
///
/// Unlike `debug_assert!`, this stays on in release builds.
#[macro_export]
macro_rules! gr_check {
    ($cond:expr, $code:ident, $($arg:tt)+) => {
        if !$cond {
            $crate::gr_fatal!($code, $($arg)+);
        }
    };
}

/// Internal tracing through the `log` facade; compiled out without the feature.
macro_rules! gr_log {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            log::$level!($($arg)+);
        }
    }};
}

pub(crate) use gr_log;
