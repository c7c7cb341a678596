//! Debug utilities for tracking leaked GPU objects.
//!
//! Only compiled when the `debug` feature is enabled.

pub(crate) mod backtrace;
