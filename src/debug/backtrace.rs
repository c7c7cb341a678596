//! Acquire-site backtrace tracking.
//!
//! Fences remember where they were acquired so a teardown leak assertion
//! can say who is still holding one.

use std::collections::HashMap;

use crate::sync::mutex::Mutex;

/// Backtraces keyed by an object index.
#[derive(Default)]
pub(crate) struct BacktraceTracker {
    traces: Mutex<HashMap<u32, String>>,
}

impl BacktraceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current call stack for `index`.
    pub fn record(&self, index: u32) {
        let bt = ::backtrace::Backtrace::new();
        self.traces.lock().insert(index, format!("{:?}", bt));
    }

    /// Forget `index`.
    pub fn forget(&self, index: u32) {
        self.traces.lock().remove(&index);
    }

    /// Format every recorded trace for a leak report.
    pub fn report(&self) -> String {
        let traces = self.traces.lock();
        let mut out = format!("{} object(s) still referenced", traces.len());
        for (index, trace) in traces.iter() {
            out.push_str(&format!("\n  #{} acquired at:\n{}", index, trace));
        }
        out
    }
}
