//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` facade, or a custom
//! per-thread sink, and owns the fatal path.

use std::cell::RefCell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::kind::{Diagnostic, DiagnosticKind};

/// Global flag to suppress stderr output (sinks still receive diagnostics).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static THREAD_SINK: RefCell<Option<Arc<dyn DiagnosticSink>>> = RefCell::new(None);
}

/// Suppress stderr diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Route diagnostics raised on the current thread to `sink` as well.
///
/// Returns the previously installed sink.
pub fn set_thread_sink(sink: Option<Arc<dyn DiagnosticSink>>) -> Option<Arc<dyn DiagnosticSink>> {
    THREAD_SINK.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), sink))
}

/// Emit a diagnostic.
pub fn emit(diag: &Diagnostic) {
    dispatch(diag, None);
}

/// Emit a diagnostic with additional runtime context (pool name, sizes, ...).
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    dispatch(diag, Some(context));
}

/// Emit a fatal diagnostic and stop.
///
/// Every caller of this is a place where continuing would risk the GPU
/// reading or writing memory that has been handed to someone else.
#[cold]
#[track_caller]
pub fn fatal(diag: &Diagnostic, context: &str) -> ! {
    debug_assert_eq!(diag.kind, DiagnosticKind::Fatal);
    dispatch(diag, Some(context));
    panic!("[fencealloc][{}] {}: {}", diag.code, diag.message, context);
}

fn dispatch(diag: &Diagnostic, context: Option<&str>) {
    THREAD_SINK.with(|slot| {
        if let Some(sink) = slot.borrow().as_ref() {
            sink.emit(diag, context);
        }
    });

    #[cfg(feature = "log")]
    emit_to_log(diag, context);

    if is_suppressed() {
        return;
    }

    // Fatal diagnostics always reach stderr; the rest only in debug builds
    // unless the `diagnostics` feature asks for them.
    if diag.kind == DiagnosticKind::Fatal || cfg!(any(debug_assertions, feature = "diagnostics")) {
        emit_to_stderr(diag, context);
    }
}

fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[fencealloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );

    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }

    let _ = writeln!(stderr);
}

/// Emit a diagnostic using the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("-");
    match diag.kind {
        DiagnosticKind::Fatal => {
            log::error!("[{}] {} ({})", diag.code, diag.message, context);
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {} ({})", diag.code, diag.message, context);
        }
        DiagnosticKind::Note => {
            log::info!("[{}] {} ({})", diag.code, diag.message, context);
        }
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic.
    fn emit(&self, diag: &Diagnostic, context: Option<&str>);
}

/// A simple sink that collects diagnostics.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: crate::sync::mutex::Mutex<Vec<(Diagnostic, Option<String>)>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<(Diagnostic, Option<String>)> {
        self.diagnostics.lock().clone()
    }

    /// Codes of every collected diagnostic, in order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.diagnostics.lock().iter().map(|(d, _)| d.code).collect()
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        self.diagnostics.lock().clear();
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: Option<&str>) {
        self.diagnostics
            .lock()
            .push((diag.clone(), context.map(str::to_owned)));
    }
}
