//! Diagnostic kinds and the predefined diagnostic table.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Unrecoverable: the process must stop before GPU memory is corrupted.
    Fatal,
    /// Something is probably wrong or suboptimal.
    Warning,
    /// Informational.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Fatal => "fatal",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `GR0xx` - Fences and the fence pool
/// - `GR1xx` - Micro-object recycling
/// - `GR2xx` - Deferred garbage collection
/// - `GR3xx` - Segregated-list memory pools
/// - `GR4xx` - Stack and transient memory pools
/// - `GR9xx` - Native backend failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "GR301").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new fatal diagnostic.
    pub const fn fatal(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Fatal,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// GR0xx - Fences
// =============================================================================

/// GR001: Timed out waiting for a fence to come back to the pool.
pub const GR001: Diagnostic = Diagnostic::fatal(
    "GR001",
    "fence pool exhausted and no fence was released in time"
).with_note("every fence up to the pool cap is referenced or still pending on the GPU")
 .with_help("check for fences held past their frame, or raise fence_pool_cap");

/// GR002: The backend could not create a native fence.
pub const GR002: Diagnostic = Diagnostic::fatal(
    "GR002",
    "native fence creation failed"
).with_note("the driver or OS ran out of fence objects");

/// GR003: Pool torn down while fences are still referenced.
pub const GR003: Diagnostic = Diagnostic::fatal(
    "GR003",
    "fence pool destroyed while fences are still referenced"
).with_note("a GPU object is outliving the signal that guards it")
 .with_help("drop every Fence handle (garbage, recyclers, transient pools) before the pool");

/// GR004: A fence query or wait failed in the driver.
pub const GR004: Diagnostic = Diagnostic::fatal(
    "GR004",
    "native fence query failed"
).with_note("this usually means the device was lost");

// =============================================================================
// GR1xx - Micro-object recycling
// =============================================================================

/// GR101: Recycler destroyed while an object may still be used by the GPU.
pub const GR101: Diagnostic = Diagnostic::fatal(
    "GR101",
    "micro-object recycler destroyed while an object's fence is pending"
).with_help("wait for the device to go idle before destroying the recycler");

/// GR102: Recycler holds more pending objects than its cap.
pub const GR102: Diagnostic = Diagnostic::warning(
    "GR102",
    "micro-object recycler is over its cache cap"
).with_note("the excess objects are still guarded by pending fences and cannot be trimmed yet");

// =============================================================================
// GR2xx - Deferred garbage collection
// =============================================================================

/// GR201: Collector destroyed with uncollected garbage.
pub const GR201: Diagnostic = Diagnostic::fatal(
    "GR201",
    "garbage collector destroyed while garbage is still pending"
).with_help("seal the last garbage with end_frame() and call wait_idle(), or shutdown() on the context");

/// GR202: Timed out waiting for garbage fences during shutdown.
pub const GR202: Diagnostic = Diagnostic::fatal(
    "GR202",
    "timed out waiting for frame garbage fences"
).with_note("the GPU never finished a frame that still owns garbage");

/// GR203: Many sealed buckets are waiting on fences.
pub const GR203: Diagnostic = Diagnostic::warning(
    "GR203",
    "frame garbage is piling up"
).with_note("sealed buckets are not being collected because their fences are not signaling")
 .with_help("make sure each frame's fence is actually submitted to the GPU");

// =============================================================================
// GR3xx - Segregated-list memory pools
// =============================================================================

/// GR301: Request larger than the largest size class.
pub const GR301: Diagnostic = Diagnostic::fatal(
    "GR301",
    "asked for too much memory"
).with_note("the request is larger than the largest size class of the pool")
 .with_help("tune the pool's size classes for this workload");

/// GR302: The size class table is malformed.
pub const GR302: Diagnostic = Diagnostic::fatal(
    "GR302",
    "invalid size class table"
).with_help("classes must be non-empty, strictly increasing, and no larger than the pool size");

/// GR303: Pool torn down with allocations still outstanding.
pub const GR303: Diagnostic = Diagnostic::fatal(
    "GR303",
    "memory pool destroyed while allocations are still live"
);

/// GR304: Token does not belong to this pool.
pub const GR304: Diagnostic = Diagnostic::fatal(
    "GR304",
    "freed an allocation that this pool does not own"
).with_note("the token is stale or came from another pool");

/// GR305: Alignment the pool cannot honor.
pub const GR305: Diagnostic = Diagnostic::fatal(
    "GR305",
    "unsupported allocation alignment"
).with_note("alignments must be powers of two no larger than the backend's block alignment");

// =============================================================================
// GR4xx - Stack and transient pools
// =============================================================================

/// GR401: Single stack allocation larger than the maximum chunk.
pub const GR401: Diagnostic = Diagnostic::fatal(
    "GR401",
    "stack allocation exceeds the maximum chunk size"
).with_help("raise stack_max_chunk or move this data to a segregated pool");

/// GR402: Stack pool reset while its retire fence is still pending.
pub const GR402: Diagnostic = Diagnostic::fatal(
    "GR402",
    "stack pool reset while the GPU may still read the previous frame"
).with_help("wait on the frame fence before calling end_frame()");

/// GR403: Timed out waiting for a transient slot's fence.
pub const GR403: Diagnostic = Diagnostic::fatal(
    "GR403",
    "timed out waiting for a transient memory slot to retire"
);

// =============================================================================
// GR9xx - Native backend
// =============================================================================

/// GR901: Native memory allocation or bind failed.
pub const GR901: Diagnostic = Diagnostic::fatal(
    "GR901",
    "native device memory allocation failed"
).with_note("allocator state cannot be kept consistent after a driver failure");
