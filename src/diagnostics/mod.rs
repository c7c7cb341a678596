//! Diagnostics and profiler hooks.
//!
//! This module provides:
//! - **Runtime diagnostics**: coded messages for every failure class
//! - **Fatal path**: configuration bugs and invariant violations stop the process
//! - **Profiler integration**: Tracy and custom profiler callbacks
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | GR0xx | Fences and the fence pool      |
//! | GR1xx | Micro-object recycling         |
//! | GR2xx | Deferred garbage collection    |
//! | GR3xx | Segregated-list memory pools   |
//! | GR4xx | Stack and transient pools      |
//! | GR9xx | Native backend failures        |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fencealloc::diagnostics::{set_thread_sink, CollectingSink};
//!
//! let sink = std::sync::Arc::new(CollectingSink::new());
//! set_thread_sink(Some(sink.clone()));
//! // ... run a frame ...
//! assert!(sink.codes().is_empty());
//! ```

pub mod emit;
pub mod kind;
#[macro_use]
pub mod macros;
pub mod tracy;

pub use emit::{
    emit, emit_with_context, fatal, set_thread_sink, suppress_diagnostics, CollectingSink,
    DiagnosticSink,
};
pub use kind::{Diagnostic, DiagnosticKind};
pub use kind::{
    GR001, GR002, GR003, GR004, GR101, GR102, GR201, GR202, GR203, GR301, GR302, GR303, GR304,
    GR305, GR401, GR402, GR403, GR901,
};
pub use tracy::{MemoryEvent, ProfilerHooks};
