//! Public entry points.
//!
//! Most users only need [`GpuResourceContext`] and [`ResourceConfig`]; the
//! component modules are public for engines that wire them up differently.

pub mod config;
pub mod context;

pub use config::ResourceConfig;
pub use context::GpuResourceContext;
