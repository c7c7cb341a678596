//! Build script for fencealloc.
//!
//! Reports enabled features and flags combinations that are likely
//! mistakes for users integrating fencealloc into their projects.

use std::env;

fn main() {
    // Re-run if features change
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_TRACY");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_GPU_VULKAN");

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let tracy_enabled = env::var("CARGO_FEATURE_TRACY").is_ok();
    let vulkan_enabled = env::var("CARGO_FEATURE_GPU_VULKAN").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    // =========================================================================
    // Feature-specific diagnostics
    // =========================================================================

    if debug_enabled {
        emit_info("Debug features enabled");
        emit_note("Leaked fences are reported with the backtrace of their acquire site.");

        if is_release {
            emit_warning("Debug features enabled in release build!");
            emit_note("Every fence acquire captures a backtrace. Consider disabling for production.");
        }
    }

    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    }

    if tracy_enabled {
        emit_info("Tracy profiler integration enabled");
        emit_note("Frame marks and pool usage plots are sent from GpuResourceContext::end_frame.");
    }

    if vulkan_enabled {
        emit_info("Vulkan backend enabled (fencealloc::gpu::vulkan)");
    }

    if is_release && !parking_lot_enabled {
        emit_note("Tip: Consider enabling 'parking_lot' for better mutex performance:");
        emit_note("  fencealloc = { version = \"0.3\", features = [\"parking_lot\"] }");
    }

    check_target();
}

// =============================================================================
// Diagnostic emission helpers
// =============================================================================

fn emit_info(msg: &str) {
    println!("cargo:warning=[fencealloc] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[fencealloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[fencealloc] warning: {}", msg);
}

fn check_target() {
    let target = env::var("TARGET").unwrap_or_default();

    if target.contains("wasm") {
        emit_warning("WebAssembly target detected");
        emit_note("Only the host backend is available; fence waits cannot block on wasm32.");
    }
}
