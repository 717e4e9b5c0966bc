//! Test utilities for exercising the reconciliation kernel without a live
//! Cloud Director.
//!
//! - [`MemVcd`]: in-memory [`vcd_sdk::VcdClient`] with seeding helpers, task
//!   latency, the remote rules the kernel has to cope with (busy parents,
//!   power-off-required changes, lagging catalog indexes) and call recording.
//! - [`init_tracing`]: installs a test-friendly `tracing` subscriber once.

mod mem_vcd;

pub use mem_vcd::{CallRecord, MemVcd, MutationWindow, ops};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}
