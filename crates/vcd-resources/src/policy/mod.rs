//! Provider-scoped compute policies.

pub mod vm_sizing;

pub use vm_sizing::VmSizingPolicy;
