//! Convenience re-exports for common use.

pub use lathe_core::prelude::*;
pub use lathe_tools::LocalWorkspace;
