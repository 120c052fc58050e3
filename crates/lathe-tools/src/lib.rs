//! Filesystem-backed tools for Lathe runs.
//!
//! [`LocalWorkspace`] implements [`lathe_core::tools::ToolHost`] over a
//! directory on disk. The standard coding tools (shell, read_file,
//! write_file, list_directory, grep) are available via
//! [`builtin::all_tools()`].

pub mod builtin;
pub mod workspace;

pub use builtin::{all_tools, registry};
pub use workspace::LocalWorkspace;
