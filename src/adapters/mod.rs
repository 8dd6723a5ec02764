//! Adapters for external systems.

pub mod markdown;
pub mod process;

pub use markdown::MarkdownTaskSource;
pub use process::{NixProcessProbe, NullProcessManager, Pm2Client, ProcessManager, ProcessProbe};
