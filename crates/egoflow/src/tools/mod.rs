//! Concurrent tool execution.

mod dispatcher;

pub use dispatcher::{ToolDispatcher, ToolOutcome};
