//! Duplex client connections.

mod actor;
mod handle;
mod outbound;
mod registry;

pub use actor::{ConnectionContext, WireMessage, serve_connection};
pub use handle::Connection;
pub use outbound::{Delivery, Outbound};
pub use registry::ConnectionRegistry;
