//! `/api/v1` handlers.

mod stream;
mod ws;

pub use stream::stream_exchange;
pub use ws::connect;
