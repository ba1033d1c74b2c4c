//! Conversation exchanges: the request model, the event envelope and the
//! orchestrator that turns one into a stream of the other.

mod error;
pub mod events;
mod history;
mod ingest;
mod orchestrator;
mod request;
mod synthesis;
mod thinking;
mod title;

pub use error::ExchangeError;
pub use events::{Event, EventSink};
pub use history::{AssembledHistory, assemble, render_transcript};
pub use ingest::{Ingested, blob_key, ingest_files};
pub use orchestrator::{ExchangeSummary, Orchestrator};
pub use request::{ConversationRequest, FilePayload};
pub use synthesis::{SynthesisOutcome, synthesize};
pub use thinking::{
    HistoryEntry, MAX_THOUGHT_ITERATIONS, ThinkingInput, ThinkingLoop, ThinkingOutcome,
    serialize_history,
};
pub use title::{FALLBACK_TITLE, derive_title};
