//! Reasoning events: ordered per-conversation log plus live feed.
//!
//! | Item | Role |
//! |------|------|
//! | [`ReasoningEmitter`] | Owns the counter, appends to the durable log, then publishes. |
//! | [`EventRecorder`] | Conversation-scoped handle passed through the call chain; carries lineage. |
//! | [`FeedItem`] | What a live subscriber sees: events, or a missed-delivery signal. |
//!
//! Wire types and SSE framing live in the `reasoning-event` crate.

mod emitter;
mod recorder;

pub use emitter::{FeedItem, ReasoningEmitter};
pub use recorder::EventRecorder;
