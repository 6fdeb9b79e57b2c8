//! Reasoning event protocol: phase + status + actor, lineage, and SSE framing.
//!
//! This crate defines the wire shape of one reasoning event and how it is framed for
//! live delivery. It does not depend on hitl. The hitl emitter assigns sequence indices,
//! persists events, and fans them out; this crate only describes what goes on the wire.

pub mod event;
pub mod frame;
pub mod lineage;

pub use event::{Actor, EventDraft, Phase, ReasoningEvent, Status};
pub use frame::{missed_frame, to_sse_frame, SseFrame, MISSED_EVENT_NAME};
pub use lineage::Lineage;
