//! In-process doubles for running scenarios without infrastructure.
//!
//! [`pipeline::MemoryPipeline`] plays source, connector, broker and sink at once and
//! implements every collaborator trait the harness needs. [`compaction::CompactingTopic`]
//! models segment rolling and compaction of a keyed topic.

pub mod compaction;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod pipeline;
