//! Image normalization, submission negotiation and task polling against a
//! remote generation service.

pub mod api;
pub mod cache;
pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod poll;
pub mod submit;
pub mod telemetry;
pub mod variants;

#[cfg(test)]
mod testing;

pub use api::{GenerationApi, HttpGenerationApi, HttpReply};
pub use cache::NormalizationCache;
pub use extract::extract;
pub use normalize::{dedupe, sniff, ImageNormalizer, OUTPUT_MIME};
pub use pipeline::{Pipeline, PipelinePhase, PipelineState, StageOutcome};
pub use poll::TaskPoller;
pub use submit::SubmissionNegotiator;
pub use telemetry::EventSink;
pub use variants::{default_variants, SubmissionVariant};
