//! Data contracts shared by the montage engine and CLI.

pub mod errors;
pub mod events;
pub mod images;
pub mod settings;
pub mod tasks;

pub use errors::{
    ExtractionError, GenerateError, NormalizationError, PollError, SubmissionError, VariantFailure,
};
pub use images::{ImageReference, NormalizedImage, SourceFormat, SourceImage};
pub use settings::{QualityTier, Settings};
pub use tasks::{GenerationParameters, GenerationRequest, Task, TaskStatus};
