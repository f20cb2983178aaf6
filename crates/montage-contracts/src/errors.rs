use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("upload is {size} bytes; the limit is {limit} bytes")]
    UploadTooLarge { size: usize, limit: usize },
    #[error("unreadable image: {0}")]
    UnreadableImage(String),
    #[error("encoded image is {smallest} bytes at the smallest tier; the ceiling is {limit} bytes")]
    PayloadTooLarge { smallest: usize, limit: usize },
}

/// One rejected submission candidate, in the order it was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFailure {
    pub variant: String,
    pub reason: String,
}

impl fmt::Display for VariantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variant, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("request carries no images")]
    EmptyImageSet,
    #[error("request carries {count} images; at most {max} are accepted")]
    TooManyImages { count: usize, max: usize },
    #[error("prompt needs at least {min} meaningful characters")]
    PromptTooShort { min: usize },
    #[error("every submission variant was rejected: {}", join_failures(.failures))]
    AllVariantsExhausted { failures: Vec<VariantFailure> },
}

fn join_failures(failures: &[VariantFailure]) -> String {
    if failures.is_empty() {
        return "no applicable variants".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("task {task_id} failed remotely: {}", message_or_default(.message))]
    RemoteFailure {
        task_id: String,
        message: Option<String>,
    },
    #[error("task {task_id} not finished after {attempts} status checks")]
    Timeout { task_id: String, attempts: u32 },
    #[error("task {task_id} status response malformed: {detail}")]
    Malformed { task_id: String, detail: String },
}

fn message_or_default(message: &Option<String>) -> &str {
    message.as_deref().unwrap_or("no message")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("result list is empty")]
    EmptyResult,
    #[error("result has no image locator field")]
    MissingImageField,
}

/// Terminal failure of one `generate` call, tagged by the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("a generation is already in flight for this session")]
    PipelineBusy,
    #[error("image {index}: {source}")]
    Normalization {
        index: usize,
        #[source]
        source: NormalizationError,
    },
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl GenerateError {
    pub fn stage(&self) -> &'static str {
        match self {
            GenerateError::PipelineBusy => "session",
            GenerateError::Normalization { .. } => "normalize",
            GenerateError::Submission(_) => "submit",
            GenerateError::Poll(_) => "poll",
            GenerateError::Extraction(_) => "extract",
        }
    }

    /// Whether re-running the whole pipeline with the same inputs could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::PipelineBusy => true,
            GenerateError::Normalization { .. } => false,
            GenerateError::Submission(SubmissionError::AllVariantsExhausted { .. }) => true,
            GenerateError::Submission(_) => false,
            GenerateError::Poll(PollError::Malformed { .. }) => false,
            GenerateError::Poll(_) => true,
            GenerateError::Extraction(_) => false,
        }
    }
}
