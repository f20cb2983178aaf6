use std::sync::Arc;

use montage_contracts::events::EventWriter;
use montage_contracts::{
    GenerateError, GenerationParameters, GenerationRequest, ImageReference, NormalizedImage,
    Settings, SubmissionError, Task,
};
use serde_json::json;

use crate::api::{GenerationApi, HttpGenerationApi};
use crate::extract::extract;
use crate::normalize::{dedupe, ImageNormalizer};
use crate::poll::TaskPoller;
use crate::submit::SubmissionNegotiator;
use crate::telemetry::EventSink;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelinePhase {
    #[default]
    Idle,
    Normalizing,
    Submitting,
    Polling {
        task_id: String,
    },
}

/// Per-caller session: staged uploads, what is in flight, and the last outcome.
///
/// `generate` takes it by `&mut`, so one session can drive at most one
/// pipeline at a time. A phase other than `Idle` on entry means an earlier
/// run never finished; `reset` clears it.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    phase: PipelinePhase,
    staged: Vec<NormalizedImage>,
    last_task: Option<Task>,
    last_result: Option<ImageReference>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &PipelinePhase {
        &self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != PipelinePhase::Idle
    }

    pub fn staged(&self) -> &[NormalizedImage] {
        &self.staged
    }

    pub fn last_task(&self) -> Option<&Task> {
        self.last_task.as_ref()
    }

    pub fn last_result(&self) -> Option<&ImageReference> {
        self.last_result.as_ref()
    }

    /// Drops staged uploads and the last outcome.
    pub fn clear(&mut self) {
        self.staged.clear();
        self.last_task = None;
        self.last_result = None;
    }

    pub fn reset(&mut self) {
        self.clear();
        self.phase = PipelinePhase::Idle;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Added { content_hash: String, staged: usize },
    Duplicate { content_hash: String },
}

/// Normalize → submit → poll → extract, run synchronously for one request.
///
/// The pipeline itself holds no per-request state and can be shared between
/// callers; only the normalization cache is shared across runs.
pub struct Pipeline {
    settings: Settings,
    api: Arc<dyn GenerationApi>,
    normalizer: ImageNormalizer,
    negotiator: SubmissionNegotiator,
    poller: TaskPoller,
    events: EventSink,
}

impl Pipeline {
    pub fn new(settings: Settings, api: Arc<dyn GenerationApi>) -> Self {
        let settings = settings.sanitized();
        Self {
            normalizer: ImageNormalizer::new(&settings),
            negotiator: SubmissionNegotiator::new(&settings),
            poller: TaskPoller::new(&settings),
            events: EventSink::default(),
            api,
            settings,
        }
    }

    /// Pipeline talking to the configured HTTP endpoints.
    pub fn over_http(settings: Settings) -> anyhow::Result<Self> {
        let settings = settings.sanitized();
        let api = HttpGenerationApi::new(&settings)?;
        Ok(Self::new(settings, Arc::new(api)))
    }

    pub fn with_events(mut self, writer: EventWriter) -> Self {
        self.events = EventSink::new(Some(writer));
        self
    }

    pub fn normalizer(&self) -> &ImageNormalizer {
        &self.normalizer
    }

    pub fn generate(
        &self,
        state: &mut PipelineState,
        prompt: &str,
        images: &[Vec<u8>],
    ) -> Result<ImageReference, GenerateError> {
        self.generate_with(state, prompt, images, None)
    }

    pub fn generate_with(
        &self,
        state: &mut PipelineState,
        prompt: &str,
        images: &[Vec<u8>],
        parameters: Option<GenerationParameters>,
    ) -> Result<ImageReference, GenerateError> {
        self.ensure_idle(state)?;
        if images.is_empty() {
            return Err(SubmissionError::EmptyImageSet.into());
        }
        if images.len() > self.settings.max_images {
            return Err(SubmissionError::TooManyImages {
                count: images.len(),
                max: self.settings.max_images,
            }
            .into());
        }

        state.last_task = None;
        self.events.emit(
            "pipeline_started",
            json!({"source": "uploads", "image_count": images.len(), "prompt_chars": prompt.chars().count()}),
        );
        state.phase = PipelinePhase::Normalizing;
        let outcome = self
            .prepare_images(images)
            .and_then(|prepared| self.submit_and_wait(state, prompt, prepared, parameters));
        self.finish(state, outcome)
    }

    /// Generates from the images staged in `state` with [`stage_upload`](Self::stage_upload).
    pub fn generate_staged(
        &self,
        state: &mut PipelineState,
        prompt: &str,
        parameters: Option<GenerationParameters>,
    ) -> Result<ImageReference, GenerateError> {
        self.ensure_idle(state)?;
        state.last_task = None;
        self.events.emit(
            "pipeline_started",
            json!({"source": "staged", "image_count": state.staged.len(), "prompt_chars": prompt.chars().count()}),
        );
        let staged = state.staged.clone();
        let outcome = self.submit_and_wait(state, prompt, staged, parameters);
        self.finish(state, outcome)
    }

    /// Normalizes one upload into the session, skipping content already staged.
    pub fn stage_upload(
        &self,
        state: &mut PipelineState,
        raw: &[u8],
    ) -> Result<StageOutcome, GenerateError> {
        self.ensure_idle(state)?;
        let (image, cache_hit) = self
            .normalizer
            .normalize_cached(raw)
            .map_err(|source| GenerateError::Normalization {
                index: state.staged.len(),
                source,
            })?;
        self.emit_normalized(state.staged.len(), &image, cache_hit);

        let content_hash = image.content_hash.clone();
        if state
            .staged
            .iter()
            .any(|existing| existing.content_hash == content_hash)
        {
            return Ok(StageOutcome::Duplicate { content_hash });
        }
        if state.staged.len() >= self.settings.max_images {
            return Err(SubmissionError::TooManyImages {
                count: state.staged.len() + 1,
                max: self.settings.max_images,
            }
            .into());
        }
        state.staged.push(image);
        Ok(StageOutcome::Added {
            content_hash,
            staged: state.staged.len(),
        })
    }

    /// Normalizes every upload in order and drops content duplicates.
    pub fn prepare_images(&self, images: &[Vec<u8>]) -> Result<Vec<NormalizedImage>, GenerateError> {
        let mut normalized = Vec::with_capacity(images.len());
        for (index, raw) in images.iter().enumerate() {
            let (image, cache_hit) = self
                .normalizer
                .normalize_cached(raw)
                .map_err(|source| GenerateError::Normalization { index, source })?;
            self.emit_normalized(index, &image, cache_hit);
            normalized.push(image);
        }
        let before = normalized.len();
        let kept = dedupe(normalized);
        if kept.len() < before {
            log::info!("dropped {} duplicate upload(s)", before - kept.len());
            self.events.emit(
                "image_deduplicated",
                json!({"uploaded": before, "kept": kept.len()}),
            );
        }
        Ok(kept)
    }

    fn submit_and_wait(
        &self,
        state: &mut PipelineState,
        prompt: &str,
        images: Vec<NormalizedImage>,
        parameters: Option<GenerationParameters>,
    ) -> Result<ImageReference, GenerateError> {
        let mut request = GenerationRequest::new(prompt, images);
        if let Some(parameters) = parameters {
            let mut warnings = Vec::new();
            let sanitized = parameters.sanitized(&mut warnings);
            if !warnings.is_empty() {
                log::warn!("generation parameters adjusted: {}", warnings.join(" "));
                self.events
                    .emit("parameters_adjusted", json!({"warnings": warnings}));
            }
            request = request.with_parameters(sanitized);
        }

        state.phase = PipelinePhase::Submitting;
        let mut task = self
            .negotiator
            .submit(self.api.as_ref(), &request, &self.events)?;

        state.phase = PipelinePhase::Polling {
            task_id: task.task_id.clone(),
        };
        log::info!("polling task {} (up to {} attempts)", task.task_id, self.poller.max_attempts());
        let polled = self.poller.poll(self.api.as_ref(), &mut task, &self.events);
        let extracted = polled
            .map_err(GenerateError::from)
            .and_then(|result| extract(&result).map_err(GenerateError::from));
        if let Ok(reference) = &extracted {
            task.result = Some(reference.clone());
        }
        state.last_task = Some(task);
        extracted
    }

    fn ensure_idle(&self, state: &PipelineState) -> Result<(), GenerateError> {
        if state.is_busy() {
            return Err(GenerateError::PipelineBusy);
        }
        Ok(())
    }

    fn finish(
        &self,
        state: &mut PipelineState,
        outcome: Result<ImageReference, GenerateError>,
    ) -> Result<ImageReference, GenerateError> {
        state.phase = PipelinePhase::Idle;
        let attempts = state.last_task.as_ref().map(|task| task.attempts);
        match &outcome {
            Ok(reference) => {
                log::info!("generation finished: {reference}");
                state.last_result = Some(reference.clone());
                self.events.emit(
                    "pipeline_finished",
                    json!({"image": reference.as_str(), "poll_attempts": attempts}),
                );
            }
            Err(err) => {
                log::warn!("generation failed at {}: {err}", err.stage());
                self.events.emit(
                    "pipeline_failed",
                    json!({
                        "stage": err.stage(),
                        "message": err.to_string(),
                        "retryable": err.is_retryable(),
                        "poll_attempts": attempts,
                    }),
                );
            }
        }
        outcome
    }

    fn emit_normalized(&self, index: usize, image: &NormalizedImage, cache_hit: bool) {
        if cache_hit {
            log::debug!("normalization cache hit for upload {index} ({})", image.short_hash());
        }
        let mut payload = image.summary();
        payload.insert("index".to_string(), json!(index));
        payload.insert("cache_hit".to_string(), json!(cache_hit));
        self.events
            .emit("image_normalized", serde_json::Value::Object(payload));
    }
}
