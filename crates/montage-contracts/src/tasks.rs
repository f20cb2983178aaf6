use serde::{Deserialize, Serialize};

use crate::errors::SubmissionError;
use crate::images::{ImageReference, NormalizedImage};

/// Optional knobs forwarded to the service under `parameters`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<String>,
}

impl GenerationParameters {
    pub fn is_empty(&self) -> bool {
        self == &GenerationParameters::default()
    }

    /// Returns a copy clamped to the ranges the service accepts, pushing one
    /// warning per adjusted field.
    pub fn sanitized(&self, warnings: &mut Vec<String>) -> GenerationParameters {
        let mut out = GenerationParameters {
            negative_prompt: non_blank(self.negative_prompt.as_deref()),
            sampler: non_blank(self.sampler.as_deref()),
            ..GenerationParameters::default()
        };
        if let Some(steps) = self.steps {
            let clamped = steps.clamp(1, 150);
            if clamped != steps {
                push_unique_warning(warnings, format!("steps clamped to {clamped}."));
            }
            out.steps = Some(clamped);
        }
        if let Some(cfg_scale) = self.cfg_scale {
            if cfg_scale.is_finite() {
                let clamped = cfg_scale.clamp(1.0, 30.0);
                if (clamped - cfg_scale).abs() > f64::EPSILON {
                    push_unique_warning(warnings, format!("cfg_scale clamped to {clamped}."));
                }
                out.cfg_scale = Some(clamped);
            } else {
                push_unique_warning(warnings, "cfg_scale is not finite; ignoring.".to_string());
            }
        }
        out.width = self.width.map(|value| snap_dimension("width", value, warnings));
        out.height = self.height.map(|value| snap_dimension("height", value, warnings));
        out
    }
}

fn snap_dimension(label: &str, value: u32, warnings: &mut Vec<String>) -> u32 {
    let clamped = value.clamp(64, 2048);
    let snapped = clamped - clamped % 8;
    if snapped != value {
        push_unique_warning(warnings, format!("{label} adjusted to {snapped}."));
    }
    snapped
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if !warnings.iter().any(|existing| existing == &message) {
        warnings.push(message);
    }
}

/// Prompt plus ordered reference images. Image order is preserved on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<NormalizedImage>,
    pub parameters: Option<GenerationParameters>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, images: Vec<NormalizedImage>) -> Self {
        Self {
            prompt: prompt.into(),
            images,
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = if parameters.is_empty() {
            None
        } else {
            Some(parameters)
        };
        self
    }

    pub fn validate(&self, max_images: usize, min_prompt_chars: usize) -> Result<(), SubmissionError> {
        if self.images.is_empty() {
            return Err(SubmissionError::EmptyImageSet);
        }
        if self.images.len() > max_images {
            return Err(SubmissionError::TooManyImages {
                count: self.images.len(),
                max: max_images,
            });
        }
        let meaningful = self
            .prompt
            .trim()
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .count();
        if meaningful < min_prompt_chars {
            return Err(SubmissionError::PromptTooShort {
                min: min_prompt_chars,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Accepted,
    Running,
    Success,
    Failed,
    Error,
    Timeout,
    Malformed,
}

impl TaskStatus {
    /// Maps a remote `data.status` string. Anything unrecognized is in progress.
    pub fn from_remote(raw: &str) -> TaskStatus {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" => TaskStatus::Success,
            "failed" => TaskStatus::Failed,
            "error" => TaskStatus::Error,
            _ => TaskStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Accepted | TaskStatus::Running)
    }
}

/// Remote job handle created when a submission variant is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: String,
    pub variant: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub result: Option<ImageReference>,
}

impl Task {
    pub fn accepted(task_id: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            variant: variant.into(),
            status: TaskStatus::Accepted,
            attempts: 0,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::images::SourceFormat;

    use super::*;

    fn image(hash: &str) -> NormalizedImage {
        NormalizedImage {
            data: "AA==".to_string(),
            mime_type: "image/jpeg".to_string(),
            content_hash: hash.to_string(),
            size_bytes: 4,
            width: 1,
            height: 1,
            source_format: SourceFormat::Jpeg,
        }
    }

    #[test]
    fn validate_rejects_empty_and_oversized_image_sets() {
        let empty = GenerationRequest::new("make a collage", Vec::new());
        assert_eq!(empty.validate(4, 3), Err(SubmissionError::EmptyImageSet));

        let images = (0..5).map(|idx| image(&format!("h{idx}"))).collect();
        let crowded = GenerationRequest::new("make a collage", images);
        assert_eq!(
            crowded.validate(4, 3),
            Err(SubmissionError::TooManyImages { count: 5, max: 4 })
        );
    }

    #[test]
    fn validate_counts_only_meaningful_prompt_characters() {
        let request = GenerationRequest::new("  a b  ", vec![image("h")]);
        assert_eq!(
            request.validate(4, 3),
            Err(SubmissionError::PromptTooShort { min: 3 })
        );
        let request = GenerationRequest::new(" a b c ", vec![image("h")]);
        assert_eq!(request.validate(4, 3), Ok(()));
    }

    #[test]
    fn empty_parameters_are_dropped() {
        let request = GenerationRequest::new("abc", vec![image("h")])
            .with_parameters(GenerationParameters::default());
        assert!(request.parameters.is_none());
    }

    #[test]
    fn sanitized_parameters_clamp_and_warn() {
        let mut warnings = Vec::new();
        let raw = GenerationParameters {
            negative_prompt: Some("   ".to_string()),
            cfg_scale: Some(45.0),
            steps: Some(0),
            width: Some(1001),
            height: Some(512),
            sampler: Some(" euler ".to_string()),
        };
        let clean = raw.sanitized(&mut warnings);
        assert_eq!(clean.negative_prompt, None);
        assert_eq!(clean.cfg_scale, Some(30.0));
        assert_eq!(clean.steps, Some(1));
        assert_eq!(clean.width, Some(1000));
        assert_eq!(clean.height, Some(512));
        assert_eq!(clean.sampler.as_deref(), Some("euler"));
        assert_eq!(
            warnings,
            vec![
                "steps clamped to 1.".to_string(),
                "cfg_scale clamped to 30.".to_string(),
                "width adjusted to 1000.".to_string(),
            ]
        );
    }

    #[test]
    fn remote_status_mapping() {
        assert_eq!(TaskStatus::from_remote("SUCCESS"), TaskStatus::Success);
        assert_eq!(TaskStatus::from_remote("failed"), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_remote("error"), TaskStatus::Error);
        assert_eq!(TaskStatus::from_remote("queued"), TaskStatus::Running);
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
    }
}
