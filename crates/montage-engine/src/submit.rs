use std::time::Duration;

use anyhow::{anyhow, Result};
use montage_contracts::{GenerationRequest, Settings, SubmissionError, Task, VariantFailure};
use serde_json::{json, Value};

use crate::api::{error_chain_text, reply_json, GenerationApi};
use crate::telemetry::EventSink;
use crate::variants::{default_variants, describe, payload_fields, SubmissionVariant};

/// Tries each applicable variant once, in declared order, until one is accepted.
pub struct SubmissionNegotiator {
    variants: Vec<Box<dyn SubmissionVariant>>,
    model: String,
    timeout: Duration,
    max_images: usize,
    min_prompt_chars: usize,
    max_request_bytes: usize,
}

impl SubmissionNegotiator {
    pub fn new(settings: &Settings) -> Self {
        Self::with_variants(settings, default_variants())
    }

    pub fn with_variants(settings: &Settings, variants: Vec<Box<dyn SubmissionVariant>>) -> Self {
        Self {
            variants,
            model: settings.model.clone(),
            timeout: settings.submit_timeout(),
            max_images: settings.max_images,
            min_prompt_chars: settings.min_prompt_chars,
            max_request_bytes: settings.max_request_bytes,
        }
    }

    pub fn variant_names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|variant| variant.name()).collect()
    }

    pub fn submit(
        &self,
        api: &dyn GenerationApi,
        request: &GenerationRequest,
        events: &EventSink,
    ) -> Result<Task, SubmissionError> {
        request.validate(self.max_images, self.min_prompt_chars)?;

        let image_count = request.images.len();
        let mut failures = Vec::new();
        for variant in self
            .variants
            .iter()
            .filter(|variant| variant.applies_to(image_count))
        {
            let name = variant.name();
            let payload = variant.build(request, &self.model);
            events.emit(
                "submission_attempt",
                json!({
                    "variant": name,
                    "fields": payload_fields(&payload),
                    "image_count": image_count,
                }),
            );

            match self.try_variant(api, &payload) {
                Ok(task_id) => {
                    log::info!("generation accepted via {name}: task {task_id}");
                    events.emit(
                        "submission_accepted",
                        json!({"variant": name, "task_id": task_id}),
                    );
                    return Ok(Task::accepted(task_id, name));
                }
                Err(err) => {
                    let reason = error_chain_text(&err, 320);
                    log::warn!("submission variant {name} rejected: {reason}");
                    events.emit(
                        "submission_rejected",
                        json!({"variant": name, "reason": reason}),
                    );
                    failures.push(VariantFailure {
                        variant: name.to_string(),
                        reason,
                    });
                }
            }
        }

        events.emit(
            "submission_exhausted",
            json!({"variants": describe(&self.variants), "failures": failures.len()}),
        );
        Err(SubmissionError::AllVariantsExhausted { failures })
    }

    fn try_variant(&self, api: &dyn GenerationApi, payload: &Value) -> Result<String> {
        let size = serde_json::to_vec(payload)?.len();
        if size > self.max_request_bytes {
            return Err(anyhow!(
                "request body is {size} bytes; the limit is {} bytes",
                self.max_request_bytes
            ));
        }
        let reply = api.submit(payload, self.timeout)?;
        let body = reply_json("generation", &reply)?;
        task_id_from(&body).ok_or_else(|| {
            let detail = body
                .get("error")
                .or_else(|| body.get("message"))
                .map(value_text)
                .unwrap_or_else(|| "response missing data.task_id".to_string());
            anyhow!("{detail}")
        })
    }
}

fn task_id_from(body: &Value) -> Option<String> {
    let raw = body.pointer("/data/task_id")?;
    let text = match raw {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
