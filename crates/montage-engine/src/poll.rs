use std::thread;
use std::time::Duration;

use anyhow::Result;
use montage_contracts::{PollError, Settings, Task, TaskStatus};
use serde_json::{json, Value};

use crate::api::{error_chain_text, reply_json, GenerationApi, HttpReply};
use crate::telemetry::EventSink;

/// What one status query told us.
#[derive(Debug, Clone, PartialEq)]
enum Observation {
    /// Transport or HTTP failure; counts toward the budget only.
    Transient(String),
    /// Body was not the expected `{data: {status}}` shape.
    Malformed(String),
    Running(String),
    /// Reported success before the result was attached.
    SuccessWithoutResult,
    Finished(Value),
    RemoteFailure {
        status: TaskStatus,
        message: Option<String>,
    },
}

impl Observation {
    fn label(&self) -> &'static str {
        match self {
            Observation::Transient(_) => "transient",
            Observation::Malformed(_) => "malformed",
            Observation::Running(_) => "running",
            Observation::SuccessWithoutResult => "success_pending",
            Observation::Finished(_) => "success",
            Observation::RemoteFailure { .. } => "failed",
        }
    }
}

/// Fixed-interval, bounded status polling for one task.
#[derive(Debug, Clone)]
pub struct TaskPoller {
    max_attempts: u32,
    interval: Duration,
    timeout: Duration,
}

impl TaskPoller {
    pub fn new(settings: &Settings) -> Self {
        Self::with_budget(
            settings.max_poll_attempts,
            settings.poll_interval(),
            settings.poll_timeout(),
        )
    }

    pub fn with_budget(max_attempts: u32, interval: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Polls until the task reaches a terminal state and returns the raw
    /// `data.result` payload. `task` tracks status and attempt count.
    pub fn poll(
        &self,
        api: &dyn GenerationApi,
        task: &mut Task,
        events: &EventSink,
    ) -> Result<Value, PollError> {
        let mut last_malformed: Option<String> = None;
        for attempt in 1..=self.max_attempts {
            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
            task.attempts = attempt;
            let observation = classify(api.query(&task.task_id, self.timeout));
            events.emit(
                "poll_attempt",
                json!({
                    "task_id": task.task_id,
                    "attempt": attempt,
                    "max_attempts": self.max_attempts,
                    "observed": observation.label(),
                }),
            );

            match observation {
                Observation::Finished(result) => {
                    task.status = TaskStatus::Success;
                    return Ok(result);
                }
                Observation::RemoteFailure { status, message } => {
                    task.status = status;
                    return Err(PollError::RemoteFailure {
                        task_id: task.task_id.clone(),
                        message,
                    });
                }
                Observation::Malformed(detail) => {
                    log::warn!(
                        "task {} attempt {attempt}: malformed status response: {detail}",
                        task.task_id
                    );
                    task.status = TaskStatus::Running;
                    last_malformed = Some(detail);
                }
                Observation::Transient(reason) => {
                    log::warn!("task {} attempt {attempt}: {reason}", task.task_id);
                    task.status = TaskStatus::Running;
                    last_malformed = None;
                }
                Observation::Running(remote) => {
                    log::debug!("task {} attempt {attempt}: {remote}", task.task_id);
                    task.status = TaskStatus::Running;
                    last_malformed = None;
                }
                Observation::SuccessWithoutResult => {
                    log::debug!(
                        "task {} attempt {attempt}: success without result yet",
                        task.task_id
                    );
                    task.status = TaskStatus::Running;
                    last_malformed = None;
                }
            }
        }

        match last_malformed {
            Some(detail) => {
                task.status = TaskStatus::Malformed;
                Err(PollError::Malformed {
                    task_id: task.task_id.clone(),
                    detail,
                })
            }
            None => {
                task.status = TaskStatus::Timeout;
                Err(PollError::Timeout {
                    task_id: task.task_id.clone(),
                    attempts: task.attempts,
                })
            }
        }
    }
}

fn classify(reply: Result<HttpReply>) -> Observation {
    let reply = match reply {
        Ok(reply) => reply,
        Err(err) => return Observation::Transient(error_chain_text(&err, 240)),
    };
    if !reply.is_success() {
        return Observation::Transient(format!("task query returned HTTP {}", reply.status));
    }
    let body = match reply_json("task query", &reply) {
        Ok(body) => body,
        Err(err) => return Observation::Malformed(error_chain_text(&err, 240)),
    };
    let Some(data) = body.get("data").filter(|data| data.is_object()) else {
        return Observation::Malformed("response has no data object".to_string());
    };
    let Some(raw_status) = data.get("status").and_then(Value::as_str) else {
        return Observation::Malformed("response has no data.status".to_string());
    };

    match TaskStatus::from_remote(raw_status) {
        TaskStatus::Success => match data.get("result") {
            Some(result) if !is_empty_result(result) => Observation::Finished(result.clone()),
            _ => Observation::SuccessWithoutResult,
        },
        status @ (TaskStatus::Failed | TaskStatus::Error) => Observation::RemoteFailure {
            status,
            message: failure_message(&body, data),
        },
        _ => Observation::Running(raw_status.to_string()),
    }
}

fn is_empty_result(result: &Value) -> bool {
    match result {
        Value::Null => true,
        Value::Array(rows) => rows.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn failure_message(body: &Value, data: &Value) -> Option<String> {
    ["message", "error", "fail_reason", "reason"]
        .iter()
        .find_map(|key| data.get(*key).or_else(|| body.get(*key)))
        .and_then(|value| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|text| !text.is_empty())
}
