use montage_contracts::events::{EventPayload, EventWriter};
use serde_json::Value;

/// Optional run event log. Write failures are logged, never propagated.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    writer: Option<EventWriter>,
}

impl EventSink {
    pub fn new(writer: Option<EventWriter>) -> Self {
        Self { writer }
    }

    pub fn emit(&self, event_type: &str, payload: Value) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            Value::Null => EventPayload::new(),
            other => {
                let mut map = EventPayload::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        if let Err(err) = writer.emit(event_type, payload) {
            log::warn!("failed to record {event_type} event: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detached_sink_is_silent() {
        EventSink::default().emit("pipeline_started", json!({"image_count": 1}));
    }

    #[test]
    fn attached_sink_writes_object_payloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let sink = EventSink::new(Some(EventWriter::new(&path, "run-7")));
        sink.emit("poll_attempt", json!({"attempt": 2}));
        sink.emit("note", json!("plain"));

        let raw = std::fs::read_to_string(&path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["attempt"], json!(2));
        assert_eq!(rows[1]["value"], json!("plain"));
        Ok(())
    }
}
