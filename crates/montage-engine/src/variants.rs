use montage_contracts::GenerationRequest;
use serde_json::{json, Map, Value};

/// One candidate wire shape for the generation request body.
pub trait SubmissionVariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, image_count: usize) -> bool {
        image_count > 0
    }

    fn images_value(&self, request: &GenerationRequest) -> (String, Value);

    fn build(&self, request: &GenerationRequest, model: &str) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert("prompt".to_string(), Value::String(request.prompt.trim().to_string()));
        let (key, images) = self.images_value(request);
        body.insert(key, images);
        if let Some(parameters) = request.parameters.as_ref() {
            if let Ok(value) = serde_json::to_value(parameters) {
                body.insert("parameters".to_string(), value);
            }
        }
        Value::Object(body)
    }
}

/// `images: ["data:<mime>;base64,<data>", ...]`
pub struct DataUrlArray;

impl SubmissionVariant for DataUrlArray {
    fn name(&self) -> &'static str {
        "data_url_array"
    }

    fn images_value(&self, request: &GenerationRequest) -> (String, Value) {
        let urls = request
            .images
            .iter()
            .map(|image| Value::String(image.data_url()))
            .collect();
        ("images".to_string(), Value::Array(urls))
    }
}

/// `images: ["<base64>", ...]`
pub struct Base64Array;

impl SubmissionVariant for Base64Array {
    fn name(&self) -> &'static str {
        "base64_array"
    }

    fn images_value(&self, request: &GenerationRequest) -> (String, Value) {
        let encoded = request
            .images
            .iter()
            .map(|image| Value::String(image.data.clone()))
            .collect();
        ("images".to_string(), Value::Array(encoded))
    }
}

/// `image_url: "data:..."`, only for single-image requests.
pub struct SingleImageUrl;

impl SubmissionVariant for SingleImageUrl {
    fn name(&self) -> &'static str {
        "single_image_url"
    }

    fn applies_to(&self, image_count: usize) -> bool {
        image_count == 1
    }

    fn images_value(&self, request: &GenerationRequest) -> (String, Value) {
        let url = request
            .images
            .first()
            .map(|image| Value::String(image.data_url()))
            .unwrap_or(Value::Null);
        ("image_url".to_string(), url)
    }
}

/// Declared priority order. The first accepted variant wins.
pub fn default_variants() -> Vec<Box<dyn SubmissionVariant>> {
    vec![
        Box::new(DataUrlArray),
        Box::new(Base64Array),
        Box::new(SingleImageUrl),
    ]
}

/// Names of the top-level keys, for logging a body without its payload.
pub fn payload_fields(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

pub(crate) fn describe(variants: &[Box<dyn SubmissionVariant>]) -> Value {
    json!(variants.iter().map(|variant| variant.name()).collect::<Vec<_>>())
}
