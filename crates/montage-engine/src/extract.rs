use montage_contracts::{ExtractionError, ImageReference};
use serde_json::Value;

/// Keys that may carry the image locator, checked in this order.
pub const LOCATOR_FIELDS: [&str; 3] = ["image", "image_url", "url"];

/// Picks the image locator out of a task result.
///
/// A list uses its first element only; a bare object is used as is. The
/// locator is returned unmodified and never dereferenced.
pub fn extract(result: &Value) -> Result<ImageReference, ExtractionError> {
    let chosen = match result {
        Value::Array(rows) => rows.first().ok_or(ExtractionError::EmptyResult)?,
        other => other,
    };
    let fields = chosen
        .as_object()
        .ok_or(ExtractionError::MissingImageField)?;
    LOCATOR_FIELDS
        .iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .find(|locator| !locator.trim().is_empty())
        .map(ImageReference::new)
        .ok_or(ExtractionError::MissingImageField)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn list_and_bare_object_extract_identically() -> anyhow::Result<()> {
        let from_list = extract(&json!([{"image": "https://x/1.jpg"}]))?;
        let from_object = extract(&json!({"image": "https://x/1.jpg"}))?;
        assert_eq!(from_list, from_object);
        assert_eq!(from_list.as_str(), "https://x/1.jpg");
        Ok(())
    }

    #[test]
    fn only_the_first_list_element_is_consulted() {
        let result = json!([{"caption": "no image"}, {"image": "https://x/2.jpg"}]);
        assert_eq!(extract(&result), Err(ExtractionError::MissingImageField));
    }

    #[test]
    fn empty_list_is_reported_distinctly() {
        assert_eq!(extract(&json!([])), Err(ExtractionError::EmptyResult));
    }

    #[test]
    fn non_object_results_have_no_image_field() {
        assert_eq!(
            extract(&json!("https://x/3.jpg")),
            Err(ExtractionError::MissingImageField)
        );
        assert_eq!(
            extract(&json!([null])),
            Err(ExtractionError::MissingImageField)
        );
        assert_eq!(
            extract(&json!({"image": "   "})),
            Err(ExtractionError::MissingImageField)
        );
    }

    #[test]
    fn alternate_locator_keys_are_accepted() -> anyhow::Result<()> {
        assert_eq!(
            extract(&json!({"url": "https://x/4.png"}))?.as_str(),
            "https://x/4.png"
        );
        assert_eq!(
            extract(&json!([{"image_url": "https://x/5.png", "url": "https://x/ignored"}]))?
                .as_str(),
            "https://x/5.png"
        );
        Ok(())
    }

    #[test]
    fn locator_is_returned_unmodified() -> anyhow::Result<()> {
        let reference = extract(&json!({"image": " https://x/6.jpg?sig=a%20b "}))?;
        assert_eq!(reference.as_str(), " https://x/6.jpg?sig=a%20b ");
        Ok(())
    }
}
