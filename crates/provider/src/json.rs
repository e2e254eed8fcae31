use crate::ProviderError;

/// Extract a JSON object or array from raw LLM output. Handles fenced code
/// blocks and surrounding prose by narrowing to the outermost brace region.
pub fn extract_json(content: &str) -> Result<serde_json::Value, ProviderError> {
    if content.trim().is_empty() {
        return Err(ProviderError::Parse("empty response".into()));
    }

    let mut text = content;
    if let Some(fenced) = fenced_block(text) {
        text = fenced;
    }

    let narrowed = narrow_to_region(text, '{', '}')
        .or_else(|| narrow_to_region(text, '[', ']'))
        .ok_or_else(|| ProviderError::Parse("no JSON object or array found".into()))?;

    serde_json::from_str(narrowed).map_err(|e| ProviderError::Parse(e.to_string()))
}

fn fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```")?;
    let after = &content[start + 3..];
    // Skip a language tag like "json" up to the first newline.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn narrow_to_region(content: &str, open: char, close: char) -> Option<&str> {
    let start = content.find(open)?;
    let end = content.rfind(close)?;
    (end > start).then(|| &content[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        let v = extract_json(r#"{"steps": []}"#).unwrap();
        assert!(v["steps"].is_array());
    }

    #[test]
    fn fenced_with_language_tag() {
        let content = "Here is the plan:\n```json\n{\"steps\": [{\"action\": \"navigate\"}]}\n```\nDone.";
        let v = extract_json(content).unwrap();
        assert_eq!(v["steps"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn fenced_without_language_tag() {
        let content = "```\n{\"steps\": []}\n```";
        let v = extract_json(content).unwrap();
        assert!(v["steps"].is_array());
    }

    #[test]
    fn surrounding_prose_is_stripped() {
        let v = extract_json("Sure! {\"a\": 1} hope that helps").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn bare_array() {
        let v = extract_json("[1, 2, 3]").unwrap();
        assert_eq!(v.as_array().unwrap().len(), 3);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("").is_err());
    }
}
