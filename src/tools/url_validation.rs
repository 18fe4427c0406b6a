use rmcp::ErrorData as McpError;
use serde_json::Value;
use url::Url;

/// Accepts only absolute http(s) URLs; `field` names the offending parameter.
pub fn validate_http_url(field: &str, raw: &str) -> Result<Url, McpError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params(format!("{field} must not be empty"), None));
    }
    let parsed = Url::parse(trimmed).map_err(|err| {
        McpError::invalid_params(format!("{field} is not a valid URL"), Some(Value::String(err.to_string())))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(McpError::invalid_params(
            format!("{field} must use http or https"),
            Some(Value::String(format!("got scheme: {scheme}"))),
        )),
    }
}

/// Like [`validate_http_url`] but also lets inline `data:` images through for upload.
pub fn validate_image_source(field: &str, raw: &str) -> Result<String, McpError> {
    if crate::storage::is_data_url(raw) {
        return Ok(raw.trim().to_string());
    }
    validate_http_url(field, raw).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        let err = validate_http_url("image_url", "ftp://files.test/a.png").unwrap_err();
        assert!(err.message.contains("http or https"));
        assert!(validate_http_url("image_url", "  ").is_err());
        assert!(validate_http_url("image_url", "https://img.test/a.png").is_ok());
    }

    #[test]
    fn data_urls_pass_image_source_check() {
        let value = validate_image_source("image_url", "data:image/png;base64,aGVsbG8=").unwrap();
        assert!(value.starts_with("data:image/png"));
        assert!(validate_image_source("image_url", "file:///tmp/a.png").is_err());
    }
}
