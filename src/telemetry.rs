use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const REDACTED: &str = "[REDACTED]";
const MAX_PAYLOAD_CHARS: usize = 50_000;
const SENSITIVE_KEY_PARTS: &[&str] = &[
    "authorization",
    "cookie",
    "token",
    "password",
    "secret",
    "apikey",
    "api_key",
    "api-key",
    "accesskey",
    "access_key",
];

/// Installs the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "genstudio=info,tower_http=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|value| value.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    // ModelsLabs carries its credential in a bare `key` field.
    key == "key" || SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Masks credential-looking fields so a payload can be logged.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(text) if text.starts_with("data:") => {
            Value::String(format!("[data url, {} chars]", text.len()))
        }
        other => other.clone(),
    }
}

/// Redacted, length-capped rendering for debug logs.
pub fn loggable(value: &Value) -> String {
    let rendered = redact(value).to_string();
    if rendered.len() <= MAX_PAYLOAD_CHARS {
        return rendered;
    }
    let mut end = MAX_PAYLOAD_CHARS;
    while !rendered.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &rendered[..end])
}
