use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_JSON_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub image_model: String,
    pub json_model: String,
    pub api_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            json_model: DEFAULT_JSON_MODEL.to_string(),
            api_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(90),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let api_base = get("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base);
        let api_key = get("GEMINI_API_KEY")
            .or_else(|| get("GOOGLE_API_KEY"))
            .or_else(|| get("API_KEY"));
        let api_delay = get("REHAB_API_DELAY_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.api_delay);
        let request_timeout = get("REHAB_REQUEST_TIMEOUT_S")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .map(|value| Duration::from_secs_f64(value.clamp(15.0, 300.0)))
            .unwrap_or(defaults.request_timeout);

        Self {
            api_base,
            api_key,
            image_model: get("REHAB_IMAGE_MODEL").unwrap_or(defaults.image_model),
            json_model: get("REHAB_JSON_MODEL").unwrap_or(defaults.json_model),
            api_delay,
            request_timeout,
        }
    }
}
