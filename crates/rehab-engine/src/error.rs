use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{operation} returned no image")]
    NoImageReturned { operation: String },

    #[error("malformed structured response: {0}")]
    MalformedResponse(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("stored session is corrupt: {0}")]
    PersistenceCorrupt(String),

    #[error("'{0}' is already in progress")]
    AlreadyPending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoImageReturned,
    MalformedResponse,
    RateLimited,
    PreconditionFailed,
    PersistenceCorrupt,
    AlreadyPending,
    Other,
}

const RATE_LIMIT_MARKERS: &[&str] = &["429", "resource_exhausted", "resource exhausted"];

pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(typed) = cause.downcast_ref::<GenerationError>() {
            return match typed {
                GenerationError::NoImageReturned { .. } => ErrorKind::NoImageReturned,
                GenerationError::MalformedResponse(_) => ErrorKind::MalformedResponse,
                GenerationError::RateLimited(_) => ErrorKind::RateLimited,
                GenerationError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
                GenerationError::PersistenceCorrupt(_) => ErrorKind::PersistenceCorrupt,
                GenerationError::AlreadyPending(_) => ErrorKind::AlreadyPending,
            };
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.status().map(|status| status.as_u16()) == Some(429) {
                return ErrorKind::RateLimited;
            }
        }
    }
    let text = error_chain_text(err, 4096).to_ascii_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ErrorKind::RateLimited;
    }
    ErrorKind::Other
}

pub fn user_message(unit: &str, err: &anyhow::Error) -> String {
    match classify_error(err) {
        ErrorKind::RateLimited => "The generation service is refusing requests because the rate limit or daily quota is exhausted. Give it a rest and try again later.".to_string(),
        ErrorKind::PreconditionFailed | ErrorKind::AlreadyPending => err.to_string(),
        _ => format!(
            "Generation failed during '{unit}': {}. Try again?",
            error_chain_text(err, 400)
        ),
    }
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
