use anyhow::{bail, Context, Result};
use rehab_contracts::assets::ImagePart;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::client::GenerationClient;
use crate::config::EngineConfig;
use crate::error::{truncate_text, GenerationError};

pub struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    image_model: String,
    json_model: String,
    timeout: std::time::Duration,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            image_model: config.image_model.clone(),
            json_model: config.json_model.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY not set (enable test mode to simulate calls)"),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, model: &str, payload: &Value) -> Result<Value> {
        let api_key = self.api_key()?;
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error(response)
    }

    fn generate_image(&self, operation: &str, prompt: &str, images: &[ImagePart]) -> Result<String> {
        let payload = image_request_payload(prompt, images);
        let response = self.post(&self.image_model, &payload)?;
        first_image_data(&response).ok_or_else(|| {
            GenerationError::NoImageReturned {
                operation: operation.to_string(),
            }
            .into()
        })
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn transform_image(&self, prompt: &str, image: &ImagePart) -> Result<String> {
        self.generate_image("image transform", prompt, std::slice::from_ref(image))
    }

    fn extract_structured(&self, prompt: &str, image: &ImagePart, schema: &Value) -> Result<Value> {
        let payload = structured_request_payload(prompt, image, schema);
        let response = self.post(&self.json_model, &payload)?;
        parse_structured_text(&response_text(&response))
    }

    fn transform_composite(&self, prompt: &str, images: &[ImagePart]) -> Result<String> {
        if images.len() < 2 {
            bail!("composite transform needs at least two images, got {}", images.len());
        }
        self.generate_image("composite transform", prompt, images)
    }
}

fn inline_image_part(image: &ImagePart) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": image.data,
        }
    })
}

fn request_parts(prompt: &str, images: &[ImagePart]) -> Vec<Value> {
    let mut parts: Vec<Value> = images.iter().map(inline_image_part).collect();
    parts.push(json!({ "text": prompt }));
    parts
}

fn image_request_payload(prompt: &str, images: &[ImagePart]) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": request_parts(prompt, images),
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

fn structured_request_payload(prompt: &str, image: &ImagePart, schema: &Value) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": request_parts(prompt, std::slice::from_ref(image)),
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": schema,
        },
    })
}

fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// First non-empty inline image of the first candidate; other parts are ignored.
fn first_image_data(response: &Value) -> Option<String> {
    first_candidate_parts(response).into_iter().find_map(|part| {
        part.get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
            .map(str::to_string)
    })
}

fn response_text(response: &Value) -> String {
    first_candidate_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
}

fn parse_structured_text(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(unfenced).map_err(|err| {
        GenerationError::MalformedResponse(format!(
            "{err}; response text: {}",
            truncate_text(trimmed, 200)
        ))
        .into()
    })
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if code == 429 {
        bail!(GenerationError::RateLimited(format!(
            "Gemini request failed (429): {}",
            truncate_text(&body, 512)
        )));
    }
    if !status.is_success() {
        bail!(
            "Gemini request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value =
        serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;
    use crate::error::{classify_error, ErrorKind};

    fn response_with_parts(parts: Value) -> Value {
        json!({ "candidates": [{ "content": { "parts": parts } }] })
    }

    fn read_request(stream: &mut TcpStream) -> Result<String> {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn serve_once(status: &'static str, body: String) -> Result<(String, JoinHandle<Result<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || -> Result<String> {
            let (mut stream, _) = listener.accept()?;
            let request = read_request(&mut stream)?;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes())?;
            stream.flush()?;
            Ok(request)
        });
        Ok((base, handle))
    }

    fn client_for(base: &str) -> Result<GeminiClient> {
        let mut client = GeminiClient::new(&EngineConfig {
            api_base: base.to_string(),
            api_key: Some("test-key".to_string()),
            ..EngineConfig::default()
        });
        client.http = HttpClient::builder().no_proxy().build()?;
        Ok(client)
    }

    fn received(handle: JoinHandle<Result<String>>) -> Result<String> {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("stub server panicked"))?
    }

    #[test]
    fn endpoint_prefixes_model_path() {
        let client = GeminiClient::new(&EngineConfig::default());
        assert_eq!(
            client.endpoint_for_model("gemini-2.5-flash-image"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert!(client
            .endpoint_for_model("models/custom")
            .ends_with("/models/custom:generateContent"));
    }

    #[test]
    fn image_payload_puts_images_before_instruction() {
        let images = vec![ImagePart::png("YmFzZQ=="), ImagePart::new("ZmFjZQ==", "image/jpeg")];
        let payload = image_request_payload("swap faces", &images);
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["data"], json!("YmFzZQ=="));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[2]["text"], json!("swap faces"));
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["IMAGE"]));
    }

    #[test]
    fn structured_payload_constrains_response() {
        let schema = json!({"type": "OBJECT"});
        let payload = structured_request_payload("count", &ImagePart::png("eA=="), &schema);
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert_eq!(payload["generationConfig"]["responseSchema"], schema);
    }

    #[test]
    fn first_image_skips_text_and_empty_parts() {
        let response = response_with_parts(json!([
            {"text": "Here is your photo"},
            {"inlineData": {"mimeType": "image/png", "data": ""}},
            {"inlineData": {"mimeType": "image/png", "data": "Zmlyc3Q="}},
            {"inlineData": {"mimeType": "image/png", "data": "c2Vjb25k"}}
        ]));
        assert_eq!(first_image_data(&response).as_deref(), Some("Zmlyc3Q="));
        assert_eq!(first_image_data(&json!({"candidates": []})), None);
    }

    #[test]
    fn structured_text_parses_or_reports_malformed() -> Result<()> {
        let response = response_with_parts(json!([{"text": "{\"faces\": "}, {"text": "[]}"}]));
        assert_eq!(parse_structured_text(&response_text(&response))?, json!({"faces": []}));
        assert_eq!(
            parse_structured_text("```json\n{\"faces\": []}\n```")?,
            json!({"faces": []})
        );

        let err = parse_structured_text("I found two faces!").err();
        assert_eq!(
            err.as_ref().map(classify_error),
            Some(ErrorKind::MalformedResponse)
        );
        Ok(())
    }

    #[test]
    fn image_response_over_http_yields_inline_data() -> Result<()> {
        let body = response_with_parts(json!([
            {"text": "Restored."},
            {"inlineData": {"mimeType": "image/png", "data": "cmVzdG9yZWQ="}}
        ]));
        let (base, server) = serve_once("200 OK", body.to_string())?;
        let data = client_for(&base)?.transform_image("restore", &ImagePart::png("eA=="))?;
        assert_eq!(data, "cmVzdG9yZWQ=");

        let request = received(server)?;
        assert!(request.starts_with(
            "POST /models/gemini-2.5-flash-image:generateContent?key=test-key "
        ));
        assert!(request.contains("\"responseModalities\":[\"IMAGE\"]"));
        Ok(())
    }

    #[test]
    fn success_without_image_is_no_image_returned() -> Result<()> {
        let body = response_with_parts(json!([{"text": "I can't edit this photo."}]));
        let (base, server) = serve_once("200 OK", body.to_string())?;
        let err = client_for(&base)?
            .transform_image("restore", &ImagePart::png("eA=="))
            .err();
        received(server)?;
        assert_eq!(
            err.as_ref().map(classify_error),
            Some(ErrorKind::NoImageReturned)
        );
        Ok(())
    }

    #[test]
    fn http_429_is_rate_limited() -> Result<()> {
        let body = json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}});
        let (base, server) = serve_once("429 Too Many Requests", body.to_string())?;
        let err = client_for(&base)?
            .transform_composite("swap", &[ImagePart::png("YQ=="), ImagePart::png("Yg==")])
            .err();
        received(server)?;
        assert!(matches!(
            err.as_ref().and_then(|err| err.downcast_ref::<GenerationError>()),
            Some(GenerationError::RateLimited(_))
        ));
        Ok(())
    }

    #[test]
    fn structured_prose_over_http_is_malformed() -> Result<()> {
        let body = response_with_parts(json!([{"text": "There are two people here."}]));
        let (base, server) = serve_once("200 OK", body.to_string())?;
        let err = client_for(&base)?
            .extract_structured("count faces", &ImagePart::png("eA=="), &json!({"type": "OBJECT"}))
            .err();
        let request = received(server)?;
        assert!(request.starts_with("POST /models/gemini-2.5-flash:generateContent?key=test-key "));
        assert_eq!(
            err.as_ref().map(classify_error),
            Some(ErrorKind::MalformedResponse)
        );
        Ok(())
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let client = GeminiClient::new(&EngineConfig::default());
        let err = client
            .transform_image("restore", &ImagePart::png("eA=="))
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("GEMINI_API_KEY"));
    }
}
