use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::ArkClientConfig;
use crate::encode::jpeg_data_url;

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub task_id: String,
    pub prompt: String,
    /// Base64 JPEG bytes, without the data-URL prefix.
    pub image_base64: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub model: String,
}

/// A hosted vision-language model: prompt plus image in, free text out.
pub trait VisionClient: Send + Sync {
    fn name(&self) -> &str;
    fn describe(&self, request: &VisionRequest) -> Result<VisionResponse>;
}

#[derive(Default)]
pub struct VisionClientRegistry {
    clients: BTreeMap<String, Box<dyn VisionClient>>,
}

impl VisionClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: VisionClient + 'static>(&mut self, client: C) {
        self.clients
            .insert(client.name().to_string(), Box::new(client));
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn VisionClient>> {
        self.clients.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

/// Offline client that answers without network I/O.
pub struct DryrunVisionClient;

impl VisionClient for DryrunVisionClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        Ok(VisionResponse {
            text: format!(
                "[dryrun] task {}: {} ({} base64 chars)",
                request.task_id,
                request.prompt,
                request.image_base64.len()
            ),
            model: "dryrun-vision".to_string(),
        })
    }
}

/// Volcengine Ark chat-completions client (OpenAI-compatible schema).
pub struct ArkVisionClient {
    config: ArkClientConfig,
    http: HttpClient,
}

impl ArkVisionClient {
    pub fn new(config: ArkClientConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build Ark HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base)
    }

    fn build_payload(&self, request: &VisionRequest) -> Value {
        json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": jpeg_data_url(&request.image_base64) }
                    }
                ]
            }]
        })
    }
}

impl VisionClient for ArkVisionClient {
    fn name(&self) -> &str {
        "ark"
    }

    fn describe(&self, request: &VisionRequest) -> Result<VisionResponse> {
        let endpoint = self.endpoint();
        let payload = self.build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("Ark request failed ({endpoint})"))?;
        let parsed = response_json_or_error("Ark", response)?;
        let text = extract_message_text(&parsed)?;
        let model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(self.config.model.as_str())
            .to_string();
        if let Some(usage) = parsed.get("usage") {
            log::debug!("Ark usage for task {}: {usage}", request.task_id);
        }
        Ok(VisionResponse { text, model })
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Pulls `choices[0].message.content`, accepting either a plain string or
/// a list of `{type: "text", text}` parts.
pub fn extract_message_text(response: &Value) -> Result<String> {
    let Some(content) = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
    else {
        bail!("response has no choices[0].message.content");
    };

    let text = match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<&str>>()
            .join("\n"),
        other => bail!("unexpected message content type: {other}"),
    };
    if text.is_empty() {
        bail!("model returned empty content");
    }
    Ok(text)
}

/// Flattens an error chain into one line, dropping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
