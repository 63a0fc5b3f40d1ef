use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::capability::Capability;
use crate::retry::{RateLimited, is_rate_limited, retry_after};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub type TranslateFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// Machine translation of one text block.
pub trait Translate: Send + Sync {
    fn name(&self) -> &str;
    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> TranslateFuture;
}

/// Client for a LibreTranslate-compatible `POST /translate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            bail!("translation endpoint is empty");
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("translation endpoint must be an http(s) URL: {}", endpoint);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .with_context(|| "failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Wraps the configured endpoint as a capability; no endpoint means no
    /// translation.
    pub fn probe(endpoint: Option<&str>, api_key: Option<String>) -> Capability<dyn Translate> {
        let Some(endpoint) = endpoint.filter(|value| !value.trim().is_empty()) else {
            return Capability::unavailable("no translation endpoint configured");
        };
        match Self::new(endpoint, api_key) {
            Ok(translator) => {
                info!("translating via {}", translator.endpoint());
                let translator: Arc<dyn Translate> = Arc::new(translator);
                Capability::Available(translator)
            }
            Err(err) => Capability::unavailable(format!("{:#}", err)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Translate for HttpTranslator {
    fn name(&self) -> &str {
        "http"
    }

    fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> TranslateFuture {
        let this = self.clone();
        let text = text.to_string();
        let source = source_lang.to_string();
        let target = target_lang.to_string();
        Box::pin(async move { this.request(&text, &source, &target).await })
    }
}

impl HttpTranslator {
    async fn request(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let url = format!("{}/translate", self.endpoint);
        let mut body = json!({
            "q": text,
            "source": source,
            "target": target,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to call {}", url))?;
        let status = response.status();
        let headers = response.headers().clone();
        let payload = response
            .text()
            .await
            .with_context(|| "failed to read translation response")?;

        if !status.is_success() {
            if is_rate_limited(status, &payload) {
                return Err(anyhow::Error::new(RateLimited {
                    retry_after: retry_after(&headers),
                })
                .context(format!("translation endpoint returned {}", status)));
            }
            bail!("translation failed ({}): {}", status, payload.trim());
        }
        parse_translation(&payload)
    }
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: Option<String>,
    error: Option<String>,
}

pub fn parse_translation(payload: &str) -> Result<String> {
    let parsed: TranslateResponse = serde_json::from_str(payload)
        .with_context(|| "failed to parse translation response")?;
    if let Some(error) = parsed.error {
        return Err(anyhow!("translation endpoint error: {}", error));
    }
    parsed
        .translated_text
        .ok_or_else(|| anyhow!("translation response has no translatedText"))
}
