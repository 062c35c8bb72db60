//! The reqwest-backed synthesis client.

use futures_util::StreamExt;
use reqwest::{header::HeaderMap, StatusCode};
use tracing::debug;

use super::{Billing, Error, Synthesis, SynthesisRequest, Synthesizer};

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.aivis-project.com";

/// A synthesis client over the Aivis Cloud HTTP API.
pub struct HttpSynthesizer {
    /// The underlying HTTP client.
    http: reqwest::Client,

    /// Endpoint base, without a trailing slash.
    base_url: String,

    /// Bearer token sent with every request.
    api_key: String,
}

impl HttpSynthesizer {
    /// Builds a client for `api_key` against `base_url`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis, Error> {
        let response = self
            .http
            .post(format!("{}/v1/tts/synthesize", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let billing = billing_from_headers(response.headers());
        let filename = content_disposition_filename(response.headers());

        debug!(
            model = %request.model_uuid,
            credits = ?billing.credits_used,
            "synthesis stream started"
        );

        Ok(Synthesis {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::Stream))
                .boxed(),
            billing,
            filename,
        })
    }
}

/// Maps a non-success status to the error taxonomy.
fn map_status(status: StatusCode, body: String) -> Error {
    match status.as_u16() {
        401 => Error::InvalidKey,
        402 => Error::InsufficientCredit,
        404 => Error::ModelNotFound,
        422 => Error::InvalidParameter(body),
        429 => Error::RateLimited,
        code if code >= 500 => Error::Upstream(code),
        code => Error::Status(code),
    }
}

/// Reads a header as a string, if present and valid.
fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Extracts the `X-Aivis-*` billing headers.
fn billing_from_headers(headers: &HeaderMap) -> Billing {
    Billing {
        mode: header_str(headers, "x-aivis-billing-mode").map(ToOwned::to_owned),
        credits_used: header_str(headers, "x-aivis-credits-used").and_then(|v| v.parse().ok()),
        credits_remaining: header_str(headers, "x-aivis-credits-remaining")
            .and_then(|v| v.parse().ok()),
        requests_remaining: header_str(headers, "x-aivis-ratelimit-remaining")
            .and_then(|v| v.parse().ok()),
    }
}

/// Pulls a filename out of `Content-Disposition`, when one is attached.
fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let disposition = header_str(headers, "content-disposition")?;

    disposition.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key.eq_ignore_ascii_case("filename"))
            .then(|| value.trim_matches('"').to_owned())
    })
}
