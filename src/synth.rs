//! The remote synthesis service boundary.
//!
//! The rest of the program consumes synthesis through the narrow
//! [`Synthesizer`] trait: hand it a request, get back a chunked byte
//! stream plus response metadata. The production implementation lives in
//! [`client`]; tests substitute scripted streams.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

pub mod client;
pub mod request;

pub use client::HttpSynthesizer;
pub use request::SynthesisRequest;

/// Errors from the synthesis service, mapped from HTTP statuses.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("api key is invalid")]
    InvalidKey,

    #[error("insufficient credit")]
    InsufficientCredit,

    #[error("model not found")]
    ModelNotFound,

    #[error("invalid synthesis parameter: {0}")]
    InvalidParameter(String),

    #[error("rate limited")]
    RateLimited,

    #[error("upstream server error (status {0})")]
    Upstream(u16),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unable to reach the synthesis service")]
    Request(#[from] reqwest::Error),

    #[error("audio stream failed")]
    Stream(#[source] reqwest::Error),
}

/// Billing and rate-limit details carried on a synthesis response.
#[derive(Debug, Clone, Default)]
pub struct Billing {
    /// `X-Aivis-Billing-Mode`.
    pub mode: Option<String>,

    /// `X-Aivis-Credits-Used`.
    pub credits_used: Option<f64>,

    /// `X-Aivis-Credits-Remaining`.
    pub credits_remaining: Option<f64>,

    /// `X-Aivis-RateLimit-Remaining`.
    pub requests_remaining: Option<u64>,
}

/// A started synthesis: the ordered chunk stream plus response metadata.
pub struct Synthesis {
    /// Audio bytes in the requested format, ending at stream EOF.
    pub chunks: BoxStream<'static, Result<Bytes, Error>>,

    /// Billing headers extracted from the response.
    pub billing: Billing,

    /// Filename suggested by `Content-Disposition`, when present.
    pub filename: Option<String>,
}

/// Anything that can run a synthesis request.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Starts a synthesis and returns its chunk stream.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis, Error>;
}
