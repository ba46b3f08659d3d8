//! HTTP client for the conversational reply gateway.
//!
//! The gateway is an external backend with two commands on one endpoint
//! pair: a normal turn (`POST {text, userId, convId}`) and a memory reset
//! (`POST {reset: true, userId, convId}`). Replies are parsed tolerantly —
//! the backend has emitted several key spellings over time — and a non-JSON
//! 2xx body degrades to a raw-text reply rather than a failure.

use crate::config::GatewayConfig;
use crate::error::{ChikoError, Result};
use base64::Engine as _;
use tracing::{debug, warn};

/// Opaque identifiers scoping a session's memory on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationIdentity {
    /// Stable user identifier.
    pub user_id: String,
    /// Per-session conversation identifier.
    pub conv_id: String,
}

impl ConversationIdentity {
    /// Create an identity with a fresh random conversation id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conv_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Same user, fresh conversation id. Used on session reset so that
    /// replies still in flight for the old conversation can be recognized
    /// as stale and discarded.
    pub fn rotated(&self) -> Self {
        Self::new(self.user_id.clone())
    }
}

/// Where a reply's audio payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Remote URL, already rewritten through the audio proxy if configured.
    Url(String),
    /// Inline payload, already base64-decoded.
    Inline {
        /// Decoded audio bytes.
        bytes: Vec<u8>,
        /// Declared MIME type (`audio/mpeg` when the backend omits it).
        mime: String,
    },
}

/// A parsed gateway reply for one conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    /// Assistant reply text.
    pub reply: String,
    /// Optional explicit emotion tag.
    pub emotion: Option<String>,
    /// Optional speech audio for the reply.
    pub audio: Option<AudioSource>,
}

/// HTTP client for the reply gateway.
pub struct ReplyGateway {
    ask_url: String,
    reset_url: String,
    audio_proxy: Option<String>,
    client: reqwest::Client,
}

impl ReplyGateway {
    /// Create a gateway client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChikoError::Gateway(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            ask_url: config.ask_url.clone(),
            reset_url: config.effective_reset_url(),
            audio_proxy: config.audio_proxy.clone(),
            client,
        })
    }

    /// Send one conversation turn and parse the reply.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx status. A
    /// diagnostic `message` in an error body is included in the error.
    pub async fn ask(&self, text: &str, identity: &ConversationIdentity) -> Result<GatewayReply> {
        let body = serde_json::json!({
            "text": text,
            "userId": identity.user_id,
            "convId": identity.conv_id,
        });

        debug!(conv_id = %identity.conv_id, "sending turn to gateway");
        let response = self
            .client
            .post(&self.ask_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChikoError::Gateway(format!("request failed: {e}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| ChikoError::Gateway(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(ChikoError::Gateway(format!(
                "gateway returned {status}: {}",
                extract_error_message(&raw)
            )));
        }

        Ok(parse_reply(&raw, self.audio_proxy.as_deref()))
    }

    /// Ask the backend to clear any server-side memory for this identity.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx status. Callers
    /// treat this as best-effort and only log failures.
    pub async fn reset(&self, identity: &ConversationIdentity) -> Result<()> {
        let body = serde_json::json!({
            "reset": true,
            "userId": identity.user_id,
            "convId": identity.conv_id,
        });

        let response = self
            .client
            .post(&self.reset_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChikoError::Gateway(format!("reset request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ChikoError::Gateway(format!(
                "reset returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Parse a 2xx gateway body.
///
/// A JSON object yields the first of `reply`/`text`/`message` as the reply
/// text plus the optional `emotion` and audio fields. Anything else (non-
/// JSON, or JSON without a reply key) degrades to the raw body as the
/// reply.
pub fn parse_reply(raw: &str, audio_proxy: Option<&str>) -> GatewayReply {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            return GatewayReply {
                reply: raw.to_owned(),
                emotion: None,
                audio: None,
            };
        }
    };

    let reply = ["reply", "text", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_owned);

    let Some(reply) = reply else {
        return GatewayReply {
            reply: raw.to_owned(),
            emotion: None,
            audio: None,
        };
    };

    GatewayReply {
        reply,
        emotion: value
            .get("emotion")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        audio: resolve_audio(&value, audio_proxy),
    }
}

/// Resolve the reply's audio source, if any.
///
/// `audio_url` takes precedence over inline base64 payloads
/// (`audioBase64`/`audio_base64`/`audio`). Absolute URLs are rewritten
/// through the audio proxy when one is configured.
fn resolve_audio(value: &serde_json::Value, audio_proxy: Option<&str>) -> Option<AudioSource> {
    if let Some(url) = value.get("audio_url").and_then(|v| v.as_str()) {
        return Some(AudioSource::Url(rewrite_audio_url(url, audio_proxy)));
    }

    let encoded = ["audioBase64", "audio_base64", "audio"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))?;

    match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(AudioSource::Inline {
            bytes,
            mime: value
                .get("audio_mime")
                .and_then(|v| v.as_str())
                .unwrap_or("audio/mpeg")
                .to_owned(),
        }),
        Ok(_) => None,
        Err(e) => {
            warn!("discarding undecodable inline audio payload: {e}");
            None
        }
    }
}

/// Rewrite an absolute audio URL through the same-origin proxy; relative
/// URLs and unproxied setups pass through untouched.
fn rewrite_audio_url(url: &str, audio_proxy: Option<&str>) -> String {
    let Some(proxy) = audio_proxy else {
        return url.to_owned();
    };
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            format!("{proxy}?url={}", urlencoding::encode(url))
        }
        _ => url.to_owned(),
    }
}

/// Extract a human-readable error message from an error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_owned()
            } else {
                body.chars().take(500).collect()
            }
        })
}

// ── Tests ───────────────────────────────────────────────────────────────
