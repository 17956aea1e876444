//! Blocking HTTP client for the reasoning oracle.
//!
//! The oracle is an opaque chat-completion endpoint; its output is
//! untrusted free text the protocol layer parses later. This crate
//! handles credentials, request shape, and retry policy only.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use skipper_core::OracleMessage;
use std::time::Duration;
use thiserror::Error;

pub mod auth;

use auth::{AuthError, AuthStore};

const COMPLETIONS_URL: &str = "https://api.githubcopilot.com/chat/completions";
const MODEL: &str = "gpt-4o-2024-08-06";
const EDITOR_VERSION: &str = "vscode/1.80.1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u8 = 2;
const RETRY_BASE_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("oracle returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle protocol failure: {0}")]
    Protocol(String),
}

/// The single seam the agent depends on. Production uses the HTTP
/// client below; tests script responses through a mock.
pub trait Oracle {
    fn complete(&self, messages: &[OracleMessage]) -> Result<String, OracleError>;
}

pub struct CopilotOracle {
    client: Client,
    auth: AuthStore,
}

impl CopilotOracle {
    pub fn new() -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            auth: AuthStore::new(),
        })
    }

    /// Fails fast when no credential is stored, before any plan is
    /// requested.
    pub fn check_credential(&self) -> Result<(), OracleError> {
        self.auth
            .stored_pat()
            .map(|_| ())
            .ok_or(OracleError::Auth(AuthError::NoCredential))
    }

    fn bearer_token(&self) -> Result<String, OracleError> {
        let pat = self.auth.stored_pat().ok_or(AuthError::NoCredential)?;
        Ok(auth::session_token(&self.client, &pat)?)
    }
}

impl Oracle for CopilotOracle {
    fn complete(&self, messages: &[OracleMessage]) -> Result<String, OracleError> {
        let token = self.bearer_token()?;
        let payload = completion_payload(messages);

        let mut last_err: Option<OracleError> = None;
        let mut attempt: u8 = 0;
        while attempt <= MAX_RETRIES {
            let response = self
                .client
                .post(COMPLETIONS_URL)
                .bearer_auth(&token)
                .header("editor-version", EDITOR_VERSION)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = retry_after_seconds(&resp);
                    let body = resp
                        .text()
                        .map_err(|e| OracleError::Transport(e.to_string()))?;
                    if status.is_success() {
                        return extract_completion_text(&body);
                    }
                    last_err = Some(OracleError::Api {
                        status: status.as_u16(),
                        detail: api_error_detail(&body),
                    });
                    if should_retry_status(status) && attempt < MAX_RETRIES {
                        std::thread::sleep(retry_delay(attempt, retry_after));
                        attempt += 1;
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(OracleError::Transport(e.to_string()));
                    if (e.is_timeout() || e.is_connect() || e.is_request()) && attempt < MAX_RETRIES
                    {
                        std::thread::sleep(retry_delay(attempt, None));
                        attempt += 1;
                        continue;
                    }
                    break;
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| OracleError::Transport("request failed without detail".to_string())))
    }
}

/// Request shape the completion endpoint expects.
fn completion_payload(messages: &[OracleMessage]) -> Value {
    json!({
        "intent": false,
        "model": MODEL,
        "temperature": 0.2,
        "top_p": 1,
        "n": 1,
        "stream": false,
        "messages": messages,
    })
}

/// A 2xx body missing `choices[0].message.content` is a protocol
/// failure, not an empty answer.
fn extract_completion_text(body: &str) -> Result<String, OracleError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| OracleError::Protocol(format!("response was not JSON: {e}")))?;
    value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            OracleError::Protocol("response missing choices[0].message.content".to_string())
        })
}

fn api_error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_seconds(resp: &reqwest::blocking::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

fn retry_delay(attempt: u8, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        return Duration::from_secs(seconds);
    }
    Duration::from_millis(RETRY_BASE_MS.saturating_mul(2_u64.saturating_pow(u32::from(attempt))))
}
