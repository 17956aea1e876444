//! Device-code login and credential storage.
//!
//! The long-lived grant (a PAT) is looked up from the environment
//! first, then from a dot-file in the home directory. Each run
//! exchanges the PAT for a short-lived session token before talking to
//! the completion endpoint.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const SESSION_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

// The service rejects requests without a recognized editor identity.
const EDITOR_VERSION: &str = "Neovim/0.6.1";
const EDITOR_PLUGIN_VERSION: &str = "copilot.vim/1.16.0";
const USER_AGENT: &str = "GithubCopilot/1.155.0";

pub const PAT_ENV_VAR: &str = "COPILOT_PAT";
const PAT_FILE_NAME: &str = ".copilot-pat";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential found: run `skipper auth` or set {PAT_ENV_VAR}")]
    NoCredential,
    #[error("auth request failed: {0}")]
    Http(String),
    #[error("auth protocol failure: {0}")]
    Protocol(String),
    #[error("timed out waiting for the device grant")]
    GrantTimeout,
    #[error("failed to store credential: {0}")]
    Store(String),
}

/// Fields of the device-code response the flow needs.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AuthStore {
    pat_path: PathBuf,
}

impl AuthStore {
    pub fn new() -> Self {
        Self {
            pat_path: home_dir().join(PAT_FILE_NAME),
        }
    }

    #[cfg(test)]
    fn with_pat_path(pat_path: PathBuf) -> Self {
        Self { pat_path }
    }

    /// Environment first, then the PAT file.
    #[must_use]
    pub fn stored_pat(&self) -> Option<String> {
        if let Ok(value) = std::env::var(PAT_ENV_VAR) {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        std::fs::read_to_string(&self.pat_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Owner-only permissions on the credential file.
    pub fn save_pat(&self, pat: &str) -> Result<(), AuthError> {
        std::fs::write(&self.pat_path, pat).map_err(|e| AuthError::Store(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.pat_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::Store(e.to_string()))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn pat_path(&self) -> &PathBuf {
        &self.pat_path
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the device-code flow. The caller shows `verification_uri` and
/// `user_code` to the operator, then polls with `poll_for_pat`.
pub fn request_device_grant(client: &reqwest::blocking::Client) -> Result<DeviceGrant, AuthError> {
    let response = client
        .post(DEVICE_CODE_URL)
        .header("accept", "application/json")
        .header("editor-version", EDITOR_VERSION)
        .header("editor-plugin-version", EDITOR_PLUGIN_VERSION)
        .header("user-agent", USER_AGENT)
        .json(&serde_json::json!({ "client_id": CLIENT_ID, "scope": "read:user" }))
        .send()
        .map_err(|e| AuthError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AuthError::Http(format!(
            "device code request returned HTTP {}",
            response.status()
        )));
    }
    response
        .json::<DeviceGrant>()
        .map_err(|e| AuthError::Protocol(format!("device code response: {e}")))
}

/// Poll the token endpoint until the operator approves the grant or it
/// expires. Blocking; sleeps `interval` seconds between attempts.
pub fn poll_for_pat(
    client: &reqwest::blocking::Client,
    grant: &DeviceGrant,
) -> Result<String, AuthError> {
    let deadline = Instant::now() + Duration::from_secs(grant.expires_in);
    let interval = Duration::from_secs(grant.interval.unwrap_or(5));
    while Instant::now() < deadline {
        if let Some(pat) = try_fetch_pat(client, &grant.device_code)? {
            return Ok(pat);
        }
        std::thread::sleep(interval);
    }
    Err(AuthError::GrantTimeout)
}

fn try_fetch_pat(
    client: &reqwest::blocking::Client,
    device_code: &str,
) -> Result<Option<String>, AuthError> {
    let response = client
        .post(ACCESS_TOKEN_URL)
        .header("accept", "application/json")
        .header("editor-version", EDITOR_VERSION)
        .header("editor-plugin-version", EDITOR_PLUGIN_VERSION)
        .header("user-agent", USER_AGENT)
        .json(&serde_json::json!({
            "client_id": CLIENT_ID,
            "device_code": device_code,
            "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
        }))
        .send();
    // Pending grants and transient failures both mean "keep polling".
    let Ok(response) = response else {
        return Ok(None);
    };
    let Ok(body) = response.json::<serde_json::Value>() else {
        return Ok(None);
    };
    Ok(body
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(ToString::to_string))
}

/// Exchange the PAT for the short-lived session token the completion
/// endpoint accepts.
pub fn session_token(
    client: &reqwest::blocking::Client,
    pat: &str,
) -> Result<String, AuthError> {
    let response = client
        .get(SESSION_TOKEN_URL)
        .header("authorization", format!("token {pat}"))
        .header("editor-version", EDITOR_VERSION)
        .header("editor-plugin-version", EDITOR_PLUGIN_VERSION)
        .header("user-agent", USER_AGENT)
        .send()
        .map_err(|e| AuthError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AuthError::Http(format!(
            "token exchange returned HTTP {}",
            response.status()
        )));
    }
    let body = response
        .json::<serde_json::Value>()
        .map_err(|e| AuthError::Protocol(format!("token response: {e}")))?;
    body.get("token")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| AuthError::Protocol("token response missing 'token' field".to_string()))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
