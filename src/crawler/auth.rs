//! OAuth password-grant login

use crate::crawler::fetcher::{classify_status, TransportError};
use crate::ConfigError;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

/// Script-app credentials, read from a TOML file
#[derive(Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

/// Reads a credentials file
pub fn load_credentials(path: &Path) -> Result<Credentials, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let credentials: Credentials = toml::from_str(&content)?;

    if credentials.client_id.is_empty() || credentials.username.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{}: client-id and username must not be empty",
            path.display()
        )));
    }

    Ok(credentials)
}

/// Exchanges credentials for a bearer token
///
/// A refusal (bad password, unknown app) fails with `AuthRequired`, which the
/// caller treats as fatal.
pub async fn request_token(
    client: &Client,
    token_url: &str,
    credentials: &Credentials,
) -> Result<String, TransportError> {
    let response = client
        .post(token_url)
        .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
        .form(&[
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| TransportError::Network {
            url: token_url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(token_url, status, response.headers()));
    }

    let body: TokenResponse = response.json().await.map_err(|e| TransportError::Decode {
        url: token_url.to_string(),
        message: e.to_string(),
    })?;

    match body.access_token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => {
            tracing::error!(
                "Token exchange refused: {}",
                body.error.as_deref().unwrap_or("no access token returned")
            );
            Err(TransportError::AuthRequired {
                url: token_url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
