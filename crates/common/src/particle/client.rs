use crate::domain::{
    CallFunctionInput, CallFunctionOutput, DeviceController, DomainError, DomainResult,
};
use crate::particle::{ParticleConfig, ParticleCredentials};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

// Public OAuth client the Particle CLI and SDKs authenticate as
const OAUTH_CLIENT_ID: &str = "particle";
const OAUTH_CLIENT_SECRET: &str = "particle";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct FunctionResponse {
    #[serde(default)]
    return_value: Option<i64>,
}

/// Particle Cloud REST client.
///
/// The access token from the last successful login is cached and reused.
/// A call without a token logs in once first; a 401 drops the cached token
/// so the next call logs in again.
pub struct ParticleClient {
    base_url: String,
    http: reqwest::Client,
    credentials: ParticleCredentials,
    token: RwLock<Option<String>>,
}

impl ParticleClient {
    pub fn new(config: ParticleConfig, credentials: ParticleCredentials) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Exchange the account credentials for an access token and cache it
    #[instrument(skip(self), fields(username = %self.credentials.username))]
    pub async fn login(&self) -> DomainResult<()> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .basic_auth(OAUTH_CLIENT_ID, Some(OAUTH_CLIENT_SECRET))
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DomainError::AuthError(format!("login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(DomainError::AuthError(format!(
                "login rejected ({}): {}",
                status, message
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DomainError::AuthError(format!("invalid login response: {}", e)))?;

        *self.token.write().await = Some(body.access_token);
        info!("authenticated with device cloud");
        Ok(())
    }

    async fn access_token(&self) -> DomainResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }

        debug!("no cached access token, logging in");
        self.login().await?;

        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| DomainError::AuthError("no access token after login".to_string()))
    }

    fn function_url(&self, device_id: &str, function_name: &str) -> String {
        format!(
            "{}/v1/devices/{}/{}",
            self.base_url, device_id, function_name
        )
    }
}

#[async_trait]
impl DeviceController for ParticleClient {
    #[instrument(
        skip(self, input),
        fields(device_id = %input.device_id, function = %input.function_name)
    )]
    async fn call_function(&self, input: CallFunctionInput) -> DomainResult<CallFunctionOutput> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(self.function_url(&input.device_id, &input.function_name))
            .bearer_auth(&token)
            .form(&[("arg", input.argument.as_str())])
            .send()
            .await
            .map_err(|e| DomainError::DeviceControlError {
                device_id: input.device_id.clone(),
                message: format!("request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                warn!("access token rejected, clearing cached token");
                *self.token.write().await = None;
            }
            let message = error_message(response).await;
            return Err(DomainError::DeviceControlError {
                device_id: input.device_id,
                message: format!("{}: {}", status, message),
            });
        }

        let body: FunctionResponse =
            response
                .json()
                .await
                .map_err(|e| DomainError::DeviceControlError {
                    device_id: input.device_id.clone(),
                    message: format!("invalid function response: {}", e),
                })?;

        debug!(return_value = ?body.return_value, "device function returned");
        Ok(CallFunctionOutput {
            return_value: body.return_value,
        })
    }
}

/// Best-effort human readable message from an error response body
async fn error_message(response: reqwest::Response) -> String {
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return format!("unreadable error body: {}", e),
    };

    serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            ["error_description", "error", "info"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string())
}
