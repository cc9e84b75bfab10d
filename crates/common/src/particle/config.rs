use crate::validation::validated;
use anyhow::Context;
use garde::Validate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PARTICLE_API_URL: &str = "https://api.particle.io";

/// Connection settings for the Particle device cloud
#[derive(Debug, Clone)]
pub struct ParticleConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PARTICLE_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Account login read from the credentials file
#[derive(Clone, Deserialize, Validate)]
pub struct ParticleCredentials {
    #[garde(length(min = 1))]
    pub username: String,
    #[garde(length(min = 1))]
    pub password: String,
}

impl std::fmt::Debug for ParticleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Load `{ "username": ..., "password": ... }` from a JSON file
pub fn load_credentials(path: impl AsRef<Path>) -> anyhow::Result<ParticleCredentials> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file {}", path.display()))?;
    let credentials: ParticleCredentials = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse credentials file {}", path.display()))?;
    Ok(validated(credentials)?)
}
