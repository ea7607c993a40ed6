use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;

use crate::config::{Config, ProviderCfg};
use crate::error::{CoreResult, RelayError};
use crate::model::{Credentials, GenerationParams, StreamRequest};

/// Upstream providers that speak the same streaming chat protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    Ernie,
    Qwen,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Ernie, ProviderKind::Qwen];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Ernie => "ernie",
            Self::Qwen => "qwen",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Ernie => "ernie-4.5-turbo-128k",
            Self::Qwen => "qwen-3-235b-a22b",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ProviderKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ernie" => Ok(Self::Ernie),
            "qwen" => Ok(Self::Qwen),
            other => Err(RelayError::Validation(format!("unknown provider '{other}'"))),
        }
    }
}

/// Endpoint, credentials and default model for one provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub credentials: Credentials,
    pub model: String,
}

impl ProviderProfile {
    pub fn new(kind: ProviderKind, endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            credentials: Credentials {
                api_key,
                app_id: None,
            },
            model: kind.default_model().to_string(),
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.credentials.app_id = Some(app_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Materialize a profile from config, reading the key from the named env var.
    pub fn from_cfg(kind: ProviderKind, cfg: &ProviderCfg) -> CoreResult<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            RelayError::Validation(format!(
                "provider '{kind}': environment variable {} is not set",
                cfg.api_key_env
            ))
        })?;
        let mut profile = Self::new(kind, cfg.api_url.clone(), SecretString::new(api_key.into()));
        if let Some(app_id) = cfg.app_id.as_deref().filter(|a| !a.is_empty()) {
            profile = profile.with_app_id(app_id);
        }
        if let Some(model) = cfg.model.as_deref().filter(|m| !m.is_empty()) {
            profile = profile.with_model(model);
        }
        Ok(profile)
    }

    /// The requested model, or the profile's own when `model` is blank.
    pub fn model_for<'a>(&'a self, model: Option<&'a str>) -> &'a str {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model)
    }

    /// Build the immutable per-invocation request.
    pub fn stream_request(
        &self,
        prompt: impl Into<String>,
        system_prompt: Option<String>,
        params: GenerationParams,
        model: Option<&str>,
    ) -> StreamRequest {
        let model = self.model_for(model).to_string();
        StreamRequest {
            provider: self.kind.code().to_string(),
            prompt: prompt.into(),
            system_prompt,
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
            model,
            endpoint: self.endpoint.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Profiles by provider, plus the one used when a request names none.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    profiles: BTreeMap<ProviderKind, ProviderProfile>,
    default: ProviderKind,
}

impl ProviderRegistry {
    pub fn new(default: ProviderProfile) -> Self {
        let kind = default.kind;
        let mut profiles = BTreeMap::new();
        profiles.insert(kind, default);
        Self {
            profiles,
            default: kind,
        }
    }

    pub fn with_profile(mut self, profile: ProviderProfile) -> Self {
        self.profiles.insert(profile.kind, profile);
        self
    }

    /// Build from configuration. Providers whose key is missing are skipped with a
    /// warning; the configured default must load.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let default_kind: ProviderKind = cfg.default_provider.parse()?;
        let mut profiles = BTreeMap::new();
        for kind in ProviderKind::ALL {
            let section = match kind {
                ProviderKind::Ernie => cfg.providers.ernie.as_ref(),
                ProviderKind::Qwen => cfg.providers.qwen.as_ref(),
            };
            let Some(section) = section else { continue };
            match ProviderProfile::from_cfg(kind, section) {
                Ok(p) => {
                    profiles.insert(kind, p);
                }
                Err(e) if kind == default_kind => return Err(e),
                Err(e) => tracing::warn!(provider = %kind, error = %e, "provider disabled"),
            }
        }
        if !profiles.contains_key(&default_kind) {
            return Err(RelayError::Validation(format!(
                "default provider '{default_kind}' is not configured"
            )));
        }
        Ok(Self {
            profiles,
            default: default_kind,
        })
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        self.profiles.keys().copied().collect()
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderProfile> {
        self.profiles.get(&kind)
    }

    /// Resolve an optional provider code. Absent, unknown, or unconfigured codes
    /// resolve to the default profile.
    pub fn resolve(&self, code: Option<&str>) -> &ProviderProfile {
        code.and_then(|c| c.parse::<ProviderKind>().ok())
            .and_then(|k| self.profiles.get(&k))
            .unwrap_or_else(|| &self.profiles[&self.default])
    }
}
