//! Source definition resolved against secrets

use crate::auth::{AuthConfig, Authenticator};
use crate::clock::Clock;
use crate::config::{secrets_for, SourceConfig};
use crate::error::Result;
use crate::http::TransportConfig;
use crate::state::CredentialStore;
use crate::template::TemplateContext;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

/// A source ready to run: templates rendered, endpoint checked
#[derive(Clone)]
pub struct Source {
    config: SourceConfig,
    context: TemplateContext,
    endpoint: String,
    auth: AuthConfig,
    transport: TransportConfig,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.config.name)
            .field("endpoint", &self.endpoint)
            .field("auth", &self.auth)
            .field("resources", &self.config.resources.len())
            .finish_non_exhaustive()
    }
}

impl Source {
    /// Render a definition with its secrets
    ///
    /// `secrets` may hold a section per source name; the source's own
    /// section is used when present, the whole document otherwise.
    pub fn resolve(config: SourceConfig, secrets: &Value) -> Result<Self> {
        let context = SourceConfig::context(&secrets_for(secrets, &config.name));
        let endpoint = config.render_endpoint(&context)?;
        let auth = config.render_auth(&context)?;
        let transport = config.transport_config(&context)?;
        Ok(Self {
            config,
            context,
            endpoint,
            auth,
            transport,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Template context holding this source's secrets
    pub fn context(&self) -> &TemplateContext {
        &self.context
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport
    }

    /// Authenticator for this source
    pub fn authenticator(
        &self,
        client: Client,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Authenticator {
        Authenticator::new(self.name(), self.auth.clone(), client, credentials, clock)
    }
}
