//! Gateway selection.
//!
//! The template registry is owned by the surrounding application; this module
//! only consumes it through [`TemplateRegistry`] and turns its raw answer into
//! a typed [`Route`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sms_core::{DispatchError, Gateway, MessageType, Request};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::TemplateConfig;

/// Raw registry entry for one DLT template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMapping {
    /// Gateway identifier as stored by the registry ("1", "2", ...).
    pub gateway: String,
    pub entity_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("template {0} not found")]
    NotFound(String),
    #[error("template registry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    async fn resolve(&self, template_id: &str) -> Result<TemplateMapping, RegistryError>;
}

/// In-memory registry, typically built from the `templates` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateRegistry {
    templates: HashMap<String, TemplateMapping>,
}

impl StaticTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, template_id: impl Into<String>, mapping: TemplateMapping) -> Self {
        self.templates.insert(template_id.into(), mapping);
        self
    }

    pub fn from_config(templates: &[TemplateConfig]) -> Self {
        templates.iter().fold(Self::new(), |registry, t| {
            registry.with(
                t.template_id.clone(),
                TemplateMapping {
                    gateway: t.gateway.clone(),
                    entity_id: t.entity_id.clone(),
                    sender_id: t.sender_id.clone(),
                    message_type: t.message_type,
                },
            )
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[async_trait]
impl TemplateRegistry for StaticTemplateRegistry {
    async fn resolve(&self, template_id: &str) -> Result<TemplateMapping, RegistryError> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(template_id.to_string()))
    }
}

/// Where and how a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub gateway: Gateway,
    pub entity_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
}

impl Route {
    /// Stamp the resolved gateway metadata onto `request`.
    pub fn apply(&self, request: &mut Request) {
        request.gateway = Some(self.gateway);
        request.entity_id = self.entity_id.clone();
        request.sender_id = self.sender_id.clone();
        request.message_type = self.message_type;
    }
}

#[derive(Clone)]
pub struct GatewaySelector {
    registry: Arc<dyn TemplateRegistry>,
}

impl GatewaySelector {
    pub fn new(registry: Arc<dyn TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub async fn resolve(&self, template_id: &str) -> Result<Route, DispatchError> {
        let mapping = self.registry.resolve(template_id).await.map_err(|e| {
            warn!(template_id, error = %e, "gateway resolution failed");
            DispatchError::GatewayResolution {
                template_id: template_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        let gateway: Gateway = mapping.gateway.parse()?;
        debug!(template_id, %gateway, sender_id = %mapping.sender_id, "gateway resolved");
        Ok(Route {
            gateway,
            entity_id: mapping.entity_id,
            sender_id: mapping.sender_id,
            message_type: mapping.message_type,
        })
    }
}
