use sms_cdac::{CdacClient, CdacParser};
use sms_core::{SmsError, VendorRegistry};
use sms_nic::{NicClient, NicParser};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::ProvidersConfig;

/// Build a [`VendorRegistry`] holding every gateway that has credentials configured.
pub fn build_registry(
    providers: &ProvidersConfig,
    timeout: Duration,
) -> Result<VendorRegistry, SmsError> {
    let mut registry = VendorRegistry::new();

    if let Some(cdac) = &providers.cdac {
        let base_url = cdac
            .base_url
            .clone()
            .unwrap_or_else(|| CdacClient::DEFAULT_BASE_URL.to_string());
        let client = CdacClient::with_base_url(
            cdac.username.clone(),
            &cdac.password,
            cdac.secret_key.clone(),
            base_url,
            timeout,
        )?;
        registry = registry.with(Arc::new(client), Arc::new(CdacParser));
    }

    if let Some(nic) = &providers.nic {
        let base_url = nic
            .base_url
            .clone()
            .unwrap_or_else(|| NicClient::DEFAULT_BASE_URL.to_string());
        let client = NicClient::with_base_url(
            nic.username.clone(),
            nic.pin.clone(),
            nic.entity_id.clone(),
            base_url,
            timeout,
        )?;
        registry = registry.with(Arc::new(client), Arc::new(NicParser));
    }

    info!(gateways = ?registry.gateways(), "vendor registry built");
    Ok(registry)
}
