//! Azure Blob Storage client construction.

use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use tracing::{debug, info};

use crate::{Error, Result};

/// Well-known Azurite development account.
pub const AZURITE_ACCOUNT: &str = "devstoreaccount1";

/// Well-known Azurite development key.
pub const AZURITE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Azure Blob Storage backend configuration
#[derive(Debug, Clone, Default)]
pub struct AzureConfig {
    /// Azure storage account name
    pub account_name: String,
    /// Azure blob container name
    pub container_name: String,
    /// Storage account key
    pub account_key: Option<String>,
    /// SAS token for shared access signature authentication
    pub sas_token: Option<String>,
    /// Key prefix for all operations
    pub prefix: Option<String>,
    /// Custom endpoint URL for sovereign clouds (Azure Government, Azure China)
    pub endpoint: Option<String>,
    /// Talk to a local Azurite emulator
    pub use_emulator: bool,
}

impl AzureConfig {
    /// Configuration pointing at a local Azurite instance.
    pub fn emulator(container_name: impl Into<String>) -> Self {
        Self {
            account_name: AZURITE_ACCOUNT.to_string(),
            container_name: container_name.into(),
            account_key: Some(AZURITE_KEY.to_string()),
            use_emulator: true,
            ..Default::default()
        }
    }
}

/// Build an Azure client from configuration.
///
/// A SAS token (`AZURE_STORAGE_SAS_TOKEN`) takes precedence over the
/// account key (`AZURE_STORAGE_ACCOUNT_KEY`). One of the two is required.
pub(crate) fn build_client(config: &AzureConfig) -> Result<MicrosoftAzure> {
    let mut builder = MicrosoftAzureBuilder::new()
        .with_account(&config.account_name)
        .with_container_name(&config.container_name);

    if config.use_emulator {
        builder = builder.with_use_emulator(true).with_allow_http(true);
    }

    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint.clone());
    }

    if let Some(sas_token) = &config.sas_token {
        builder = builder.with_sas_authorization(parse_sas_token(sas_token));
        debug!("Azure authentication: SAS token");
    } else if let Some(key) = &config.account_key {
        builder = builder.with_access_key(key);
        debug!("Azure authentication: Account key");
    } else {
        return Err(Error::Config(format!(
            "Azure account {} needs an account key or SAS token",
            config.account_name
        )));
    }

    let store = builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create Azure client: {}", e)))?;

    info!(
        "Created Azure client for account: {}, container: {}, prefix: {:?}, emulator: {}",
        config.account_name, config.container_name, config.prefix, config.use_emulator
    );

    Ok(store)
}

/// Split a SAS query string into key-value pairs.
fn parse_sas_token(sas_token: &str) -> Vec<(String, String)> {
    sas_token
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(k), Some(v)) => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sas_token() {
        let pairs = parse_sas_token("?sv=2022-11-02&ss=b&sig=abc%3D");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], ("sv".to_string(), "2022-11-02".to_string()));
        assert_eq!(pairs[2], ("sig".to_string(), "abc%3D".to_string()));
    }

    #[test]
    fn test_emulator_config() {
        let config = AzureConfig::emulator("documents");
        assert_eq!(config.account_name, AZURITE_ACCOUNT);
        assert!(config.use_emulator);
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn test_missing_credential_is_config_error() {
        let config = AzureConfig {
            account_name: "docvault".to_string(),
            container_name: "documents".to_string(),
            ..Default::default()
        };
        let err = build_client(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("account key or SAS token"));

        let config = AzureConfig {
            sas_token: Some("?sv=2022-11-02&sig=abc".to_string()),
            ..config
        };
        assert!(build_client(&config).is_ok());
    }
}
