use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::config::{Credentials, Region};
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client;
use tracing::{debug, info};

use super::secrets::SecretStore;
use crate::auth::token::TokenPair;
use crate::config::AwsSecretSettings;
use crate::utils::error::{StoreError, StoreResult};

/// Token pair kept as a JSON record in AWS Secrets Manager.
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: Client,
    secret_name: String,
    region: String,
}

impl AwsSecretStore {
    /// Static credentials are used when both key parts are configured,
    /// otherwise the SDK's default provider chain.
    pub async fn connect(settings: &AwsSecretSettings) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(settings.region.clone()));

        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            debug!("[SecretStore] Using static AWS credentials from the environment");
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                settings.session_token.clone(),
                None,
                "sfauth-env",
            ));
        }

        let sdk_config = loader.load().await;
        info!(secret = %settings.secret_name, region = %settings.region, "[SecretStore] AWS Secrets Manager client ready");

        Self::with_client(Client::new(&sdk_config), &settings.secret_name, &settings.region)
    }

    pub fn with_client(client: Client, secret_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            client,
            secret_name: secret_name.into(),
            region: region.into(),
        }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    fn parse_record(secret: &str) -> StoreResult<TokenPair> {
        let mut pair: TokenPair = serde_json::from_str(secret)?;
        if pair.access_token.is_empty() {
            return Err(StoreError::Corrupt("secret has an empty accessToken".to_string()));
        }
        pair.refresh_token = pair.refresh_token.filter(|t| !t.is_empty());
        Ok(pair)
    }
}

impl SecretStore for AwsSecretStore {
    fn describe(&self) -> String {
        format!("AWS secret {} ({})", self.secret_name, self.region)
    }

    async fn load(&self) -> StoreResult<Option<TokenPair>> {
        let output = match self
            .client
            .get_secret_value()
            .secret_id(&self.secret_name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    debug!(secret = %self.secret_name, "[SecretStore] Secret does not exist yet");
                    return Ok(None);
                }
                return Err(StoreError::Backend(DisplayErrorContext(&err).to_string()));
            }
        };

        match output.secret_string().map(str::trim) {
            Some(secret) if !secret.is_empty() => Self::parse_record(secret).map(Some),
            _ => Ok(None),
        }
    }

    async fn save(&self, tokens: &TokenPair) -> StoreResult<()> {
        let record = serde_json::to_string(tokens)?;

        let err = match self
            .client
            .put_secret_value()
            .secret_id(&self.secret_name)
            .secret_string(record.clone())
            .send()
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        if !err
            .as_service_error()
            .is_some_and(|e| e.is_resource_not_found_exception())
        {
            return Err(StoreError::Backend(DisplayErrorContext(&err).to_string()));
        }

        info!(secret = %self.secret_name, "[SecretStore] Secret does not exist yet, creating it");
        self.client
            .create_secret()
            .name(&self.secret_name)
            .secret_string(record)
            .send()
            .await
            .map_err(|e| StoreError::Backend(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
