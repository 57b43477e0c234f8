//! Object-store client construction (see SPEC_FULL.md §9 "ambient process-wide session")
//!
//! The original treats the S3 client as a module-level singleton built from
//! the global config at import time. Per the spec's own design note, this
//! threads an explicit handle through constructors instead.

use crate::config::Config;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use tracing::debug;

/// A handle to the configured S3-compatible object store.
#[derive(Clone)]
pub struct ObjectStore {
    pub client: Client,
    pub bucket: String,
}

impl ObjectStore {
    /// Build a client from `config`, resolving credentials via the named
    /// profile unless explicit keys are present.
    pub async fn new(config: &Config, bucket: String) -> Self {
        let profile = config.profile.as_deref().unwrap_or("default");

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).profile_name(profile);

        if config.endpoint != "aws" {
            loader = loader.endpoint_url(&config.endpoint);
        }

        if let (Some(key_id), Some(secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(key_id, secret, None, None, "zfs3backup-config");
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);

        debug!(bucket, endpoint = %config.endpoint, "object store client initialized");

        Self { client, bucket }
    }
}
