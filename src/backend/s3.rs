//! S3 [`Backend`], adapted from the teacher's `S3CloudStorage`
//! (`cloud_storage.rs`): same `aws-sdk-s3`/`aws-config` stack, restructured
//! around the `Backend` trait's `(path, version)` addressing instead of
//! bae's chunk-id keying.

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use tokio::fs;
use tokio::sync::OnceCell;

use super::{Backend, BackendError};

/// Connection details for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
}

pub struct S3Backend {
    bucket: String,
    prefix: String,
    client: OnceCell<Client>,
    config: Option<S3Config>,
}

impl S3Backend {
    /// Build a backend that resolves a bucket/credentials from `AWS_*`
    /// environment variables lazily, the first time a call is made. `host`
    /// is the bucket name, `repository_name` namespaces keys within it.
    pub fn new_lazy(host: String, repository_name: String) -> Self {
        S3Backend {
            bucket: host,
            prefix: repository_name,
            client: OnceCell::new(),
            config: None,
        }
    }

    pub fn with_config(config: S3Config, repository_name: String) -> Self {
        S3Backend {
            bucket: config.bucket.clone(),
            prefix: repository_name,
            client: OnceCell::new(),
            config: Some(config),
        }
    }

    async fn client(&self) -> Result<&Client, BackendError> {
        self.client
            .get_or_try_init(|| async {
                let mut builder = aws_config::defaults(BehaviorVersion::latest());
                if let Some(cfg) = &self.config {
                    builder = builder.region(Region::new(cfg.region.clone()));
                    let credentials = aws_credential_types::Credentials::new(
                        cfg.access_key_id.clone(),
                        cfg.secret_access_key.clone(),
                        None,
                        None,
                        "audbase-s3-config",
                    );
                    builder = builder.credentials_provider(credentials);
                    if let Some(endpoint) = &cfg.endpoint_url {
                        builder = builder.endpoint_url(endpoint.clone());
                    }
                }
                let aws_config = builder.load().await;
                Ok::<Client, BackendError>(Client::new(&aws_config))
            })
            .await
    }

    fn key(&self, path: &str, version: &str) -> String {
        format!("{}/{}/{}", self.prefix, path, version)
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn exists(&self, path: &str, version: &str) -> Result<bool, BackendError> {
        let client = self.client().await?;
        let result = client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path, version))
            .send()
            .await;
        Ok(result.is_ok())
    }

    async fn ls(&self, path: &str) -> Result<Vec<(String, String)>, BackendError> {
        let client = self.client().await?;
        let prefix = format!("{}/{}/", self.prefix, path);
        let mut results = Vec::new();
        let mut continuation = None;
        loop {
            let mut req = client.list_objects_v2().bucket(&self.bucket).prefix(&prefix);
            if let Some(token) = continuation.clone() {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    if let Some(rest) = key.strip_prefix(&format!("{}/", self.prefix)) {
                        if let Some((logical, version)) = rest.rsplit_once('/') {
                            results.push((logical.to_string(), version.to_string()));
                        }
                    }
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(results)
    }

    async fn versions(&self, path: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .ls(path)
            .await?
            .into_iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v)
            .collect())
    }

    async fn get_file(&self, remote: &str, local: &Path, version: &str) -> Result<(), BackendError> {
        let client = self.client().await?;
        let resp = client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(remote, version))
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?
            .into_bytes();
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(local, &data).await?;
        Ok(())
    }

    async fn put_file(&self, local: &Path, remote: &str, version: &str) -> Result<(), BackendError> {
        let client = self.client().await?;
        let data = fs::read(local).await?;
        client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(remote, version))
            .body(data.into())
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn remove_file(&self, remote: &str, version: &str) -> Result<(), BackendError> {
        let client = self.client().await?;
        client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(remote, version))
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(())
    }
}
