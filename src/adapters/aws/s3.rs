use crate::domain::metadata::Metadata;
use crate::ports::storage::{ListPage, ObjectStore, StorageError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;

fn backend<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Backend(DisplayErrorContext(err).to_string())
}

/// S3ObjectStore implements ObjectStore for S3 and S3-compatible services
/// such as Cloudflare R2.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the ambient AWS credential chain. A custom
    /// endpoint switches to path-style addressing, which R2 and MinIO expect.
    pub async fn connect(bucket: String, endpoint_url: Option<String>, region: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let Some(endpoint) = &endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint_url.is_some())
            .build();
        Self::new(Client::from_conf(s3_config), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata.into_iter().collect::<HashMap<_, _>>()))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(backend(service));
            }
        };
        let body = resp.body.collect().await.map_err(backend)?;
        Ok(body.into_bytes())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(backend(service))
                }
            }
        }
    }

    async fn list(
        &self,
        prefix: &str,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(limit.min(1000) as i32)
            .set_continuation_token(cursor)
            .send()
            .await
            .map_err(backend)?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let truncated = resp.is_truncated().unwrap_or(false);
        Ok(ListPage {
            keys,
            cursor: resp
                .next_continuation_token()
                .filter(|_| truncated)
                .map(str::to_string),
            truncated,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3:{}", self.bucket)
    }
}
