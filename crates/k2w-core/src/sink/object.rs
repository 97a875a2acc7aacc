//! Object store sink: one event, one JSON file.
//!
//! Each event becomes a discrete object at its partitioned key - no
//! read-modify-write and no appends, so concurrent workers never contend on
//! an object. If two events land on the same microsecond key the later
//! write overwrites, which the store treats as a plain put.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ObjectStoreConfig;
use crate::error::{Error, Result, WriteError};
use crate::event::Event;
use crate::path;

/// Writes events as partitioned JSON objects.
pub struct ObjectSink {
    store: Arc<dyn ObjectStore>,
    /// Configured base path, for log lines and full URLs
    base_path: String,
    /// Key prefix inside the store (path after the bucket, possibly empty)
    prefix: String,
}

impl ObjectSink {
    /// Build the sink from configuration, selecting the backend from the
    /// base path scheme: `s3://`, `gs://`, or a local directory.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let base_path = config.base_path.trim_end_matches('/').to_string();

        let (store, prefix) = if base_path.starts_with("s3://") {
            Self::create_s3_store(config)?
        } else if base_path.starts_with("gs://") {
            Self::create_gcs_store(config)?
        } else {
            Self::create_local_store(config)?
        };

        info!(base_path = %base_path, "Object sink ready");

        Ok(Self {
            store,
            base_path,
            prefix,
        })
    }

    fn create_s3_store(config: &ObjectStoreConfig) -> Result<(Arc<dyn ObjectStore>, String)> {
        use object_store::aws::AmazonS3Builder;

        let (bucket, prefix) = split_bucket_url(&config.base_path, "s3://")?;

        let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);

        if let Some(ref region) = config.aws_region {
            builder = builder.with_region(region);
        }
        if let Some(ref access_key) = config.aws_access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(ref secret_key) = config.aws_secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(ref endpoint) = config.s3_endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid S3 configuration: {}", e)))?;

        Ok((Arc::new(store), prefix))
    }

    fn create_gcs_store(config: &ObjectStoreConfig) -> Result<(Arc<dyn ObjectStore>, String)> {
        use object_store::gcp::GoogleCloudStorageBuilder;

        let (bucket, prefix) = split_bucket_url(&config.base_path, "gs://")?;

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);

        if let Some(ref path) = config.gcs_service_account_path {
            builder = builder.with_service_account_path(path.to_string_lossy().as_ref());
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid GCS configuration: {}", e)))?;

        Ok((Arc::new(store), prefix))
    }

    fn create_local_store(config: &ObjectStoreConfig) -> Result<(Arc<dyn ObjectStore>, String)> {
        use object_store::local::LocalFileSystem;

        let dir = std::path::Path::new(&config.base_path);
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }

        let store = LocalFileSystem::new_with_prefix(dir)
            .map_err(|e| Error::Config(format!("Invalid local store path: {}", e)))?;

        Ok((Arc::new(store), String::new()))
    }

    /// The store-relative key for an event of the given type.
    pub fn key_for(&self, event_type: &str, at: DateTime<Utc>) -> String {
        path::partitioned_path(&self.prefix, event_type, at)
            .trim_start_matches('/')
            .to_string()
    }

    /// The full URL an event lands at, for logging.
    pub fn url_for(&self, event_type: &str, at: DateTime<Utc>) -> String {
        path::partitioned_path(&self.base_path, event_type, at)
    }

    /// Serialize the event to a single JSON document and create exactly one
    /// object at `key`.
    pub async fn write_object(&self, key: &str, event: &Event) -> std::result::Result<(), WriteError> {
        let body = event.to_json_bytes().map_err(|e| WriteError::Object {
            path: key.to_string(),
            source: object_store::Error::Generic {
                store: "serialize",
                source: Box::new(e),
            },
        })?;

        let location = ObjectPath::from(key);
        self.store
            .put(&location, PutPayload::from_bytes(Bytes::from(body)))
            .await
            .map_err(|e| WriteError::Object {
                path: key.to_string(),
                source: e,
            })?;

        debug!(key = %key, "Event object written");
        Ok(())
    }

    /// The configured base path.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

/// Split `scheme://bucket/prefix` into bucket and prefix.
fn split_bucket_url(url: &str, scheme: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix(scheme)
        .ok_or_else(|| Error::Config(format!("Base path must start with {}", scheme)))?;

    let mut parts = rest.splitn(2, '/');
    let bucket = parts
        .next()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::Config(format!("Missing bucket in {}", url)))?;
    let prefix = parts.next().unwrap_or("").trim_end_matches('/');

    Ok((bucket.to_string(), prefix.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use serde_json::json;
    use tempfile::TempDir;

    fn local_config(dir: &TempDir) -> ObjectStoreConfig {
        ObjectStoreConfig {
            base_path: dir.path().to_str().unwrap().to_string(),
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            s3_endpoint: None,
            gcs_service_account_path: None,
        }
    }

    fn stamped_event() -> Event {
        let mut e = Event::from_value(json!({
            "event_type": "order",
            "order_id": "o-1",
            "total_amount": 12.5
        }))
        .unwrap();
        e.stamp_ingestion_time(event::parse_ingestion_time("2024-03-05T14:07:22.123456Z").unwrap());
        e
    }

    #[test]
    fn test_split_bucket_url() {
        assert_eq!(
            split_bucket_url("gs://bucket", "gs://").unwrap(),
            ("bucket".to_string(), "".to_string())
        );
        assert_eq!(
            split_bucket_url("gs://bucket/raw/events/", "gs://").unwrap(),
            ("bucket".to_string(), "raw/events".to_string())
        );
        assert!(split_bucket_url("gs://", "gs://").is_err());
    }

    #[test]
    fn test_key_excludes_bucket_but_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let sink = ObjectSink::from_config(&local_config(&dir)).unwrap();
        let at = event::parse_ingestion_time("2024-03-05T14:07:22.123456Z").unwrap();

        let key = sink.key_for("order", at);
        assert_eq!(key, "order/2024/03/05/14/07/order_20240305140722123456.json");
        assert!(!key.starts_with('/'));
    }

    #[tokio::test]
    async fn test_write_object_roundtrip() {
        let dir = TempDir::new().unwrap();
        let sink = ObjectSink::from_config(&local_config(&dir)).unwrap();

        let event = stamped_event();
        let at = event.ingestion_datetime().unwrap();
        let key = sink.key_for("order", at);

        sink.write_object(&key, &event).await.unwrap();

        let written = dir
            .path()
            .join("order/2024/03/05/14/07/order_20240305140722123456.json");
        let content = std::fs::read(&written).unwrap();
        let parsed: Event = serde_json::from_slice(&content).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_write_object_same_key_overwrites() {
        let dir = TempDir::new().unwrap();
        let sink = ObjectSink::from_config(&local_config(&dir)).unwrap();

        let mut first = stamped_event();
        first.insert("status", json!("pending"));
        let mut second = stamped_event();
        second.insert("status", json!("confirmed"));

        let at = first.ingestion_datetime().unwrap();
        let key = sink.key_for("order", at);

        sink.write_object(&key, &first).await.unwrap();
        sink.write_object(&key, &second).await.unwrap();

        let content = std::fs::read(
            dir.path()
                .join("order/2024/03/05/14/07/order_20240305140722123456.json"),
        )
        .unwrap();
        let parsed: Event = serde_json::from_slice(&content).unwrap();
        assert_eq!(parsed.get("status"), Some(&json!("confirmed")));
    }

    #[tokio::test]
    async fn test_each_event_is_its_own_file() {
        let dir = TempDir::new().unwrap();
        let sink = ObjectSink::from_config(&local_config(&dir)).unwrap();

        for micros in ["100001", "100002", "100003"] {
            let mut e = stamped_event();
            e.insert(
                "ingestion_time",
                json!(format!("2024-03-05T14:07:22.{}Z", micros)),
            );
            let at = e.ingestion_datetime().unwrap();
            let key = sink.key_for("order", at);
            sink.write_object(&key, &e).await.unwrap();
        }

        let minute_dir = dir.path().join("order/2024/03/05/14/07");
        let files: Vec<_> = std::fs::read_dir(minute_dir).unwrap().collect();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_url_for_uses_configured_base() {
        let dir = TempDir::new().unwrap();
        let sink = ObjectSink::from_config(&local_config(&dir)).unwrap();
        let at = event::parse_ingestion_time("2024-03-05T14:07:22.123456Z").unwrap();

        let url = sink.url_for("order", at);
        assert!(url.starts_with(dir.path().to_str().unwrap()));
        assert!(url.ends_with("order_20240305140722123456.json"));
    }
}
