// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

//! Where CloudFront log objects are listed, read and deleted.
//!
//! CloudFront writes standard logs as `<DISTRIBUTION>.YYYY-MM-DD-HH.<id>.gz`,
//! optionally below a key prefix. Each object is one [`SourceUnit`].

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::constants::LOG_FILE_EXTENSION;
use crate::decode::{decode_log_file, DecodeError};
use crate::record::{LogRecord, SourceUnit};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: DecodeError,
    },
}

/// Selection applied when listing pending units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub max_units: usize,
    /// Only these distributions, when set.
    pub distributions: Option<BTreeSet<String>>,
    /// Only units last modified strictly before this UTC date.
    pub before: Option<NaiveDate>,
}

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn list_pending(&self, filter: &ListFilter) -> Result<Vec<SourceUnit>, SourceError>;
    async fn fetch_records(&self, unit: &SourceUnit) -> Result<Vec<LogRecord>, SourceError>;
    async fn delete(&self, units: &[SourceUnit]) -> Result<(), SourceError>;
}

/// Builds the store named by `config`. S3 key prefixes are applied with a
/// [`PrefixStore`] so unit keys stay relative to the prefix.
pub fn build_object_store(config: &SourceConfig) -> Result<Arc<dyn ObjectStore>, SourceError> {
    match config {
        SourceConfig::S3 {
            bucket,
            access_key_id,
            secret_access_key,
            region,
            prefix,
        } => {
            use object_store::aws::AmazonS3Builder;

            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(access_key_id) = access_key_id {
                builder = builder.with_access_key_id(access_key_id);
            }
            if let Some(secret_access_key) = secret_access_key {
                builder = builder.with_secret_access_key(secret_access_key);
            }
            if let Some(region) = region {
                builder = builder.with_region(region);
            }
            let store = builder.build()?;

            let Some(prefix) = prefix else {
                return Ok(Arc::new(store));
            };
            Ok(Arc::new(PrefixStore::new(store, prefix.as_str())))
        }
        SourceConfig::Local { dir } => Ok(Arc::new(LocalFileSystem::new_with_prefix(dir)?)),
    }
}

/// Derives the distribution id from a log object key.
///
/// Returns `None` for keys that do not look like CloudFront standard logs.
pub fn distribution_from_key(key: &str) -> Option<&str> {
    let file_name = key.rsplit('/').next()?;
    let stem = file_name.strip_suffix(LOG_FILE_EXTENSION)?;
    let (distribution, rest) = stem.split_once('.')?;
    if distribution.is_empty() || rest.is_empty() {
        return None;
    }
    Some(distribution)
}

pub struct ObjectStoreSource {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreSource {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ObjectStoreSource { store }
    }
}

#[async_trait]
impl SourceStore for ObjectStoreSource {
    async fn list_pending(&self, filter: &ListFilter) -> Result<Vec<SourceUnit>, SourceError> {
        let objects: Vec<_> = self.store.list(None).try_collect().await?;

        let mut units: Vec<SourceUnit> = objects
            .into_iter()
            .filter_map(|meta| {
                let key = meta.location.to_string();
                if !key.ends_with(LOG_FILE_EXTENSION) {
                    return None;
                }
                let Some(distribution) = distribution_from_key(&key).map(str::to_string) else {
                    warn!("Skipping {key}: no distribution in file name");
                    return None;
                };
                Some(SourceUnit::new(key, distribution, meta.last_modified))
            })
            .filter(|unit| match &filter.distributions {
                Some(allowed) => allowed.contains(&unit.distribution),
                None => true,
            })
            .filter(|unit| match filter.before {
                Some(before) => unit.last_modified.date_naive() < before,
                None => true,
            })
            .collect();

        units.sort();
        units.truncate(filter.max_units);
        debug!("Listed {} pending log files", units.len());
        Ok(units)
    }

    async fn fetch_records(&self, unit: &SourceUnit) -> Result<Vec<LogRecord>, SourceError> {
        let bytes = self
            .store
            .get(&Path::from(unit.key.as_str()))
            .await?
            .bytes()
            .await?;
        decode_log_file(&bytes, &unit.distribution).map_err(|source| SourceError::Decode {
            key: unit.key.clone(),
            source,
        })
    }

    async fn delete(&self, units: &[SourceUnit]) -> Result<(), SourceError> {
        for unit in units {
            self.store.delete(&Path::from(unit.key.as_str())).await?;
            debug!("Deleted {unit}");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::decode::tests::{gzip, SAMPLE_LOG};
    use chrono::{Duration, Utc};
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    async fn put(store: &InMemory, key: &str, content: Vec<u8>) {
        store
            .put(&Path::from(key), PutPayload::from(content))
            .await
            .unwrap();
    }

    async fn seeded_store() -> Arc<InMemory> {
        let store = Arc::new(InMemory::new());
        put(&store, "E2B.2024-01-01-10.bbb.gz", gzip(SAMPLE_LOG)).await;
        put(&store, "E1A.2024-01-01-10.aaa.gz", gzip(SAMPLE_LOG)).await;
        put(&store, "E1A.2024-01-01-11.ccc.gz", gzip(SAMPLE_LOG)).await;
        put(&store, "README.txt", b"not a log".to_vec()).await;
        store
    }

    fn filter(max_units: usize) -> ListFilter {
        ListFilter {
            max_units,
            ..Default::default()
        }
    }

    fn keys(units: &[SourceUnit]) -> Vec<&str> {
        units.iter().map(|u| u.key.as_str()).collect()
    }

    #[test]
    fn test_distribution_from_key() {
        assert_eq!(
            distribution_from_key("E2DIST.2024-01-01-10.abcd1234.gz"),
            Some("E2DIST")
        );
        assert_eq!(
            distribution_from_key("logs/cf/E2DIST.2024-01-01-10.abcd1234.gz"),
            Some("E2DIST")
        );
        assert_eq!(distribution_from_key("E2DIST.gz"), None);
        assert_eq!(distribution_from_key(".2024-01-01-10.x.gz"), None);
        assert_eq!(distribution_from_key("E2DIST.2024-01-01-10.x.log"), None);
    }

    #[tokio::test]
    async fn test_list_sorts_by_key_and_skips_non_logs() {
        let source = ObjectStoreSource::new(seeded_store().await);

        let units = source.list_pending(&filter(10)).await.unwrap();

        assert_eq!(
            keys(&units),
            vec![
                "E1A.2024-01-01-10.aaa.gz",
                "E1A.2024-01-01-11.ccc.gz",
                "E2B.2024-01-01-10.bbb.gz"
            ]
        );
        assert_eq!(units[2].distribution, "E2B");
    }

    #[tokio::test]
    async fn test_list_truncates_to_max_units() {
        let source = ObjectStoreSource::new(seeded_store().await);

        let units = source.list_pending(&filter(2)).await.unwrap();

        assert_eq!(
            keys(&units),
            vec!["E1A.2024-01-01-10.aaa.gz", "E1A.2024-01-01-11.ccc.gz"]
        );
    }

    #[tokio::test]
    async fn test_list_applies_distribution_allow_list() {
        let source = ObjectStoreSource::new(seeded_store().await);
        let filter = ListFilter {
            max_units: 10,
            distributions: Some(BTreeSet::from(["E2B".to_string()])),
            before: None,
        };

        let units = source.list_pending(&filter).await.unwrap();

        assert_eq!(keys(&units), vec!["E2B.2024-01-01-10.bbb.gz"]);
    }

    #[tokio::test]
    async fn test_list_stops_before_today() {
        let source = ObjectStoreSource::new(seeded_store().await);
        let today = Utc::now().date_naive();

        let before_today = ListFilter {
            max_units: 10,
            before: Some(today),
            ..Default::default()
        };
        assert!(source.list_pending(&before_today).await.unwrap().is_empty());

        let before_tomorrow = ListFilter {
            max_units: 10,
            before: Some(today + Duration::days(1)),
            ..Default::default()
        };
        assert_eq!(source.list_pending(&before_tomorrow).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_decodes_records() {
        let source = ObjectStoreSource::new(seeded_store().await);
        let units = source.list_pending(&filter(1)).await.unwrap();

        let records = source.fetch_records(&units[0]).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.distribution() == "E1A"));
    }

    #[tokio::test]
    async fn test_fetch_reports_undecodable_unit() {
        let store = Arc::new(InMemory::new());
        put(&store, "E1A.2024-01-01-10.bad.gz", b"plain text".to_vec()).await;
        let source = ObjectStoreSource::new(store);
        let units = source.list_pending(&filter(1)).await.unwrap();

        let err = source.fetch_records(&units[0]).await.unwrap_err();

        match err {
            SourceError::Decode { key, .. } => assert_eq!(key, "E1A.2024-01-01-10.bad.gz"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_removes_objects() {
        let store = seeded_store().await;
        let source = ObjectStoreSource::new(store.clone());
        let units = source.list_pending(&filter(2)).await.unwrap();

        source.delete(&units).await.unwrap();

        let remaining = source.list_pending(&filter(10)).await.unwrap();
        assert_eq!(keys(&remaining), vec!["E2B.2024-01-01-10.bbb.gz"]);
    }

    #[tokio::test]
    async fn test_local_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2024");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("E1A.2024-01-01-10.aaa.gz"), gzip(SAMPLE_LOG)).unwrap();

        let store = build_object_store(&SourceConfig::Local {
            dir: dir.path().to_path_buf(),
        })
        .unwrap();
        let source = ObjectStoreSource::new(store);

        let units = source.list_pending(&filter(10)).await.unwrap();
        assert_eq!(keys(&units), vec!["2024/E1A.2024-01-01-10.aaa.gz"]);

        let records = source.fetch_records(&units[0]).await.unwrap();
        assert_eq!(records.len(), 2);

        source.delete(&units).await.unwrap();
        assert!(!nested.join("E1A.2024-01-01-10.aaa.gz").exists());
    }
}
