//! Object locations and the store registry
//!
//! Trigger paths look like `s3://archive/logs/2024` or `archive/logs/2024`:
//! an optional scheme, a location naming a registered store, and a key
//! prefix inside that store.

use crate::error::{Error, ParameterError, Result};
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUri {
    pub scheme: Option<String>,
    pub location: String,
    pub prefix: Path,
}

impl ObjectUri {
    /// Scheme reported as `sourceType` on migration messages
    #[must_use]
    pub fn source_type(&self) -> &str {
        self.scheme.as_deref().unwrap_or("object")
    }

    /// Key below `prefix` built from already-rewritten segments.
    ///
    /// Segments are taken verbatim: listed keys are valid paths already, and
    /// re-encoding them would rename objects whose keys contain `%` or `#`.
    pub fn join(&self, segments: &[String]) -> Result<Path> {
        let joined = segments.join("/");
        let relative =
            Path::parse(&joined).map_err(|e| Error::rewrite(joined.as_str(), e.to_string()))?;
        Ok(self.prefix.parts().chain(relative.parts()).collect())
    }
}

impl FromStr for ObjectUri {
    type Err = ParameterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, s),
        };
        let (location, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if location.is_empty() {
            return Err(ParameterError::invalid(
                "path",
                format!("'{s}' does not name a location"),
            ));
        }
        let prefix = Path::parse(prefix.trim_end_matches('/'))
            .map_err(|e| ParameterError::invalid("path", format!("'{s}': {e}")))?;
        Ok(ObjectUri {
            scheme,
            location: location.to_string(),
            prefix,
        })
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        write!(f, "{}", self.location)?;
        if !self.prefix.as_ref().is_empty() {
            write!(f, "/{}", self.prefix)?;
        }
        Ok(())
    }
}

/// Named object stores that trigger and message locations resolve against
#[derive(Clone, Default)]
pub struct ObjectStores {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStores {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, location: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.insert(location, store);
        self
    }

    pub fn insert(&mut self, location: impl Into<String>, store: Arc<dyn ObjectStore>) {
        let _ = self.stores.insert(location.into(), store);
    }

    pub fn get(&self, location: &str) -> Result<Arc<dyn ObjectStore>> {
        self.stores
            .get(location)
            .cloned()
            .ok_or_else(|| Error::UnknownLocation(location.to_string()))
    }

    pub fn locations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Store connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `file:///path`, `memory://` or `s3://bucket/prefix`
    pub url: String,

    /// AWS region (for S3)
    #[serde(default)]
    pub region: String,

    /// Custom S3 endpoint (for MinIO, R2, etc.)
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Key prefix inside the store: the path of an `s3://` URL, empty otherwise
    pub fn prefix(&self) -> Result<Path> {
        let url = self.parse_url()?;
        if url.scheme() == "s3" {
            Path::parse(url.path().trim_matches('/'))
                .map_err(|e| Error::Configuration(format!("bad S3 prefix in {}: {e}", self.url)))
        } else {
            Ok(Path::default())
        }
    }

    fn parse_url(&self) -> Result<Url> {
        if self.url.starts_with('/') {
            return Url::from_file_path(&self.url)
                .map_err(|()| Error::Configuration(format!("bad local path {}", self.url)));
        }
        Url::parse(&self.url)
            .map_err(|e| Error::Configuration(format!("bad store URL {}: {e}", self.url)))
    }
}

/// Build the object store a `StoreConfig` describes
pub fn build_object_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let url = config.parse_url()?;
    match url.scheme() {
        "s3" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| Error::Configuration(format!("no bucket in {}", config.url)))?;
            let mut builder =
                object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
            if !config.region.is_empty() {
                builder = builder.with_region(&config.region);
            }
            if !config.access_key.is_empty() {
                builder = builder.with_access_key_id(&config.access_key);
            }
            if !config.secret_key.is_empty() {
                builder = builder.with_secret_access_key(&config.secret_key);
            }
            if !config.endpoint.is_empty() {
                builder = builder.with_endpoint(&config.endpoint);
            }
            let store = builder
                .build()
                .map_err(|e| Error::Configuration(format!("Failed to build S3 store: {e}")))?;
            Ok(Arc::new(store))
        }
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| Error::Configuration(format!("bad local path {}", config.url)))?;
            std::fs::create_dir_all(&path)?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(&path)
                .map_err(|e| Error::Configuration(format!("Failed to build local store: {e}")))?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        other => Err(Error::Configuration(format!(
            "unsupported store scheme '{other}' in {}",
            config.url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_uri() {
        let uri: ObjectUri = "s3://archive/logs/2024/".parse().unwrap();
        assert_eq!(uri.scheme.as_deref(), Some("s3"));
        assert_eq!(uri.location, "archive");
        assert_eq!(uri.prefix.as_ref(), "logs/2024");
        assert_eq!(uri.source_type(), "s3");
        assert_eq!(uri.to_string(), "s3://archive/logs/2024");

        let bare: ObjectUri = "archive".parse().unwrap();
        assert_eq!(bare.scheme, None);
        assert_eq!(bare.prefix.as_ref(), "");
        assert_eq!(bare.source_type(), "object");

        assert!("s3:///logs".parse::<ObjectUri>().is_err());
        assert!("".parse::<ObjectUri>().is_err());
    }

    #[test]
    fn test_join_splits_rewritten_segments() {
        let uri: ObjectUri = "dst/out".parse().unwrap();
        let key = uri
            .join(&["year=2024/month=01".to_string(), "f.csv".to_string()])
            .unwrap();
        assert_eq!(key.as_ref(), "out/year=2024/month=01/f.csv");

        let root: ObjectUri = "dst".parse().unwrap();
        assert_eq!(root.join(&["f.csv".to_string()]).unwrap().as_ref(), "f.csv");
    }

    #[test]
    fn test_join_keeps_listed_segments_verbatim() {
        let uri: ObjectUri = "dst/out".parse().unwrap();
        let key = uri
            .join(&["report%202024.csv".to_string()])
            .unwrap();
        assert_eq!(key.as_ref(), "out/report%202024.csv");
        let key = uri.join(&["a#b".to_string(), "c[1].csv".to_string()]).unwrap();
        assert_eq!(key.as_ref(), "out/a#b/c[1].csv");

        assert!(uri.join(&["a//b.csv".to_string()]).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let stores = ObjectStores::new().with("a", Arc::new(InMemory::new()));
        assert!(stores.get("a").is_ok());
        assert!(matches!(stores.get("b"), Err(Error::UnknownLocation(_))));
        assert_eq!(stores.locations(), vec!["a"]);
    }

    #[test]
    fn test_build_local_and_memory_stores() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}/archive", dir.path().display());
        let config = StoreConfig::new(url);
        assert!(build_object_store(&config).is_ok());
        assert!(dir.path().join("archive").is_dir());
        assert_eq!(config.prefix().unwrap().as_ref(), "");

        assert!(build_object_store(&StoreConfig::new("memory://")).is_ok());
        assert!(build_object_store(&StoreConfig::new("ftp://host/x")).is_err());

        let s3 = StoreConfig::new("s3://bucket/ledger/prod");
        assert_eq!(s3.prefix().unwrap().as_ref(), "ledger/prod");
    }
}
