//! Pack catalog client
//!
//! The catalog is a static directory of JSON documents: `index.json` lists
//! pack ids and `<id>.json` describes one pack. Fetches retry with a capped
//! exponential backoff and give up with [`DownloadError::ManifestFetch`]
//! once the attempt budget is spent.

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};
use url::Url;

use crate::downloader::config::DownloadConfig;
use crate::downloader::core::error::{DownloadError, Result};
use crate::manifest::PackData;

/// Client for a pack catalog
pub struct Catalog {
    client: Client,
    base: Url,
    attempts: usize,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl Catalog {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut base = config.catalog_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| DownloadError::InvalidUrl {
            url: config.catalog_url.clone(),
            suggestion: "Catalog URL must be an absolute http(s) URL".to_string(),
            source: e,
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DownloadError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
            })?;

        Ok(Self {
            client,
            base,
            attempts: config.catalog_attempts.max(1),
            retry_delay: config.retry_delay,
            max_retry_delay: config.max_retry_delay,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Ids of every pack in the catalog
    pub async fn fetch_index(&self) -> Result<Vec<String>> {
        let url = self.document_url("index.json")?;
        self.fetch_json(url).await
    }

    /// One pack document; its `id` is set to `id`
    pub async fn fetch_pack(&self, id: &str) -> Result<PackData> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(DownloadError::Configuration {
                message: format!("invalid pack id '{}'", id),
                field: Some("pack".to_string()),
            });
        }

        let url = self.document_url(&format!("{}.json", id))?;
        let mut pack: PackData = self.fetch_json(url).await?;
        pack.id = id.to_string();
        Ok(pack)
    }

    /// Every pack in the catalog, in index order
    ///
    /// Packs that cannot be loaded are logged and left out.
    pub async fn fetch_all(&self) -> Result<Vec<PackData>> {
        let ids = self.fetch_index().await?;
        let results = futures::future::join_all(ids.iter().map(|id| self.fetch_pack(id))).await;

        let mut packs = Vec::with_capacity(results.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(pack) => packs.push(pack),
                Err(e) => warn!("Skipping pack {}: {}", id, e),
            }
        }
        info!("Loaded {} of {} packs", packs.len(), ids.len());
        Ok(packs)
    }

    fn document_url(&self, name: &str) -> Result<Url> {
        self.base.join(name).map_err(|e| DownloadError::InvalidUrl {
            url: format!("{}{}", self.base, name),
            suggestion: "Check the catalog URL".to_string(),
            source: e,
        })
    }

    /// Delays between attempts: `retry_delay`, doubled each time, capped
    fn backoff(&self) -> std::iter::Take<ExponentialBackoff> {
        let factor = (self.retry_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_retry_delay)
            .take(self.attempts - 1)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("Fetching {}", url);

        let action = || {
            let request = self.client.get(url.clone());
            async move {
                let response = request.send().await?.error_for_status()?;
                response.json::<T>().await
            }
        };
        // A document that arrives but does not parse will not parse next time either
        let retryable = |e: &reqwest::Error| {
            let retry = !e.is_decode();
            if retry {
                debug!("Catalog request failed, retrying: {}", e);
            }
            retry
        };

        RetryIf::start(self.backoff(), action, retryable)
            .await
            .map_err(|e| DownloadError::ManifestFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> DownloadConfig {
        let mut config = DownloadConfig::default()
            .with_catalog_url(format!("{}/packs", server.uri()))
            .with_retry_delay(Duration::from_millis(2));
        config.catalog_attempts = 3;
        config
    }

    const PACK: &str = r#"{
        "name": "Red Pack",
        "description": "Tech and magic",
        "version": { "minecraft": "1.12.2", "forge": "14.23.5.2847" },
        "mods": {
            "jei": { "name": "JEI", "url": "https://example.com/jei.jar", "target": "both" }
        }
    }"#;

    #[tokio::test]
    async fn fetches_index_and_packs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packs/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"["redpack"]"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/packs/redpack.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PACK))
            .mount(&server)
            .await;

        let catalog = Catalog::new(&config(&server)).unwrap();
        assert_eq!(catalog.fetch_index().await.unwrap(), vec!["redpack".to_string()]);

        let packs = catalog.fetch_all().await.unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].id, "redpack");
        assert_eq!(packs[0].mods[0].id, "jei");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packs/index.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/packs/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"["a","b"]"#))
            .mount(&server)
            .await;

        let catalog = Catalog::new(&config(&server)).unwrap();
        assert_eq!(catalog.fetch_index().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packs/index.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let catalog = Catalog::new(&config(&server)).unwrap();
        let err = catalog.fetch_index().await.unwrap_err();
        assert!(matches!(err, DownloadError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn malformed_documents_fail_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packs/broken.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
            .expect(1)
            .mount(&server)
            .await;

        let catalog = Catalog::new(&config(&server)).unwrap();
        let err = catalog.fetch_pack("broken").await.unwrap_err();
        assert!(matches!(err, DownloadError::ManifestFetch { .. }));
    }

    #[tokio::test]
    async fn pack_ids_cannot_escape_the_catalog() {
        let server = MockServer::start().await;
        let catalog = Catalog::new(&config(&server)).unwrap();
        assert!(matches!(
            catalog.fetch_pack("../secret").await,
            Err(DownloadError::Configuration { .. })
        ));
    }
}
