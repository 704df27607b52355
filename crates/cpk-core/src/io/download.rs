//! Pack fetching: local files are checked in place, remote archives are
//! streamed into the `.Download` cache.
//!
//! Downloads land in `<name>.part` first and are renamed once complete, so
//! the cache never holds a truncated archive under its final name. An
//! existing cache entry skips the network entirely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Fetcher;
use crate::config::Config;
use crate::error::{PackError, Result};
use crate::paths::filename_from_url;
use crate::reporter::Reporter;

/// Whether `reference` is an `http(s)` URL.
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Strip user info, query and fragment from an `http(s)` URL.
pub fn sanitize_url(raw: &str) -> Result<String> {
    let mut url =
        Url::parse(raw).map_err(|e| PackError::BadIdentifier(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PackError::BadIdentifier(format!(
            "{raw}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    let clean = url.to_string();
    if clean != raw {
        debug!(from = %raw, to = %clean, "sanitized URL");
    }
    Ok(clean)
}

/// [`Fetcher`] over `reqwest`, caching remote archives by file name.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    cache_dir: PathBuf,
    max_size: u64,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Fetcher caching into `cache_dir` with the limits from `config`.
    pub fn new(config: &Config, cache_dir: PathBuf, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(crate::USER_AGENT);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| PackError::fetch("http client", e))?;
        Ok(Self {
            client,
            cache_dir,
            max_size: config.max_file_size,
            reporter,
        })
    }

    /// Cache directory for remote archives.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn download(
        &self,
        url: &str,
        part: &Path,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PackError::fetch(url, e))?
            .error_for_status()
            .map_err(|e| PackError::fetch(url, e))?;

        let total = response.content_length();
        if total.is_some_and(|t| t > self.max_size) {
            return Err(PackError::fetch(
                url,
                format!("exceeds the {} byte limit", self.max_size),
            ));
        }
        self.reporter.fetching(label, 0, total);

        let mut file = File::create(part)
            .await
            .map_err(|e| PackError::io(format!("creating {}", part.display()), e))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(PackError::Cancelled);
            }
            let chunk = chunk.map_err(|e| PackError::fetch(url, e))?;
            downloaded += chunk.len() as u64;
            if downloaded > self.max_size {
                return Err(PackError::fetch(
                    url,
                    format!("exceeds the {} byte limit", self.max_size),
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| PackError::io(format!("writing {}", part.display()), e))?;
            self.reporter.fetching(label, downloaded, total);
        }

        file.flush()
            .await
            .map_err(|e| PackError::io(format!("writing {}", part.display()), e))?;
        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }

        if !is_remote(source) {
            let path = PathBuf::from(source);
            if path.is_file() {
                return Ok(path);
            }
            return Err(PackError::fetch(source, "file not found"));
        }

        let name = filename_from_url(source);
        if name.is_empty() {
            return Err(PackError::fetch(source, "URL has no file name"));
        }
        let dest = self.cache_dir.join(name);
        if dest.is_file() {
            debug!(url = %source, path = %dest.display(), "cache hit");
            return Ok(dest);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| PackError::io(format!("creating {}", self.cache_dir.display()), e))?;
        let part = self.cache_dir.join(format!("{name}.part"));

        info!(url = %source, "downloading");
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PackError::Cancelled),
            r = self.download(source, &part, name, cancel) => r,
        };

        match result {
            Ok(()) => {
                tokio::fs::rename(&part, &dest)
                    .await
                    .map_err(|e| PackError::io(format!("renaming {}", part.display()), e))?;
                Ok(dest)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    fn fetcher(cache: &Path) -> HttpFetcher {
        HttpFetcher::new(
            &Config::new(cache),
            cache.to_path_buf(),
            Arc::new(NullReporter),
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(
            sanitize_url("https://user:pw@vendor.com/packs/V.P.1.0.0.pack?token=1#frag").unwrap(),
            "https://vendor.com/packs/V.P.1.0.0.pack"
        );
        assert!(matches!(
            sanitize_url("ftp://vendor.com/V.P.1.0.0.pack"),
            Err(PackError::BadIdentifier(_))
        ));
        assert!(matches!(
            sanitize_url("https://"),
            Err(PackError::BadIdentifier(_))
        ));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://a.com/x.pack"));
        assert!(is_remote("HTTP://a.com/x.pack"));
        assert!(!is_remote("/tmp/x.pack"));
    }

    #[tokio::test]
    async fn test_download_then_cache_hit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/V.P.1.0.0.pack")
            .with_status(200)
            .with_body("archive bytes")
            .expect(1)
            .create_async()
            .await;

        let cache = tempfile::tempdir().unwrap();
        let fetcher = fetcher(cache.path());
        let url = format!("{}/V.P.1.0.0.pack", server.url());
        let token = CancellationToken::new();

        let first = fetcher.fetch(&url, &token).await.unwrap();
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "archive bytes");
        let second = fetcher.fetch(&url, &token).await.unwrap();
        assert_eq!(first, second);
        mock.assert_async().await;
        assert!(!cache.path().join("V.P.1.0.0.pack.part").exists());
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_failed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/V.P.1.0.0.pack")
            .with_status(404)
            .create_async()
            .await;
        let cache = tempfile::tempdir().unwrap();
        let err = fetcher(cache.path())
            .fetch(
                &format!("{}/V.P.1.0.0.pack", server.url()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::FetchFailed { .. }));
        assert!(!cache.path().join("V.P.1.0.0.pack").exists());
        assert!(!cache.path().join("V.P.1.0.0.pack.part").exists());
    }

    #[tokio::test]
    async fn test_size_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/V.P.1.0.0.pack")
            .with_body(vec![0u8; 2048])
            .create_async()
            .await;
        let cache = tempfile::tempdir().unwrap();
        let mut config = Config::new(cache.path());
        config.max_file_size = 1024;
        let fetcher =
            HttpFetcher::new(&config, cache.path().to_path_buf(), Arc::new(NullReporter)).unwrap();
        let err = fetcher
            .fetch(
                &format!("{}/V.P.1.0.0.pack", server.url()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let cache = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = fetcher(cache.path())
            .fetch("https://vendor.invalid/V.P.1.0.0.pack", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::Cancelled));
    }

    #[tokio::test]
    async fn test_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("V.P.1.0.0.pack");
        std::fs::write(&file, "x").unwrap();
        let fetcher = fetcher(dir.path());
        let token = CancellationToken::new();
        assert_eq!(
            fetcher.fetch(&file.to_string_lossy(), &token).await.unwrap(),
            file
        );
        let missing = dir.path().join("missing.pack");
        assert!(matches!(
            fetcher.fetch(&missing.to_string_lossy(), &token).await,
            Err(PackError::FetchFailed { .. })
        ));
    }
}
