//! Media Acquirer
//!
//! Ensures a target's installation media is present and verified at its
//! canonical path (`templates/<id>/<id>.iso`). Downloads go to a `.part` file
//! in the same directory and are renamed into place only after the transfer
//! completes, so the canonical path never holds a truncated file.
//!
//! Partial downloads are never resumed: every failed attempt deletes its
//! `.part` file before the next attempt starts.

pub mod checksum;
pub mod reachability;

pub use reachability::{UrlCheck, UrlChecker};

use crate::config::RuntimeContext;
use crate::config::WorkspaceLayout;
use crate::error::BuildError;
use crate::models::{HttpTimeouts, RetryPolicy, TargetConfig};
use crate::system::{is_cancelled, wait_cancelled, CancelSignal};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Where media bytes come from. The default implementation is HTTP(S).
pub trait MediaSource: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    /// May leave a partial file behind on failure; the caller removes it.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<u64, BuildError>>;
}

/// Streaming HTTP download with connect and total timeouts.
pub struct HttpMediaSource {
    client: reqwest::Client,
}

impl HttpMediaSource {
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.total)
            .user_agent(concat!("template-forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::DownloadFailed(format!("HTTP client setup failed: {}", e)))?;
        Ok(HttpMediaSource { client })
    }

    async fn download(&self, url: &str, dest: &Path, mut cancel: CancelSignal) -> Result<u64, BuildError> {
        let mut response = tokio::select! {
            res = self.client.get(url).send() => res
                .map_err(|e| BuildError::DownloadFailed(format!("{}: {}", url, e)))?,
            _ = wait_cancelled(&mut cancel) => return Err(BuildError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(BuildError::DownloadFailed(format!(
                "{}: HTTP {}",
                url, status
            )));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| BuildError::io(dest, e))?;
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk
                    .map_err(|e| BuildError::DownloadFailed(format!("{}: {}", url, e)))?,
                _ = wait_cancelled(&mut cancel) => return Err(BuildError::Cancelled),
            };
            match chunk {
                Some(bytes) => {
                    file.write_all(&bytes).await.map_err(|e| BuildError::io(dest, e))?;
                    written += bytes.len() as u64;
                }
                None => break,
            }
        }

        file.flush().await.map_err(|e| BuildError::io(dest, e))?;
        Ok(written)
    }
}

impl MediaSource for HttpMediaSource {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<u64, BuildError>> {
        Box::pin(self.download(url, dest, cancel))
    }
}

/// Acquires and verifies installation media for one workspace.
#[derive(Clone)]
pub struct MediaAcquirer {
    layout: WorkspaceLayout,
    policy: RetryPolicy,
    source: Arc<dyn MediaSource>,
}

impl MediaAcquirer {
    /// HTTP acquirer with the retry policy and timeouts of the context's mode.
    pub fn new(ctx: &RuntimeContext) -> Result<Self, BuildError> {
        let source = HttpMediaSource::new(ctx.options.mode.http_timeouts())?;
        Ok(MediaAcquirer {
            layout: ctx.layout.clone(),
            policy: ctx.options.mode.retry_policy(),
            source: Arc::new(source),
        })
    }

    pub fn with_source(
        layout: WorkspaceLayout,
        policy: RetryPolicy,
        source: Arc<dyn MediaSource>,
    ) -> Self {
        MediaAcquirer {
            layout,
            policy,
            source,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Make sure verified media for `target` exists locally and return its path.
    pub async fn ensure(&self, target: &TargetConfig, cancel: &CancelSignal) -> Result<PathBuf, BuildError> {
        let media = self.layout.media_path(&target.name);

        if media.exists() {
            log::info!("[Media] [{}] Found existing media at {}", target.name, media.display());
            match verify(&media, &target.iso_checksum).await {
                Ok(_) => {
                    log::info!("[Media] [{}] Existing media verified, skipping download", target.name);
                    return Ok(media);
                }
                Err(BuildError::ChecksumMismatch { expected, actual, .. }) => {
                    log::warn!(
                        "[Media] [{}] Existing media is stale (expected {}, got {}); re-acquiring",
                        target.name,
                        expected,
                        actual
                    );
                    remove_if_exists(&media).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let work_dir = self.layout.work_dir(&target.name);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| BuildError::io(&work_dir, e))?;

        let partial = self.layout.partial_media_path(&target.name);
        self.download_with_retry(target, &partial, cancel).await?;

        tokio::fs::rename(&partial, &media)
            .await
            .map_err(|e| BuildError::io(&media, e))?;

        // A mismatch right after download is final for this call.
        if let Err(e) = verify(&media, &target.iso_checksum).await {
            log::error!("[Media] [{}] Downloaded media failed verification: {}", target.name, e);
            remove_if_exists(&media).await?;
            return Err(e);
        }

        log::info!("[Media] [{}] Media ready at {}", target.name, media.display());
        Ok(media)
    }

    async fn download_with_retry(
        &self,
        target: &TargetConfig,
        partial: &Path,
        cancel: &CancelSignal,
    ) -> Result<(), BuildError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if is_cancelled(cancel) {
                return Err(BuildError::Cancelled);
            }
            remove_if_exists(partial).await?;

            log::info!(
                "[Media] [ATTEMPT {}/{}] Downloading {} media from {}",
                attempt,
                max_attempts,
                target.name,
                target.iso_url
            );

            match self.source.fetch(&target.iso_url, partial, cancel.clone()).await {
                Ok(bytes) => {
                    log::info!("[Media] [{}] Downloaded {} bytes", target.name, bytes);
                    return Ok(());
                }
                Err(e) => {
                    remove_if_exists(partial).await?;
                    if e.is_cancelled() {
                        return Err(BuildError::Cancelled);
                    }
                    log::warn!(
                        "[Media] [ATTEMPT {}/{}] {} download failed: {}",
                        attempt,
                        max_attempts,
                        target.name,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_before_retry(attempt - 1);
                log::info!("[Media] [{}] Retrying in {:?}", target.name, delay);
                let mut cancel = cancel.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_cancelled(&mut cancel) => return Err(BuildError::Cancelled),
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| BuildError::DownloadFailed("no download attempt was made".to_string()));
        Err(BuildError::MediaAcquisitionFailed {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }
}

/// Hash on the blocking pool; media files are multi-gigabyte.
async fn verify(path: &Path, expected: &str) -> Result<String, BuildError> {
    let owned_path = path.to_path_buf();
    let expected = expected.to_string();
    tokio::task::spawn_blocking(move || checksum::verify_checksum(&owned_path, &expected))
        .await
        .map_err(|e| {
            BuildError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, format!("checksum task failed: {}", e)),
            )
        })?
}

async fn remove_if_exists(path: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::never_cancel;
    use std::sync::Mutex;
    use std::time::Duration;

    const PAYLOAD: &[u8] = b"iso-image-bytes";
    const PAYLOAD_SHA256: &str = "da882c3c3e4adf929df1425042029360daa9bfe690430f60f1b11da1d88140e2";

    /// Fails `failures` times (leaving a partial file) and then succeeds.
    struct FlakySource {
        failures: usize,
        calls: Mutex<Vec<bool>>,
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            FlakySource {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// For each call: did a partial file exist when the attempt started?
        fn partial_seen(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MediaSource for FlakySource {
        fn fetch<'a>(
            &'a self,
            _url: &'a str,
            dest: &'a Path,
            _cancel: CancelSignal,
        ) -> BoxFuture<'a, Result<u64, BuildError>> {
            Box::pin(async move {
                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    calls.push(dest.exists());
                    calls.len()
                };
                if call <= self.failures {
                    std::fs::write(dest, b"trunc").unwrap();
                    return Err(BuildError::DownloadFailed(format!("simulated failure {}", call)));
                }
                std::fs::write(dest, PAYLOAD).unwrap();
                Ok(PAYLOAD.len() as u64)
            })
        }
    }

    fn target(checksum: &str) -> TargetConfig {
        TargetConfig {
            name: "alpha".to_string(),
            version: "1".to_string(),
            iso_url: "http://media.invalid/alpha.iso".to_string(),
            iso_checksum: checksum.to_string(),
            packer_template: "alpha.pkr.hcl".to_string(),
            preparation_script: "alpha-prepare.sh".to_string(),
            validation_script: "alpha-validate.ts".to_string(),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures_and_purges_partials() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let source = Arc::new(FlakySource::new(2));
        let acquirer = MediaAcquirer::with_source(layout.clone(), policy(3), source.clone());

        let path = acquirer.ensure(&target(PAYLOAD_SHA256), &never_cancel()).await.unwrap();

        assert_eq!(path, layout.media_path("alpha"));
        assert_eq!(std::fs::read(&path).unwrap(), PAYLOAD);
        // No attempt ever starts on top of a previous partial file.
        assert_eq!(source.partial_seen(), vec![false, false, false]);
        assert!(!layout.partial_media_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_always_failing_source_stops_after_configured_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let source = Arc::new(FlakySource::new(usize::MAX));
        let acquirer = MediaAcquirer::with_source(layout.clone(), policy(3), source.clone());

        let err = acquirer.ensure(&target(PAYLOAD_SHA256), &never_cancel()).await.unwrap_err();

        assert_eq!(source.partial_seen().len(), 3);
        match err {
            BuildError::MediaAcquisitionFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("simulated failure 3"));
            }
            other => panic!("expected MediaAcquisitionFailed, got {:?}", other),
        }
        assert!(!layout.partial_media_path("alpha").exists());
        assert!(!layout.media_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_local_policy_makes_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FlakySource::new(1));
        let acquirer = MediaAcquirer::with_source(
            WorkspaceLayout::new(dir.path()),
            crate::models::ExecutionMode::Local.retry_policy(),
            source.clone(),
        );
        assert!(acquirer.ensure(&target(PAYLOAD_SHA256), &never_cancel()).await.is_err());
        assert_eq!(source.partial_seen().len(), 1);
    }

    #[tokio::test]
    async fn test_valid_existing_media_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        std::fs::create_dir_all(layout.work_dir("alpha")).unwrap();
        std::fs::write(layout.media_path("alpha"), PAYLOAD).unwrap();

        let source = Arc::new(FlakySource::new(0));
        let acquirer = MediaAcquirer::with_source(layout, policy(3), source.clone());
        acquirer.ensure(&target(PAYLOAD_SHA256), &never_cancel()).await.unwrap();

        assert!(source.partial_seen().is_empty());
    }

    #[tokio::test]
    async fn test_stale_existing_media_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        std::fs::create_dir_all(layout.work_dir("alpha")).unwrap();
        std::fs::write(layout.media_path("alpha"), b"stale bytes").unwrap();

        let source = Arc::new(FlakySource::new(0));
        let acquirer = MediaAcquirer::with_source(layout.clone(), policy(1), source.clone());
        acquirer.ensure(&target(PAYLOAD_SHA256), &never_cancel()).await.unwrap();

        assert_eq!(source.partial_seen().len(), 1);
        assert_eq!(std::fs::read(layout.media_path("alpha")).unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_mismatch_after_download_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let source = Arc::new(FlakySource::new(0));
        let acquirer = MediaAcquirer::with_source(layout.clone(), policy(3), source.clone());

        let wrong = "1111111111111111111111111111111111111111111111111111111111111111";
        let err = acquirer.ensure(&target(wrong), &never_cancel()).await.unwrap_err();

        assert!(matches!(err, BuildError::ChecksumMismatch { .. }));
        assert_eq!(source.partial_seen().len(), 1);
        assert!(!layout.media_path("alpha").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FlakySource::new(0));
        let acquirer = MediaAcquirer::with_source(WorkspaceLayout::new(dir.path()), policy(3), source.clone());
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();

        let err = acquirer.ensure(&target(PAYLOAD_SHA256), &rx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(source.partial_seen().is_empty());
    }

    #[tokio::test]
    async fn test_http_source_downloads_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/alpha.iso")
            .with_status(200)
            .with_body(PAYLOAD)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let http = HttpMediaSource::new(crate::models::ExecutionMode::Local.http_timeouts()).unwrap();
        let acquirer = MediaAcquirer::with_source(layout.clone(), policy(1), Arc::new(http));

        let mut t = target(PAYLOAD_SHA256);
        t.iso_url = format!("{}/alpha.iso", server.url());
        let path = acquirer.ensure(&t, &never_cancel()).await.unwrap();

        assert_eq!(std::fs::read(path).unwrap(), PAYLOAD);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_status_is_download_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.iso")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let http = HttpMediaSource::new(crate::models::ExecutionMode::Local.http_timeouts()).unwrap();
        let acquirer = MediaAcquirer::with_source(WorkspaceLayout::new(dir.path()), policy(1), Arc::new(http));

        let mut t = target(PAYLOAD_SHA256);
        t.iso_url = format!("{}/missing.iso", server.url());
        let err = acquirer.ensure(&t, &never_cancel()).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
