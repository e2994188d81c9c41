//! Media URL reachability check (`check-urls`).
//!
//! Sends a HEAD request to every selected target's media URL. Any 2xx answer
//! counts as reachable; everything else, including transport errors, does not.

use crate::error::BuildError;
use crate::models::{HttpTimeouts, TargetConfig};
use futures::future::join_all;

/// Outcome for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCheck {
    pub name: String,
    pub url: String,
    pub reachable: bool,
    /// HTTP status, when a response arrived at all.
    pub status: Option<u16>,
    pub error: Option<String>,
}

pub struct UrlChecker {
    client: reqwest::Client,
}

impl UrlChecker {
    pub fn new(timeouts: HttpTimeouts) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.total)
            .user_agent(concat!("template-forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::DownloadFailed(format!("HTTP client setup failed: {}", e)))?;
        Ok(UrlChecker { client })
    }

    pub async fn check(&self, target: &TargetConfig) -> UrlCheck {
        let url = target.iso_url.clone();
        match self.client.head(&url).send().await {
            Ok(response) => {
                let status = response.status();
                let reachable = status.is_success();
                if reachable {
                    log::info!("[Media] [{}] {} is reachable ({})", target.name, url, status);
                } else {
                    log::warn!("[Media] [{}] {} answered {}", target.name, url, status);
                }
                UrlCheck {
                    name: target.name.clone(),
                    url,
                    reachable,
                    status: Some(status.as_u16()),
                    error: (!reachable).then(|| format!("HTTP {}", status)),
                }
            }
            Err(e) => {
                log::warn!("[Media] [{}] {} is unreachable: {}", target.name, url, e);
                UrlCheck {
                    name: target.name.clone(),
                    url,
                    reachable: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Check every target concurrently; results keep the input order.
    pub async fn check_all(&self, targets: &[TargetConfig]) -> Vec<UrlCheck> {
        join_all(targets.iter().map(|t| self.check(t))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn target(name: &str, iso_url: String) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            version: "1".to_string(),
            iso_url,
            iso_checksum: String::new(),
            packer_template: format!("{}.pkr.hcl", name),
            preparation_script: format!("{}-prepare.sh", name),
            validation_script: format!("{}-validate.ts", name),
        }
    }

    fn checker() -> UrlChecker {
        UrlChecker::new(HttpTimeouts {
            connect: Duration::from_secs(5),
            total: Duration::from_secs(10),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_head_status_decides_reachability() {
        let mut server = mockito::Server::new_async().await;
        let ok = server.mock("HEAD", "/ubuntu.iso").with_status(200).create_async().await;
        let missing = server.mock("HEAD", "/fedora.iso").with_status(404).create_async().await;

        let targets = vec![
            target("ubuntu", format!("{}/ubuntu.iso", server.url())),
            target("fedora", format!("{}/fedora.iso", server.url())),
        ];
        let results = checker().check_all(&targets).await;
        ok.assert_async().await;
        missing.assert_async().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "ubuntu");
        assert!(results[0].reachable);
        assert_eq!(results[0].status, Some(200));
        assert!(results[0].error.is_none());

        assert_eq!(results[1].name, "fedora");
        assert!(!results[1].reachable);
        assert_eq!(results[1].status, Some(404));
        assert_eq!(results[1].error.as_deref(), Some("HTTP 404 Not Found"));
    }

    #[tokio::test]
    async fn test_connection_failure_is_unreachable() {
        let result = checker()
            .check(&target("suse", "http://127.0.0.1:1/suse.iso".to_string()))
            .await;
        assert!(!result.reachable);
        assert_eq!(result.status, None);
        assert!(result.error.is_some());
    }
}
