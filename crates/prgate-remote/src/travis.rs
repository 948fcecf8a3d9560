//! Travis CI API v3 adapter
//!
//! Only the two calls the gatekeeper needs: list recent builds for a
//! repository filtered by trigger event, and restart a build.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{CiAdapter, TransportResult};
use crate::types::{Build, RepoSlug, RestartResult};

/// Travis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TravisConfig {
    /// API root, `https://api.travis-ci.com` for hosted Travis
    pub api_url: String,
    /// API token from the Travis profile page
    pub token: Option<String>,
}

impl Default for TravisConfig {
    fn default() -> Self {
        TravisConfig {
            api_url: "https://api.travis-ci.com".to_string(),
            token: None,
        }
    }
}

/// CI adapter backed by the Travis v3 API
pub struct TravisCi {
    config: TravisConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct WireBuilds {
    builds: Vec<Build>,
}

#[derive(Deserialize)]
struct WireRestartedBuild {
    id: u64,
}

#[derive(Deserialize)]
struct WireRestart {
    build: WireRestartedBuild,
    state_change: String,
}

impl TravisCi {
    pub fn new(config: TravisConfig) -> TransportResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("prgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(TravisCi { config, http })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header("Travis-API-Version", "3");

        match &self.config.token {
            Some(token) => builder.header(AUTHORIZATION, format!("token {}", token)),
            None => builder,
        }
    }

    fn base(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    async fn expect_success(
        method: Method,
        url: &str,
        response: reqwest::Response,
    ) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => TransportError::NotFound(url.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                TransportError::Unauthorized(message)
            }
            _ => TransportError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                message,
            },
        })
    }
}

/// Travis addresses repositories by URL-encoded slug.
fn encode_slug(repo: &RepoSlug) -> String {
    format!("{}%2F{}", repo.owner, repo.name)
}

#[async_trait]
impl CiAdapter for TravisCi {
    async fn list_builds(&self, repo: &RepoSlug, event_type: &str) -> TransportResult<Vec<Build>> {
        let url = format!(
            "{}/repo/{}/builds?event_type={}&sort_by=id:desc",
            self.base(),
            encode_slug(repo),
            event_type
        );
        debug!(url = %url, "travis request");
        let response = self.request(Method::GET, &url).send().await?;
        let response = Self::expect_success(Method::GET, &url, response).await?;
        let wire: WireBuilds = response.json().await?;
        Ok(wire.builds)
    }

    async fn restart_build(&self, id: u64) -> TransportResult<RestartResult> {
        let url = format!("{}/build/{}/restart", self.base(), id);
        debug!(url = %url, "travis request");
        let response = self.request(Method::POST, &url).send().await?;
        let response = Self::expect_success(Method::POST, &url, response).await?;
        let wire: WireRestart = response.json().await?;
        Ok(RestartResult {
            build_id: wire.build.id,
            state_change: wire.state_change,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildState;

    #[test]
    fn test_encode_slug() {
        assert_eq!(
            encode_slug(&RepoSlug::new("acme", "widgets")),
            "acme%2Fwidgets"
        );
    }

    #[test]
    fn test_builds_payload_decodes() {
        let wire: WireBuilds = serde_json::from_value(serde_json::json!({
            "@type": "builds",
            "builds": [
                { "id": 11, "pull_request_number": 4, "event_type": "pull_request", "state": "passed" },
                { "id": 10, "pull_request_number": null, "event_type": "pull_request", "state": "started" }
            ]
        }))
        .unwrap();
        assert_eq!(wire.builds.len(), 2);
        assert_eq!(wire.builds[0].pull_request_number, Some(4));
        assert_eq!(wire.builds[1].state, BuildState::Started);
    }

    #[test]
    fn test_restart_payload_decodes() {
        let wire: WireRestart = serde_json::from_value(serde_json::json!({
            "@type": "pending",
            "build": { "@type": "build", "id": 11, "state": "passed" },
            "state_change": "restart",
            "resource_type": "build"
        }))
        .unwrap();
        assert_eq!(wire.build.id, 11);
        assert_eq!(wire.state_change, "restart");
    }
}
