//! ---
//! exu_section: "05-networking-external-interfaces"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Extension repository protocol and client."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use exu_common::config::RepositoryConfig;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use crate::protocol::{FetchRequest, UpdateInfo, UpdateQuery};
use crate::{RepositoryError, Result};

const UPDATE_INFO_PATH: &str = "update-info/";
const DOWNLOAD_PATH: &str = "download-extension/";

/// Remote repository contract consumed by the engine.
#[async_trait]
pub trait RepositoryClient: Send + Sync + Debug {
    /// Bulk query: which installed components have an upgrade available.
    async fn query_updates(&self, query: &UpdateQuery) -> Result<UpdateInfo>;

    /// Download the installable artifact for one component.
    async fn fetch_artifact(&self, request: &FetchRequest) -> Result<Bytes>;
}

/// reqwest-backed client talking to an extensions.gnome.org style repository.
#[derive(Debug, Clone)]
pub struct HttpRepositoryClient {
    http: Client,
    base: Url,
}

impl HttpRepositoryClient {
    /// Build a client from configuration; the session timeout applies to
    /// every request.
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("exu/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    /// Endpoint for the bulk query.
    pub fn update_info_url(&self) -> Result<Url> {
        Ok(self.base.join(UPDATE_INFO_PATH)?)
    }

    /// Endpoint for a per-item artifact.
    pub fn download_url(&self, id: &str) -> Result<Url> {
        Ok(self
            .base
            .join(DOWNLOAD_PATH)?
            .join(&format!("{id}.shell-extension.zip"))?)
    }
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn query_updates(&self, query: &UpdateQuery) -> Result<UpdateInfo> {
        let url = self.update_info_url()?;
        debug!(url = %url, installed = query.installed.len(), "querying repository for updates");
        let response = self
            .http
            .get(url)
            .query(&query.to_params()?)
            .send()
            .await?;
        let body = ensure_success(response)?.bytes().await?;
        Ok(UpdateInfo::from_slice(&body)?)
    }

    async fn fetch_artifact(&self, request: &FetchRequest) -> Result<Bytes> {
        let url = self.download_url(&request.id)?;
        debug!(url = %url, id = %request.id, version_tag = ?request.version_tag, "fetching artifact");
        let response = self
            .http
            .get(url)
            .query(&request.to_params())
            .send()
            .await?;
        let payload = ensure_success(response)?.bytes().await?;
        debug!(id = %request.id, bytes = payload.len(), "artifact downloaded");
        Ok(payload)
    }
}

fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RepositoryError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_joined_under_base_path() {
        let config = RepositoryConfig {
            base_url: "http://repo.local/api".into(),
            ..RepositoryConfig::default()
        };
        let client = HttpRepositoryClient::from_config(&config).unwrap();
        assert_eq!(
            client.update_info_url().unwrap().as_str(),
            "http://repo.local/api/update-info/"
        );
        assert_eq!(
            client.download_url("dash@example.com").unwrap().as_str(),
            "http://repo.local/api/download-extension/dash@example.com.shell-extension.zip"
        );
    }
}
