//! Release feed interaction and asset selection

use regex::Regex;
use serde::Deserialize;

use super::platform::PlatformSpec;
use crate::error::{PrepError, Result};

/// Release metadata returned by the feed
#[derive(Deserialize, Debug)]
pub struct Release {
    #[serde(default)]
    pub tag_name: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable release asset
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url", alias = "download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Anchored pattern for `node-v<semver>-<platform>-<arch>.<ext>`
pub fn asset_pattern(spec: &PlatformSpec) -> String {
    format!(
        r"^{}v\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?-{}-{}\.{}$",
        regex::escape("node-"),
        regex::escape(spec.platform.asset_token()),
        regex::escape(spec.arch.as_str()),
        regex::escape(spec.archive_kind().extension()),
    )
}

/// Pick the single asset matching the platform pattern
///
/// Zero matches and multiple matches are both errors; there is no silent pick.
pub fn select_asset(assets: &[ReleaseAsset], spec: &PlatformSpec) -> Result<ReleaseAsset> {
    let pattern = asset_pattern(spec);
    let re = Regex::new(&pattern).map_err(|e| PrepError::Config(e.to_string()))?;

    let mut matches = assets.iter().filter(|a| re.is_match(&a.name));
    match (matches.next(), matches.next()) {
        (Some(asset), None) => Ok(asset.clone()),
        (None, _) => Err(PrepError::AssetNotFound {
            pattern,
            candidates: assets.len(),
        }),
        (Some(first), Some(second)) => {
            let mut names = vec![first.name.clone(), second.name.clone()];
            names.extend(matches.map(|a| a.name.clone()));
            Err(PrepError::AmbiguousAsset {
                pattern,
                matches: names,
            })
        }
    }
}

/// Queries the release metadata endpoint for the asset of a platform
#[derive(Clone)]
pub struct Locator {
    client: reqwest::Client,
    url: String,
}

impl Locator {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the release document from the feed
    pub async fn fetch_release(&self) -> Result<Release> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| PrepError::Http {
                url: self.url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(PrepError::ReleaseFeed {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| PrepError::Http {
            url: self.url.clone(),
            source,
        })?;

        serde_json::from_slice(&body).map_err(|source| PrepError::MalformedMetadata {
            url: self.url.clone(),
            source,
        })
    }

    /// Fetch the feed and select the asset for `spec`
    pub async fn locate(&self, spec: &PlatformSpec) -> Result<ReleaseAsset> {
        let release = self.fetch_release().await?;
        let asset = select_asset(&release.assets, spec)?;
        log::debug!(
            "Selected {} from release {}",
            asset.name,
            release.tag_name.as_deref().unwrap_or("<untagged>")
        );
        Ok(asset)
    }
}
