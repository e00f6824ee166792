//! # STAC Catalog Lookup
//!
//! Resolves a named collection on a STAC API to the Azure Blob location of
//! its Zarr asset, and obtains a SAS token for that location from the
//! Planetary Computer signing service.
//!
//! ```rust,no_run
//! use conus404_wind::catalog::CatalogClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CatalogClient::new(
//!         "https://planetarycomputer.microsoft.com/api/stac/v1",
//!         "https://planetarycomputer.microsoft.com/api/sas/v1",
//!     )?;
//!     let location = client.resolve_zarr_asset("conus404", "zarr-abfs").await?;
//!     let token = client.sign(&location).await?;
//!     println!("{} expires {:?}", location, token.expiry);
//!     Ok(())
//! }
//! ```

use log::debug;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Environment variable holding an optional Planetary Computer subscription key
pub const SUBSCRIPTION_KEY_ENV: &str = "PC_SDK_SUBSCRIPTION_KEY";

const BLOB_HOST_SUFFIX: &str = ".blob.core.windows.net";

/// Errors that can occur during catalog lookup and signing
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Collection '{collection}' has no asset '{asset}'")]
    MissingAsset { collection: String, asset: String },

    #[error("Unsupported asset href: {0}")]
    UnsupportedHref(String),

    #[error("No storage account for asset href: {0}")]
    MissingAccount(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// The parts of a STAC collection document this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct StacCollection {
    pub id: String,
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    /// Everything else, e.g. `xarray:storage_options`
    #[serde(flatten)]
    pub extra_fields: serde_json::Map<String, serde_json::Value>,
}

impl StacAsset {
    /// `xarray:storage_options.account_name`, when present.
    pub fn account_name(&self) -> Option<&str> {
        self.extra_fields
            .get("xarray:storage_options")
            .and_then(|opts| opts.get("account_name"))
            .and_then(|v| v.as_str())
    }
}

/// Container and key prefix of a Zarr store in Azure Blob Storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZarrLocation {
    pub account: String,
    pub container: String,
    /// Key prefix of the store root inside the container, without slashes
    /// at either end
    pub prefix: String,
}

impl ZarrLocation {
    /// Parses `abfs://container/path`, `az://container/path` or
    /// `https://<account>.blob.core.windows.net/<container>/<path>`.
    ///
    /// The account comes from the URL host for https, otherwise from
    /// `account` (the asset's storage options).
    pub fn parse(href: &str, account: Option<&str>) -> CatalogResult<Self> {
        let (account, rest) = if let Some(rest) = href
            .strip_prefix("abfs://")
            .or_else(|| href.strip_prefix("az://"))
        {
            let account = account.ok_or_else(|| CatalogError::MissingAccount(href.to_string()))?;
            (account.to_string(), rest)
        } else if let Some(rest) = href.strip_prefix("https://") {
            let (host, path) = rest
                .split_once('/')
                .ok_or_else(|| CatalogError::UnsupportedHref(href.to_string()))?;
            let account = host
                .strip_suffix(BLOB_HOST_SUFFIX)
                .ok_or_else(|| CatalogError::UnsupportedHref(href.to_string()))?;
            (account.to_string(), path)
        } else {
            return Err(CatalogError::UnsupportedHref(href.to_string()));
        };

        // abfs URLs may carry the account as container@account
        let rest = rest.trim_matches('/');
        let (container, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        let container = container.split('@').next().unwrap_or(container);

        if account.is_empty() || container.is_empty() {
            return Err(CatalogError::UnsupportedHref(href.to_string()));
        }

        Ok(ZarrLocation {
            account,
            container: container.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }
}

impl fmt::Display for ZarrLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "az://{}/{}/{}", self.account, self.container, self.prefix)
    }
}

/// Shared-access signature for one container.
#[derive(Debug, Clone, Deserialize)]
pub struct SasToken {
    pub token: String,
    #[serde(rename = "msft:expiry", default)]
    pub expiry: Option<String>,
}

/// Client for the STAC API and the SAS signing endpoint.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    stac_url: String,
    sas_url: String,
    subscription_key: Option<String>,
}

impl CatalogClient {
    pub fn new(stac_url: &str, sas_url: &str) -> CatalogResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(CatalogClient {
            http,
            stac_url: stac_url.trim_end_matches('/').to_string(),
            sas_url: sas_url.trim_end_matches('/').to_string(),
            subscription_key: std::env::var(SUBSCRIPTION_KEY_ENV).ok().filter(|k| !k.is_empty()),
        })
    }

    pub async fn get_collection(&self, collection: &str) -> CatalogResult<StacCollection> {
        let url = format!("{}/collections/{}", self.stac_url, collection);
        debug!("Fetching STAC collection: {}", url);
        self.get_json(&url).await
    }

    /// Looks up `asset` in `collection` and parses its location.
    pub async fn resolve_zarr_asset(
        &self,
        collection: &str,
        asset: &str,
    ) -> CatalogResult<ZarrLocation> {
        let stac = self.get_collection(collection).await?;
        let entry = stac.assets.get(asset).ok_or_else(|| CatalogError::MissingAsset {
            collection: stac.id.clone(),
            asset: asset.to_string(),
        })?;
        debug!("Asset '{}' href: {} ({:?})", asset, entry.href, entry.media_type);
        ZarrLocation::parse(&entry.href, entry.account_name())
    }

    /// Requests a read token for the location's container.
    pub async fn sign(&self, location: &ZarrLocation) -> CatalogResult<SasToken> {
        let url = format!(
            "{}/token/{}/{}",
            self.sas_url, location.account, location.container
        );
        debug!("Requesting SAS token: {}", url);
        let token: SasToken = self.get_json(&url).await?;
        debug!("SAS token expires: {:?}", token.expiry);
        Ok(token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CatalogResult<T> {
        let mut request = self.http.get(url);
        if let Some(key) = &self.subscription_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}
