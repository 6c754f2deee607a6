//! The block page URL contract.
//!
//! `<origin>/block-content.html?requestedUrl=<url-encoded original>`.  The
//! interceptor is the only producer of these URLs and the block page the
//! only consumer of `requestedUrl`.

use serde::Serialize;
use url::form_urlencoded;
use url::Url;

use crate::domain::{extract_domain, site_name};

pub const BLOCK_PAGE_PATH: &str = "block-content.html";
pub const REQUESTED_URL_PARAM: &str = "requestedUrl";
pub const DEFAULT_EXTENSION_ORIGIN: &str = "chrome-extension://flocus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPage {
    origin: String,
}

impl Default for BlockPage {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION_ORIGIN)
    }
}

impl BlockPage {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn base(&self) -> String {
        format!("{}/{}", self.origin, BLOCK_PAGE_PATH)
    }

    /// The block page URL carrying `requested` as its return target.
    pub fn url_for(&self, requested: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(requested.as_bytes()).collect();
        format!("{}?{}={}", self.base(), REQUESTED_URL_PARAM, encoded)
    }

    /// Whether `url` points at the block page itself.
    pub fn is_block_page(&self, url: &str) -> bool {
        url.starts_with(&self.base())
    }

    /// Decodes the original URL from a block page URL.
    pub fn requested_url(&self, block_page_url: &str) -> Option<String> {
        if !self.is_block_page(block_page_url) {
            return None;
        }
        let parsed = Url::parse(block_page_url).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| k == REQUESTED_URL_PARAM)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    }

    /// What the block page shows for `requested`.
    pub fn view(&self, requested: &str) -> BlockPageView {
        let domain = extract_domain(requested);
        let site_name = site_name(&domain).map(str::to_string);
        BlockPageView {
            requested_url: requested.to_string(),
            domain,
            site_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPageView {
    pub requested_url: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
}
