//! File Storage share listing.

use reqwest::Method;
use serde::Deserialize;

use crate::backend::{SharePage, ShareVolume};

use super::http::{FILE_API_BASE, send_json};
use super::{ScalewayBackend, ScalewayBackendError};

#[derive(Debug, Deserialize)]
pub(super) struct ListFilesystemsResponse {
    #[serde(default)]
    filesystems: Vec<Filesystem>,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct Filesystem {
    id: String,
    #[serde(default)]
    size: u64,
}

impl ScalewayBackend {
    pub(super) async fn fetch_share_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<SharePage, ScalewayBackendError> {
        let url = format!(
            "{FILE_API_BASE}/regions/{}/filesystems",
            self.config.default_region
        );
        let request = self.request(Method::GET, &url).query(&[
            ("project_id", self.config.default_project_id.clone()),
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ]);
        let response: ListFilesystemsResponse = send_json(request).await?;
        Ok(to_page(response, page, page_size))
    }
}

pub(super) fn to_page(response: ListFilesystemsResponse, page: u32, page_size: u32) -> SharePage {
    let seen = u64::from(page).saturating_mul(u64::from(page_size));
    SharePage {
        has_more: !response.filesystems.is_empty() && seen < response.total_count,
        shares: response
            .filesystems
            .into_iter()
            .map(|fs| ShareVolume::new(fs.id, fs.size))
            .collect(),
    }
}
