//! Paginated discovery of the shares to back up.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{ShareBackend, ShareVolume};
use crate::retry::{RetryPolicy, retry_transient};

/// Errors raised while listing shares.
#[derive(Debug, Error)]
pub enum EnumerationError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when a page cannot be fetched.
    #[error("failed to list shares (page {page}): {source}")]
    List {
        /// Page that failed.
        page: u32,
        /// Provider error.
        #[source]
        source: E,
    },
}

/// Walks every page of the share listing.
#[derive(Debug)]
pub struct VolumeEnumerator<'a, B> {
    backend: &'a B,
    page_size: u32,
    max_items: u32,
    api_policy: RetryPolicy,
}

impl<'a, B: ShareBackend> VolumeEnumerator<'a, B> {
    /// Creates an enumerator fetching `page_size` shares per call and
    /// returning at most `max_items`.
    #[must_use]
    pub const fn new(
        backend: &'a B,
        page_size: u32,
        max_items: u32,
        api_policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            page_size,
            max_items,
            api_policy,
        }
    }

    /// Lists all shares in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerationError::List`] when a page cannot be fetched.
    pub async fn list(&self) -> Result<Vec<ShareVolume>, EnumerationError<B::Error>> {
        let cap = usize::try_from(self.max_items).unwrap_or(usize::MAX);
        let page_size = self.page_size.max(1);
        let mut shares = Vec::new();
        let mut page = 1_u32;

        loop {
            let fetched = retry_transient(&self.api_policy, "list_shares", || {
                self.backend.list_shares(page, page_size)
            })
            .await
            .map_err(|source| EnumerationError::List { page, source })?;
            debug!(
                page,
                count = fetched.shares.len(),
                has_more = fetched.has_more,
                "fetched share page"
            );

            let empty = fetched.shares.is_empty();
            shares.extend(fetched.shares);
            if shares.len() >= cap {
                if shares.len() > cap || fetched.has_more {
                    warn!(max_items = self.max_items, "share listing truncated");
                }
                shares.truncate(cap);
                break;
            }
            if !fetched.has_more || empty {
                break;
            }
            page = page.saturating_add(1);
        }

        info!(count = shares.len(), "shares discovered");
        Ok(shares)
    }
}
