//! Offset paging over registry list reads.

use std::future::Future;

use tracing::warn;

use crate::error::TxError;

/// Page size used when the caller passes zero.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Hard stop so a misbehaving node cannot keep the loop alive.
pub const MAX_PAGES: usize = 1_000;

/// Calls `fetch(start, limit)` until a page comes back empty or short.
pub async fn collect_pages<T, F, Fut>(page_size: u64, mut fetch: F) -> Result<Vec<T>, TxError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, TxError>>,
{
    let limit = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
    let mut all = Vec::new();
    let mut start = 0u64;

    for _ in 0..MAX_PAGES {
        let page = fetch(start, limit).await?;
        let n = page.len() as u64;
        all.extend(page);
        if n < limit {
            return Ok(all);
        }
        start += n;
    }
    warn!(pages = MAX_PAGES, collected = all.len(), "page cap reached, results truncated");
    Ok(all)
}
