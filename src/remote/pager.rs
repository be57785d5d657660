//! Paginated fetch: turns a page-returning listing call into a stream of
//! position-tagged items.
//!
//! Every item carries a [`PagePosition`]: the continuation token of the page it
//! came from (`None` on the final page), its index within that page, and the
//! page's item count. Those three values are the only state the resume
//! protocol needs, so they are emitted for every item, the very last included.

use serde::{Deserialize, Serialize};

use crate::remote::service::{DriveService, RemoteResult};
use crate::remote::types::{ListRequest, Page, Permission, RemoteItem};

/// Where an item sat in the paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PagePosition {
    /// Continuation token returned with the item's page; `None` on the last page.
    pub next_page_token: Option<String>,
    /// Zero-based index of the item within its page.
    pub item_index: usize,
    /// Number of items on the page.
    pub num_items: usize,
}

impl PagePosition {
    /// Whether this item was the last one on its page.
    pub fn is_last_in_page(&self) -> bool {
        self.item_index + 1 == self.num_items
    }
}

/// Derives the next request from the current request and its response.
pub type NextRequest<T> = fn(&ListRequest, &Page<T>) -> Option<ListRequest>;

/// Lazy, finite, non-restartable iterator over `(item, position)` pairs.
///
/// Pages are fetched on demand. Iteration ends after a page without a
/// continuation token. A failed page fetch is yielded once as `Err` and the
/// iterator is fused afterwards.
pub struct Pager<T, F, N = NextRequest<T>>
where
    F: FnMut(&ListRequest) -> RemoteResult<Page<T>>,
    N: FnMut(&ListRequest, &Page<T>) -> Option<ListRequest>,
{
    fetch: F,
    next: N,
    request: Option<ListRequest>,
    current: std::vec::IntoIter<T>,
    page_token: Option<String>,
    num_items: usize,
    index: usize,
    pages_fetched: usize,
}

impl<T, F> Pager<T, F>
where
    F: FnMut(&ListRequest) -> RemoteResult<Page<T>>,
{
    /// Page through `fetch`, following each response's continuation token.
    pub fn new(request: ListRequest, fetch: F) -> Self {
        Self::with_next(request, fetch, ListRequest::next_after::<T>)
    }
}

impl<T, F, N> Pager<T, F, N>
where
    F: FnMut(&ListRequest) -> RemoteResult<Page<T>>,
    N: FnMut(&ListRequest, &Page<T>) -> Option<ListRequest>,
{
    /// Page through `fetch`, deriving each follow-up request with `next`.
    pub fn with_next(request: ListRequest, fetch: F, next: N) -> Self {
        Self {
            fetch,
            next,
            request: Some(request),
            current: Vec::new().into_iter(),
            page_token: None,
            num_items: 0,
            index: 0,
            pages_fetched: 0,
        }
    }

    /// Number of pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

impl<T, F, N> Iterator for Pager<T, F, N>
where
    F: FnMut(&ListRequest) -> RemoteResult<Page<T>>,
    N: FnMut(&ListRequest, &Page<T>) -> Option<ListRequest>,
{
    type Item = RemoteResult<(T, PagePosition)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                let position = PagePosition {
                    next_page_token: self.page_token.clone(),
                    item_index: self.index,
                    num_items: self.num_items,
                };
                self.index += 1;
                return Some(Ok((item, position)));
            }

            // Current page drained; `request` is None once the last page was
            // seen or a fetch failed.
            let request = self.request.take()?;
            match (self.fetch)(&request) {
                Ok(page) => {
                    self.pages_fetched += 1;
                    self.request = (self.next)(&request, &page);
                    self.page_token = page.next_page_token;
                    self.num_items = page.items.len();
                    self.index = 0;
                    self.current = page.items.into_iter();
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Page through every item visible to the account.
pub fn list_items<S: DriveService>(
    service: &S,
    request: ListRequest,
) -> Pager<RemoteItem, impl FnMut(&ListRequest) -> RemoteResult<Page<RemoteItem>> + '_> {
    Pager::new(request, move |req| service.list_items(req))
}

/// Page through the permissions of one item.
pub fn list_permissions<'a, S: DriveService>(
    service: &'a S,
    file_id: &'a str,
    request: ListRequest,
) -> Pager<Permission, impl FnMut(&ListRequest) -> RemoteResult<Page<Permission>> + 'a> {
    Pager::new(request, move |req| service.list_permissions(file_id, req))
}

/// Drain every permission of one item, failing on the first page error.
pub fn fetch_all_permissions<S: DriveService>(
    service: &S,
    file_id: &str,
    page_size: u32,
) -> RemoteResult<Vec<Permission>> {
    list_permissions(service, file_id, ListRequest::new(page_size))
        .map(|entry| entry.map(|(permission, _)| permission))
        .collect()
}
