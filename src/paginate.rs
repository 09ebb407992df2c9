//! Page-number pagination over one logical resource.
//!
//! Pages are requested with `page=1,2,…` and a fixed `limit` until the API
//! returns an empty page, a short page, or a request fails for good. A failed
//! request does not raise: the records gathered so far are returned and the
//! run is flagged as [`Coverage::Partial`].

use crate::http::client::{ApiClient, QueryParams};
use crate::http::error::FetchError;
use crate::http::retry::Fetcher;
use futures_util::{stream, Stream, StreamExt};
use log::debug;
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One successfully fetched page. The terminal empty page is yielded too.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub records: Vec<Value>,
}

/// A request that failed after all retries, ending the sequence.
#[derive(Debug)]
pub struct PageFailure {
    pub number: u32,
    pub error: FetchError,
}

#[derive(Debug)]
pub enum Coverage {
    Complete,
    Partial { page: u32, error: FetchError },
}

/// The drained result of a pagination run.
#[derive(Debug)]
pub struct Paginated {
    pub records: Vec<Value>,
    /// Page requests issued, counting the failing one. Retries are not counted.
    pub requests: u32,
    pub coverage: Coverage,
}

impl Paginated {
    pub fn is_complete(&self) -> bool {
        matches!(self.coverage, Coverage::Complete)
    }
}

pub struct Paginator<'a, C> {
    fetcher: &'a Fetcher<C>,
    page_size: usize,
}

impl<'a, C: ApiClient> Paginator<'a, C> {
    pub fn new(fetcher: &'a Fetcher<C>, page_size: usize) -> Self {
        Self {
            fetcher,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Lazily walks the pages of `endpoint`, starting from page 1.
    pub fn pages<'b>(
        &'b self,
        endpoint: &'b str,
        base_params: &'b QueryParams,
    ) -> impl Stream<Item = Result<Page, PageFailure>> + 'b {
        let fetcher: &'b Fetcher<C> = self.fetcher;
        let page_size = self.page_size;

        stream::unfold(Some(1u32), move |cursor| async move {
            let number = cursor?;

            let mut params = base_params.clone();
            params.insert("page".to_string(), number.to_string());
            params.insert("limit".to_string(), page_size.to_string());

            match fetcher.fetch(endpoint, &params).await {
                Err(error) => Some((Err(PageFailure { number, error }), None)),
                Ok(response) => {
                    if let Some(found) = &response.meta.found {
                        debug!("{} page {}: meta.found = {}", endpoint, number, found);
                    }
                    let records = response.results;
                    let next = if records.is_empty() || records.len() < page_size {
                        None
                    } else {
                        Some(number + 1)
                    };
                    Some((Ok(Page { number, records }), next))
                }
            }
        })
    }

    /// Drains [`Paginator::pages`] into a single record list.
    pub async fn collect(&self, endpoint: &str, base_params: &QueryParams) -> Paginated {
        let mut records = Vec::new();
        let mut requests = 0;
        let mut coverage = Coverage::Complete;

        let mut pages = std::pin::pin!(self.pages(endpoint, base_params));
        while let Some(item) = pages.next().await {
            requests += 1;
            match item {
                Ok(page) => {
                    debug!(
                        "{} page {}: {} records (total {})",
                        endpoint,
                        page.number,
                        page.records.len(),
                        records.len() + page.records.len()
                    );
                    records.extend(page.records);
                }
                Err(failure) => {
                    coverage = Coverage::Partial {
                        page: failure.number,
                        error: failure.error,
                    };
                }
            }
        }

        Paginated {
            records,
            requests,
            coverage,
        }
    }
}
