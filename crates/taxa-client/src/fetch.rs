//! Fetchers built on [`TaxaApi`]: descendant pagination, regional discovery
//! and batched detail lookups.
//!
//! The taxa search endpoint refuses to page past a fixed result window. The
//! descendant fetcher walks each window page by page and, when the window is
//! nearly used up, restarts from page 1 with an `id_above` cursor set to the
//! largest ID seen so far.

use futures::stream::{self, Stream, TryStreamExt};
use taxa_core::config::RetryConfig;
use taxa_core::error::AppError;
use taxa_core::models::{RegionalTaxon, TaxonRecord};

use crate::retry::with_retry;
use crate::TaxaApi;

/// Largest page size the taxa search endpoint accepts.
pub const MAX_PER_PAGE: u32 = 200;

/// Results reachable through `page` before the endpoint refuses the request.
pub const RESULT_WINDOW: usize = 10_000;

/// Parameters for [`fetch_descendants`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescendantQuery {
    pub taxon_id: i64,
    /// Clamped to `1..=MAX_PER_PAGE`.
    pub per_page: u32,
    /// Stop after this many records.
    pub max_results: Option<usize>,
    pub window_cap: usize,
}

impl DescendantQuery {
    pub fn new(taxon_id: i64) -> Self {
        Self {
            taxon_id,
            per_page: MAX_PER_PAGE,
            max_results: None,
            window_cap: RESULT_WINDOW,
        }
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn max_results(mut self, max_results: Option<usize>) -> Self {
        self.max_results = max_results;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    WithinWindow { page: u32, consumed: usize },
    WindowExhausted { max_id: i64 },
    Terminated,
}

struct Pager<'a, A: ?Sized> {
    api: &'a A,
    retry: &'a RetryConfig,
    query: DescendantQuery,
    state: PageState,
    cursor: Option<i64>,
    fetched: usize,
    last_max_id: Option<i64>,
}

impl<'a, A: TaxaApi + ?Sized> Pager<'a, A> {
    fn new(api: &'a A, retry: &'a RetryConfig, query: DescendantQuery) -> Self {
        let state = if query.max_results == Some(0) {
            PageState::Terminated
        } else {
            PageState::WithinWindow {
                page: 1,
                consumed: 0,
            }
        };

        Self {
            api,
            retry,
            query,
            state,
            cursor: None,
            fetched: 0,
            last_max_id: None,
        }
    }

    /// Advances the state machine until it yields a non-empty page or ends.
    async fn next_page(&mut self) -> Result<Option<Vec<TaxonRecord>>, AppError> {
        loop {
            match self.state {
                PageState::Terminated => return Ok(None),
                PageState::WindowExhausted { max_id } => {
                    tracing::debug!(
                        taxon_id = self.query.taxon_id,
                        id_above = max_id,
                        "Result window exhausted, continuing above cursor"
                    );
                    self.cursor = Some(max_id);
                    self.state = PageState::WithinWindow {
                        page: 1,
                        consumed: 0,
                    };
                }
                PageState::WithinWindow { page, consumed } => {
                    let api = self.api;
                    let taxon_id = self.query.taxon_id;
                    let per_page = self.query.per_page;
                    let cursor = self.cursor;

                    let response = with_retry(self.retry, || {
                        api.list_taxa_page(taxon_id, page, per_page, cursor)
                    })
                    .await?;

                    let mut results = response.results;
                    let received = results.len();
                    results.sort_by_key(|t| t.id);
                    self.check_ordering(&results);

                    let consumed = consumed + received;
                    let mut capped = false;
                    if let Some(max) = self.query.max_results {
                        let remaining = max.saturating_sub(self.fetched);
                        if received >= remaining {
                            results.truncate(remaining);
                            capped = true;
                        }
                    }
                    self.fetched += results.len();

                    let page_max = results.iter().filter_map(|t| t.id).max();
                    if page_max.is_some() {
                        self.last_max_id = page_max;
                    }

                    self.state = if received < per_page as usize || capped {
                        PageState::Terminated
                    } else if consumed >= self.query.window_cap.saturating_sub(per_page as usize) {
                        match page_max {
                            Some(max_id) => PageState::WindowExhausted { max_id },
                            None => PageState::Terminated,
                        }
                    } else {
                        PageState::WithinWindow {
                            page: page + 1,
                            consumed,
                        }
                    };

                    if !results.is_empty() {
                        return Ok(Some(results));
                    }
                }
            }
        }
    }

    fn check_ordering(&self, results: &[TaxonRecord]) {
        let first = results.iter().find_map(|t| t.id);
        if let (Some(previous), Some(first)) = (self.last_max_id, first) {
            if first <= previous {
                tracing::warn!(
                    taxon_id = self.query.taxon_id,
                    previous_max = previous,
                    first_id = first,
                    "Page is not in ascending ID order relative to the previous page"
                );
            }
        }
    }
}

/// Streams every taxon below `query.taxon_id`, in ascending ID order.
///
/// The stream is lazy: a page is requested only when the consumer has drained
/// the previous one. Each page request goes through [`with_retry`]. The first
/// error ends the stream.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// use taxa_client::{fetch_descendants, DescendantQuery, INatClient};
/// use taxa_core::config::RetryConfig;
///
/// # async fn example() -> Result<(), taxa_core::AppError> {
/// let client = INatClient::new()?;
/// let policy = RetryConfig::default();
/// let query = DescendantQuery::new(47604).max_results(Some(500));
/// let taxa: Vec<_> = fetch_descendants(&client, &policy, query).try_collect().await?;
/// # Ok(())
/// # }
/// ```
pub fn fetch_descendants<'a, A>(
    api: &'a A,
    retry: &'a RetryConfig,
    query: DescendantQuery,
) -> impl Stream<Item = Result<TaxonRecord, AppError>> + 'a
where
    A: TaxaApi + ?Sized,
{
    let pager = Pager::new(api, retry, query);

    stream::try_unfold(pager, |mut pager| async move {
        let page = pager.next_page().await?;
        Ok::<_, AppError>(page.map(|records| (records, pager)))
    })
    .map_ok(|records| stream::iter(records.into_iter().map(Ok::<TaxonRecord, AppError>)))
    .try_flatten()
}

/// Every taxon observed below `taxon_id` within `place_id`.
///
/// The regional endpoint returns its whole result in one response, so this
/// makes exactly one (retried) call. `on_page` fires once with
/// `(1, results.len())`.
pub async fn fetch_regional_taxa<A>(
    api: &A,
    retry: &RetryConfig,
    taxon_id: i64,
    place_id: i64,
    quality_grade: Option<&str>,
    on_page: Option<&mut (dyn FnMut(u32, usize) + Send)>,
) -> Result<Vec<RegionalTaxon>, AppError>
where
    A: TaxaApi + ?Sized,
{
    let results = with_retry(retry, || {
        api.get_regional_taxonomy(taxon_id, place_id, quality_grade)
    })
    .await?;

    tracing::debug!(
        taxon_id,
        place_id,
        count = results.len(),
        "Regional taxonomy fetched"
    );

    if let Some(callback) = on_page {
        callback(1, results.len());
    }

    Ok(results)
}

/// Full records for `ids`, fetched `batch_size` at a time.
///
/// Batches are requested in order and their results concatenated. After each
/// batch `on_batch` receives `(completed, total)`, with `completed` counted
/// from 1. IDs the service does not return are simply absent.
///
/// # Errors
///
/// Returns `AppError::ValidationError` if `batch_size` is zero, or the first
/// error from any batch.
pub async fn fetch_taxa_batch<A>(
    api: &A,
    retry: &RetryConfig,
    ids: &[i64],
    batch_size: usize,
    mut on_batch: Option<&mut (dyn FnMut(usize, usize) + Send)>,
) -> Result<Vec<TaxonRecord>, AppError>
where
    A: TaxaApi + ?Sized,
{
    if batch_size == 0 {
        return Err(AppError::ValidationError(
            "Batch size must be at least 1".to_string(),
        ));
    }

    let total = ids.len().div_ceil(batch_size);
    let mut records = Vec::with_capacity(ids.len());

    for (index, chunk) in ids.chunks(batch_size).enumerate() {
        let batch = with_retry(retry, || api.get_taxa_by_ids(chunk)).await?;
        records.extend(batch);

        if let Some(callback) = on_batch.as_deref_mut() {
            callback(index + 1, total);
        }
    }

    Ok(records)
}
