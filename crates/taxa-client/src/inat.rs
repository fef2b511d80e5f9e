use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use taxa_core::config::HttpConfig;
use taxa_core::error::AppError;
use taxa_core::models::{RegionalTaxon, TaxaPage, TaxonRecord};
use url::Url;

use crate::TaxaApi;

/// Generic wrapper for iNaturalist list responses.
///
/// iNaturalist API reference: <https://api.inaturalist.org/v1/docs/>
///
/// Every v1 endpoint used here answers with:
/// ```json
/// {
///     "total_results": 1,
///     "page": 1,
///     "per_page": 30,
///     "results": [ ... ]
/// }
/// ```
#[derive(Deserialize, Debug)]
struct ResultsResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// HTTP client for the iNaturalist v1 API.
///
/// Each method issues exactly one request. Failures are classified into
/// [`AppError`] variants so that [`crate::retry::with_retry`] can decide
/// whether to try again.
///
/// # Examples
///
/// ```no_run
/// use taxa_client::{INatClient, TaxaApi};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = INatClient::new()?;
/// let page = client.list_taxa_page(47604, 1, 200, None).await?;
/// println!("Asteraceae has {} descendants", page.total_results);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct INatClient {
    client: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl INatClient {
    /// Creates a client for the public iNaturalist API.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, AppError> {
        Self::with_config(&HttpConfig::default())
    }

    /// Creates a client with an explicit base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the URL is invalid or malformed.
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn with_config(config: &HttpConfig) -> Result<Self, AppError> {
        // Url::join drops the last segment unless the base ends with '/'.
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|_| {
            AppError::ConfigError(format!("Invalid API base URL: {}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(concat!("taxa/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::ClientError(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Sends one GET request and decodes the JSON body.
    ///
    /// Classification:
    /// - timeout → `Timeout`
    /// - connection failure → `NetworkError`
    /// - HTTP 429 → `RateLimitExceeded`
    /// - HTTP 5xx → `ServerError`
    /// - any other non-success status or an undecodable body → `ClientError`
    ///
    /// A timeout or reset while the body is being read is classified like a
    /// failed send.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, AppError> {
        tracing::debug!(%url, "GET");

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimitExceeded);
        }
        if status.is_server_error() {
            return Err(AppError::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(AppError::ClientError(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        let body = resp.bytes().await.map_err(|e| self.classify_transport(e))?;

        serde_json::from_slice(&body)
            .map_err(|e| AppError::ClientError(format!("Invalid response from {}: {}", url, e)))
    }

    fn classify_transport(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {}", e))
        } else if e.is_request() || e.is_body() {
            AppError::NetworkError(e.to_string())
        } else {
            AppError::ClientError(e.to_string())
        }
    }
}

#[async_trait]
impl TaxaApi for INatClient {
    async fn list_taxa_page(
        &self,
        taxon_id: i64,
        page: u32,
        per_page: u32,
        id_above: Option<i64>,
    ) -> Result<TaxaPage, AppError> {
        let mut url = self.endpoint("taxa")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("taxon_id", &taxon_id.to_string())
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string())
                .append_pair("order_by", "id")
                .append_pair("order", "asc");
            if let Some(id) = id_above {
                query.append_pair("id_above", &id.to_string());
            }
        }

        self.get_json(url).await
    }

    async fn get_taxa_by_ids(&self, ids: &[i64]) -> Result<Vec<TaxonRecord>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = self.endpoint(&format!("taxa/{}", joined))?;

        let resp: ResultsResponse<TaxonRecord> = self.get_json(url).await?;
        Ok(resp.results)
    }

    async fn get_regional_taxonomy(
        &self,
        taxon_id: i64,
        place_id: i64,
        quality_grade: Option<&str>,
    ) -> Result<Vec<RegionalTaxon>, AppError> {
        let mut url = self.endpoint("observations/taxonomy")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("taxon_id", &taxon_id.to_string())
                .append_pair("place_id", &place_id.to_string());
            if let Some(grade) = quality_grade {
                query.append_pair("quality_grade", grade);
            }
        }

        let resp: ResultsResponse<RegionalTaxon> = self.get_json(url).await?;
        Ok(resp.results)
    }
}
