//! JSON-over-HTTP client for the upstream claim stores.
//!
//! One client covers every collaborator the engine consumes: agency
//! configuration, fare transactions, the timetable, routes with their stop
//! lists, and per-trip GPS log files.

use anyhow::{Result, anyhow};
use reqwest::{Method, Request, Url};

use crate::fetch::http::{BasicClient, HttpClient};
use crate::model::{Agency, GpsLogPoint, Route, TimetableEntry, TripTransaction};

pub struct UpstreamApi<C = BasicClient> {
    base_url: String,
    api_key: Option<String>,
    client: C,
}

impl UpstreamApi<BasicClient> {
    /// Reads `CLAIM_API_BASE_URL` and `CLAIM_API_KEY` from the environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("CLAIM_API_BASE_URL")
            .map_err(|_| anyhow!("CLAIM_API_BASE_URL must be set"))?;
        let api_key = std::env::var("CLAIM_API_KEY").ok();
        Ok(Self::new(base_url, api_key, BasicClient::new()))
    }
}

impl<C: HttpClient> UpstreamApi<C> {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn request(&self, path: &str, query: &[(&str, String)]) -> Result<Request> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }

        let mut req = Request::new(Method::GET, url);
        if let Some(key) = &self.api_key {
            req.headers_mut().insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {key}")
                    .parse()
                    .map_err(|_| anyhow!("api key is not a valid header value"))?,
            );
        }
        Ok(req)
    }

    async fn fetch(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let req = self.request(path, query)?;
        let response = self
            .client
            .execute(req)
            .await
            .map_err(|e| anyhow!("request to {path} failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{path} returned status {status}: {body}"));
        }
        Ok(response)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.fetch(path, query).await?;
        response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse {path} response: {e}"))
    }

    /// Agency configuration, `None` when the id is unknown upstream.
    pub async fn agency(&self, agency_id: i64) -> Result<Option<Agency>> {
        let agencies: Vec<Agency> = self
            .fetch_json("/v1/agencies", &[("id", agency_id.to_string())])
            .await?;
        Ok(agencies.into_iter().find(|agency| agency.id == agency_id))
    }

    /// Fare transactions for the claim window, optionally narrowed to one
    /// route upstream.
    pub async fn claim_transactions(
        &self,
        agency_id: i64,
        route: Option<&str>,
        from: &str,
        to: &str,
    ) -> Result<Vec<TripTransaction>> {
        let mut query = vec![
            ("agency_id", agency_id.to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];
        if let Some(route) = route {
            query.push(("route", route.to_string()));
        }
        self.fetch_json("/v1/claims/transactions", &query).await
    }

    /// Every timetable entry of the agency; grouping happens in the engine.
    pub async fn timetable_entries(&self, agency_id: i64) -> Result<Vec<TimetableEntry>> {
        self.fetch_json("/v1/timetable", &[("agency_id", agency_id.to_string())])
            .await
    }

    /// A route with its stop list, `None` when the id is unknown.
    pub async fn route_with_stops(&self, agency_id: i64, route_id: i64) -> Result<Option<Route>> {
        let routes: Vec<Route> = self
            .fetch_json(
                &format!("/v1/routes/{route_id}"),
                &[("agency_id", agency_id.to_string())],
            )
            .await?;
        Ok(routes.into_iter().find(|route| route.id == route_id))
    }

    /// One trip's raw GPS log, stored upstream as CSV.
    pub async fn trip_log(&self, trip_id: &str) -> Result<Vec<GpsLogPoint>> {
        let response = self
            .fetch(&format!("/v1/trips/{trip_id}/log"), &[])
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read trip log body: {e}"))?;
        GpsLogPoint::parse_log_csv(&bytes)
    }
}
