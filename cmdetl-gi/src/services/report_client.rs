//! CollaborateMD report API client
//!
//! Two calls, both `POST` with HTTP basic auth:
//! - run: `{base}/customer/{account}/reports/{report_id}/filter/{filter_id}/run`
//! - results: `{base}/customer/{account}/reports/results/{identifier}`
//!
//! The client performs exactly one request per call. Non-200 answers are
//! returned to the caller as data; only network failures are errors. Retry
//! policy belongs to the poller.

use crate::error::ReportResult;
use crate::models::ReportRequest;
use async_trait::async_trait;
use chrono::Utc;
use cmdetl_common::InstanceConfig;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("cmdetl-gi/", env!("CARGO_PKG_VERSION"));

/// Status code and body of one vendor response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Report API seam for the poller and the results downloader
#[async_trait]
pub trait ReportApi: Send + Sync {
    /// Ask the vendor to (re)generate a report
    async fn run_report(&self, request: &ReportRequest) -> ReportResult<RawResponse>;

    /// Download the output of a finished report job
    async fn fetch_results(&self, account_id: &str, identifier: &str) -> ReportResult<RawResponse>;
}

/// HTTP client for one instance's credentials
pub struct CollaborateClient {
    http_client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl CollaborateClient {
    pub fn new(instance: &InstanceConfig, timeout: Duration) -> ReportResult<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: instance.api_base_url.trim_end_matches('/').to_string(),
            username: instance.username.clone(),
            password: instance.password.clone(),
        })
    }

    pub fn run_url(&self, request: &ReportRequest) -> String {
        format!(
            "{}/customer/{}/reports/{}/filter/{}/run",
            self.base_url, request.account_id, request.report_id, request.filter_id
        )
    }

    pub fn results_url(&self, account_id: &str, identifier: &str) -> String {
        format!(
            "{}/customer/{}/reports/results/{}",
            self.base_url, account_id, identifier
        )
    }

    async fn post(&self, url: &str, body: Option<String>) -> ReportResult<RawResponse> {
        let mut builder = self
            .http_client
            .post(url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/xml")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(url = %url, status, bytes = body.len(), "Report API response");

        Ok(RawResponse { status, body })
    }
}

/// `<Run>` body; the nonce makes every request distinct upstream
pub fn run_payload() -> String {
    let now = Utc::now();
    format!(
        "<Run><Nonce>{}.{:06}</Nonce></Run>",
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

#[async_trait]
impl ReportApi for CollaborateClient {
    async fn run_report(&self, request: &ReportRequest) -> ReportResult<RawResponse> {
        let url = self.run_url(request);
        self.post(&url, Some(run_payload())).await
    }

    async fn fetch_results(&self, account_id: &str, identifier: &str) -> ReportResult<RawResponse> {
        let url = self.results_url(account_id, identifier);
        self.post(&url, None).await
    }
}
