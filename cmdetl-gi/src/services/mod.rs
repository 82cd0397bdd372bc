//! Report pipeline services
//!
//! - `report_client`: HTTP calls against the vendor report API
//! - `response_parser`: XML status and results documents
//! - `report_poller`: per-(account, report) retry loop
//! - `instance_orchestrator`: bounded fan-out over instances
//! - `results_downloader`: consolidated CSV output for active identifiers

pub mod instance_orchestrator;
pub mod report_client;
pub mod report_poller;
pub mod response_parser;
pub mod results_downloader;

pub use instance_orchestrator::{
    build_requests, default_workers, http_api_factory, ApiFactory, InstanceOrchestrator,
};
pub use report_client::{run_payload, CollaborateClient, RawResponse, ReportApi};
pub use report_poller::ReportPoller;
pub use response_parser::{parse_results_payload, parse_status_response, API_NAMESPACE};
pub use results_downloader::{extract_csv_entries, ReportTable, ResultsDownloader};
