//! Shared fixtures for cmdetl-gi integration tests

#![allow(dead_code)]

use cmdetl_common::{InstanceConfig, PollingConfig, ReportConfig};
use std::time::Duration;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const NS: &str = "http://www.collaboratemd.com/api/v1/";

pub fn report(report_id: &str, filter_id: &str, name: &str) -> ReportConfig {
    ReportConfig {
        report_id: report_id.to_string(),
        filter_id: filter_id.to_string(),
        name: name.to_string(),
    }
}

pub fn instance(
    key: &str,
    base_url: &str,
    accounts: &[&str],
    reports: Vec<ReportConfig>,
) -> InstanceConfig {
    InstanceConfig {
        instance_key: key.to_string(),
        api_base_url: base_url.to_string(),
        username: format!("{}-user", key),
        password: format!("{}-pass", key),
        accounts: accounts.iter().map(|a| a.to_string()).collect(),
        report_configs: reports,
    }
}

/// Millisecond delays so retries do not slow the suite down
pub fn fast_polling() -> PollingConfig {
    PollingConfig {
        running_delay: Duration::from_millis(10),
        duplicate_delay: Duration::from_millis(10),
        account_delay: Duration::from_millis(1),
        request_timeout: Duration::from_secs(5),
        max_attempts: None,
    }
}

pub fn status_body(status: &str, identifier: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ns2:ReportResponse xmlns:ns2="{}">
  <ns2:Status>{}</ns2:Status>
  <ns2:Identifier>{}</ns2:Identifier>
  <ns2:StatusMessage>{}</ns2:StatusMessage>
</ns2:ReportResponse>"#,
        NS, status, identifier, message
    )
}

pub fn run_path(account: &str, report: &ReportConfig) -> String {
    format!(
        "/customer/{}/reports/{}/filter/{}/run",
        account, report.report_id, report.filter_id
    )
}

/// Answer run requests for `account`/`report`, at most `times` times when given
pub async fn mount_run(
    server: &MockServer,
    instance: &InstanceConfig,
    account: &str,
    report: &ReportConfig,
    response: ResponseTemplate,
    times: Option<u64>,
) {
    let mock = Mock::given(method("POST"))
        .and(path(run_path(account, report)))
        .and(basic_auth(instance.username.as_str(), instance.password.as_str()))
        .respond_with(response);
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

pub fn xml(status: u16, body: String) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_string(body)
}
