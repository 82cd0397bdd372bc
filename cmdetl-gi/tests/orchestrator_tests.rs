//! Orchestrator runs over several instances against mock vendor APIs

mod common;

use common::{fast_polling, instance, mount_run, report, status_body, xml};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

use cmdetl_common::{InstanceConfig, PipelineConfig, PollingConfig, PostgresConfig};
use cmdetl_gi::error::ReportResult;
use cmdetl_gi::models::ReportRequest;
use cmdetl_gi::services::{ApiFactory, RawResponse, ReportApi};
use cmdetl_gi::{InstanceOrchestrator, MemoryLedger};

/// Answers every run request with a fresh identifier after a short pause
struct SlowApi {
    latency: Duration,
}

#[async_trait]
impl ReportApi for SlowApi {
    async fn run_report(&self, request: &ReportRequest) -> ReportResult<RawResponse> {
        tokio::time::sleep(self.latency).await;
        let identifier = format!("{}-{}", request.instance_key, request.account_id);
        Ok(RawResponse {
            status: 200,
            body: status_body("SUCCESS", &identifier, ""),
        })
    }

    async fn fetch_results(
        &self,
        _account_id: &str,
        _identifier: &str,
    ) -> ReportResult<RawResponse> {
        unreachable!("orchestrator never downloads results")
    }
}

fn postgres() -> PostgresConfig {
    PostgresConfig {
        host: "localhost".to_string(),
        user: "etl".to_string(),
        password: "secret".to_string(),
        database: "warehouse".to_string(),
        port: 5432,
        schema: "dw_data".to_string(),
    }
}

fn pipeline(instances: Vec<InstanceConfig>) -> PipelineConfig {
    PipelineConfig {
        postgres: postgres(),
        polling: fast_polling(),
        instances: instances
            .into_iter()
            .map(|i| (i.instance_key.clone(), i))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[tokio::test]
async fn test_instances_write_only_their_own_rows() {
    let alpha_server = MockServer::start().await;
    let beta_server = MockServer::start().await;
    let ar = report("100", "200", "ar_aging");

    let alpha = instance("alpha", &alpha_server.uri(), &["A1", "A2"], vec![ar.clone()]);
    let beta = instance("beta", &beta_server.uri(), &["B1"], vec![ar.clone()]);

    mount_run(
        &alpha_server,
        &alpha,
        "A1",
        &ar,
        xml(200, status_body("SUCCESS", "alpha-A1", "")),
        None,
    )
    .await;
    mount_run(
        &alpha_server,
        &alpha,
        "A2",
        &ar,
        xml(200, status_body("SUCCESS", "alpha-A2", "")),
        None,
    )
    .await;
    mount_run(
        &beta_server,
        &beta,
        "B1",
        &ar,
        xml(200, status_body("SUCCESS", "beta-B1", "")),
        None,
    )
    .await;

    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = InstanceOrchestrator::new(pipeline(vec![alpha, beta]), ledger.clone())
        .with_workers(Some(2));
    assert_eq!(orchestrator.workers(), 2);

    let summary = orchestrator.run().await;
    assert!(summary.all_completed());
    assert_eq!(summary.total_registered(), 3);
    assert_eq!(summary.instance("alpha").unwrap().registered, 2);
    assert_eq!(summary.instance("beta").unwrap().registered, 1);

    let records = ledger.records().await;
    assert_eq!(records.len(), 3);
    for record in &records {
        assert!(
            record.identifier.starts_with(&record.instance_key),
            "{} written under {}",
            record.identifier,
            record.instance_key
        );
        assert!(record.is_active());
    }

    assert_eq!(alpha_server.received_requests().await.unwrap().len(), 2);
    assert_eq!(beta_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_instance_does_not_stop_others() {
    let good_server = MockServer::start().await;
    let bad_server = MockServer::start().await;
    let ar = report("1", "2", "ar_aging");

    let good = instance("good", &good_server.uri(), &["G1"], vec![ar.clone()]);
    let bad = instance("bad", &bad_server.uri(), &["X1", "X2"], vec![ar.clone()]);

    mount_run(
        &good_server,
        &good,
        "G1",
        &ar,
        xml(200, status_body("SUCCESS", "ok-1", "")),
        None,
    )
    .await;
    mount_run(&bad_server, &bad, "X1", &ar, xml(503, "unavailable".to_string()), None).await;
    mount_run(&bad_server, &bad, "X2", &ar, xml(200, "<not-closed".to_string()), None).await;

    let ledger = Arc::new(MemoryLedger::new());
    let summary = InstanceOrchestrator::new(pipeline(vec![good, bad]), ledger.clone())
        .with_workers(Some(1))
        .run()
        .await;

    let bad_report = summary.instance("bad").unwrap();
    assert!(bad_report.completed);
    assert_eq!(bad_report.failed, 2);
    assert_eq!(summary.instance("good").unwrap().registered, 1);
    assert_eq!(ledger.records().await.len(), 1);
}

#[tokio::test]
async fn test_panicking_instance_is_isolated() {
    let server = MockServer::start().await;
    let ar = report("1", "2", "ar_aging");

    let calm = instance("calm", &server.uri(), &["C1"], vec![ar.clone()]);
    let broken = instance("broken", &server.uri(), &["P1"], vec![ar.clone()]);
    mount_run(
        &server,
        &calm,
        "C1",
        &ar,
        xml(200, status_body("SUCCESS", "calm-1", "")),
        None,
    )
    .await;

    let http = cmdetl_gi::services::http_api_factory();
    let factory: ApiFactory = Arc::new(move |instance: &InstanceConfig, polling: &PollingConfig| {
        if instance.instance_key == "broken" {
            panic!("client construction exploded");
        }
        http(instance, polling)
    });

    let ledger = Arc::new(MemoryLedger::new());
    let summary = InstanceOrchestrator::new(pipeline(vec![calm, broken]), ledger.clone())
        .with_api_factory(factory)
        .run()
        .await;

    assert_eq!(summary.instances.len(), 2);
    assert!(!summary.instance("broken").unwrap().completed);
    assert!(summary.instance("calm").unwrap().completed);
    assert!(!summary.all_completed());
    assert_eq!(ledger.records().await.len(), 1);
}

#[tokio::test]
async fn test_instance_without_reports_completes() {
    let ledger = Arc::new(MemoryLedger::new());
    let idle = instance("idle", "http://127.0.0.1:9", &["A1"], vec![]);

    let summary = InstanceOrchestrator::new(pipeline(vec![idle]), ledger.clone()).run().await;

    let report = summary.instance("idle").unwrap();
    assert!(report.completed);
    assert_eq!(report.processed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_account_delay_between_pairs_only() {
    let ar = report("1", "2", "ar_aging");
    let paced = instance("paced", "http://unused.invalid", &["A1", "A2", "A3"], vec![ar]);

    let mut config = pipeline(vec![paced]);
    config.polling.account_delay = Duration::from_secs(10);

    let factory: ApiFactory = Arc::new(|_: &InstanceConfig, _: &PollingConfig| {
        let api: Arc<dyn ReportApi> = Arc::new(SlowApi {
            latency: Duration::from_millis(200),
        });
        Ok(api)
    });

    let ledger = Arc::new(MemoryLedger::new());
    let orchestrator = InstanceOrchestrator::new(config, ledger.clone()).with_api_factory(factory);

    let start = tokio::time::Instant::now();
    let summary = orchestrator.run().await;
    let elapsed = start.elapsed();

    assert_eq!(summary.instance("paced").unwrap().registered, 3);
    // Two pauses for three accounts, none after the last one
    assert!(elapsed >= Duration::from_secs(20), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(30), "elapsed {:?}", elapsed);
}
