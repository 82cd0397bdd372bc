//! Instance orchestrator
//!
//! Fans pollers out over the configured instances:
//! - within an instance, every (report, account) pair runs strictly in
//!   sequence: outer loop over `report_configs`, inner loop over `accounts`,
//!   with `account_delay` between pairs;
//! - across instances, one task per instance runs on a pool bounded by a
//!   semaphore (default `min(32, instance count)`).
//!
//! Instance tasks are isolated from each other. An error or panic inside one
//! is logged with its instance key and recorded as an incomplete
//! [`InstanceReport`]; the remaining instances carry on.

use crate::db::IdentifierLedger;
use crate::error::ReportResult;
use crate::models::{InstanceReport, ReportRequest, RunSummary};
use crate::services::report_client::{CollaborateClient, ReportApi};
use crate::services::report_poller::ReportPoller;
use cmdetl_common::{InstanceConfig, PipelineConfig, PollingConfig};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Upper bound for the default pool size
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Builds the report API client for one instance
pub type ApiFactory =
    Arc<dyn Fn(&InstanceConfig, &PollingConfig) -> ReportResult<Arc<dyn ReportApi>> + Send + Sync>;

/// Default factory: an HTTP client with the instance's credentials
pub fn http_api_factory() -> ApiFactory {
    Arc::new(|instance: &InstanceConfig, polling: &PollingConfig| {
        let client = CollaborateClient::new(instance, polling.request_timeout)?;
        Ok(Arc::new(client) as Arc<dyn ReportApi>)
    })
}

/// Pool size when none is requested
pub fn default_workers(instance_count: usize) -> usize {
    instance_count.clamp(1, MAX_DEFAULT_WORKERS)
}

/// Ordered work list of one instance
pub fn build_requests(instance: &InstanceConfig) -> Vec<ReportRequest> {
    instance
        .report_configs
        .iter()
        .flat_map(|report| {
            instance
                .accounts
                .iter()
                .map(move |account| ReportRequest::new(&instance.instance_key, account, report))
        })
        .collect()
}

pub struct InstanceOrchestrator {
    config: Arc<PipelineConfig>,
    ledger: Arc<dyn IdentifierLedger>,
    api_factory: ApiFactory,
    workers: usize,
}

impl InstanceOrchestrator {
    pub fn new(config: PipelineConfig, ledger: Arc<dyn IdentifierLedger>) -> Self {
        let workers = default_workers(config.instances.len());
        Self {
            config: Arc::new(config),
            ledger,
            api_factory: http_api_factory(),
            workers,
        }
    }

    /// Override the pool size (`None` keeps the default)
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.workers = workers.max(1);
        }
        self
    }

    pub fn with_api_factory(mut self, api_factory: ApiFactory) -> Self {
        self.api_factory = api_factory;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every instance to completion
    pub async fn run(&self) -> RunSummary {
        let run_id = Uuid::new_v4();
        let run_span = info_span!("run", %run_id);

        info!(
            parent: &run_span,
            instances = self.config.instances.len(),
            workers = self.workers,
            "Starting report identifier generation"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = InstanceTasks::new();

        for instance in self.config.instances.values() {
            let instance = instance.clone();
            let polling = self.config.polling.clone();
            let ledger = self.ledger.clone();
            let api_factory = self.api_factory.clone();
            let semaphore = semaphore.clone();
            let span = info_span!(parent: &run_span, "instance", instance = %instance.instance_key);

            let key = instance.instance_key.clone();
            tasks.spawn(
                key,
                async move {
                    let key = instance.instance_key.clone();

                    // Held for the whole instance: a slow instance occupies its slot
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        error!("Worker pool closed before instance could start");
                        return InstanceReport::new(&key);
                    };

                    let work = process_instance(instance, polling, ledger, api_factory);
                    match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(Ok(report)) => report,
                        Ok(Err(e)) => {
                            error!(instance = %key, error = %e, "Instance task failed");
                            InstanceReport::new(&key)
                        }
                        Err(panic) => {
                            error!(
                                instance = %key,
                                panic = %panic_message(panic.as_ref()),
                                "Instance task panicked"
                            );
                            InstanceReport::new(&key)
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut instances = Vec::with_capacity(self.config.instances.len());
        while let Some(report) = tasks.join_next().instrument(run_span.clone()).await {
            instances.push(report);
        }
        instances.sort_by(|a, b| a.instance_key.cmp(&b.instance_key));

        for report in &instances {
            info!(
                parent: &run_span,
                instance = %report.instance_key,
                registered = report.registered,
                rejected = report.rejected,
                failed = report.failed,
                exhausted = report.exhausted,
                completed = report.completed,
                "Instance finished"
            );
        }

        RunSummary { run_id, instances }
    }
}

/// Instance tasks with their keys, so a task that dies outside the panic
/// guard (cancellation, runtime shutdown) is still reported
struct InstanceTasks {
    set: JoinSet<InstanceReport>,
    keys: HashMap<task::Id, String>,
}

impl InstanceTasks {
    fn new() -> Self {
        Self {
            set: JoinSet::new(),
            keys: HashMap::new(),
        }
    }

    fn spawn<F>(&mut self, instance_key: String, work: F) -> task::AbortHandle
    where
        F: Future<Output = InstanceReport> + Send + 'static,
    {
        let handle = self.set.spawn(work);
        self.keys.insert(handle.id(), instance_key);
        handle
    }

    /// Next finished instance; `None` once every task is joined
    async fn join_next(&mut self) -> Option<InstanceReport> {
        match self.set.join_next_with_id().await? {
            Ok((id, report)) => {
                self.keys.remove(&id);
                Some(report)
            }
            Err(e) => {
                let key = self.keys.remove(&e.id()).unwrap_or_default();
                error!(instance = %key, error = %e, "Instance task did not complete");
                Some(InstanceReport::new(&key))
            }
        }
    }
}

/// Sequential work of one instance
async fn process_instance(
    instance: InstanceConfig,
    polling: PollingConfig,
    ledger: Arc<dyn IdentifierLedger>,
    api_factory: ApiFactory,
) -> ReportResult<InstanceReport> {
    let api = api_factory(&instance, &polling)?;
    let account_delay = polling.account_delay;
    let poller = ReportPoller::new(api, ledger, polling);

    let requests = build_requests(&instance);
    if requests.is_empty() {
        warn!("Instance has no report_configs; nothing to do");
    } else {
        info!(
            reports = instance.report_configs.len(),
            accounts = instance.accounts.len(),
            "Processing instance"
        );
    }

    let mut report = InstanceReport::new(&instance.instance_key);
    for (index, request) in requests.iter().enumerate() {
        let outcome = poller.poll(request).await;
        report.record(&outcome);

        if index + 1 < requests.len() {
            tokio::time::sleep(account_delay).await;
        }
    }

    report.completed = true;
    Ok(report)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
