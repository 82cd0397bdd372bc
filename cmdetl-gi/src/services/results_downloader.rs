//! Report results download and CSV consolidation
//!
//! For every active identifier of an instance the vendor returns an XML
//! document whose `Data` element holds a base64 ZIP of CSV files. All CSVs of
//! one report name, across accounts, are merged into a single file with a
//! leading `customer_account` column:
//!
//! `{output_dir}/{instance_key}/{report_name}.csv`

use crate::db::IdentifierLedger;
use crate::error::{ReportError, ReportResult};
use crate::services::report_client::ReportApi;
use crate::services::response_parser::parse_results_payload;
use cmdetl_common::InstanceConfig;
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// First column of every consolidated file
pub const ACCOUNT_COLUMN: &str = "customer_account";

/// Upper bound on the buffer reserved from a ZIP entry's declared size
const MAX_ENTRY_PREALLOC: u64 = 1 << 20;

/// Rows of one report, merged across accounts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportTable {
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header including the account column, once any CSV had one
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one CSV file belonging to `account`
    ///
    /// The first header seen becomes the table header. Values are trimmed and
    /// short rows are padded to the width of their own file's header. A file
    /// without a header row contributes nothing. Returns the rows added.
    pub fn add_csv(&mut self, account: &str, data: &[u8]) -> ReportResult<usize> {
        let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut records = reader.byte_records();
        let headers: Vec<String> = match records.next() {
            Some(record) => record
                .map_err(|e| ReportError::Archive(format!("Unreadable CSV header: {}", e)))?
                .iter()
                .map(cell)
                .collect(),
            None => return Ok(0),
        };

        if self.header.is_none() {
            let mut header = Vec::with_capacity(headers.len() + 1);
            header.push(ACCOUNT_COLUMN.to_string());
            header.extend(headers.iter().cloned());
            self.header = Some(header);
        }

        let mut added = 0;
        for record in records {
            let record = record
                .map_err(|e| ReportError::Archive(format!("Unreadable CSV row: {}", e)))?;
            let mut row = Vec::with_capacity(headers.len().max(record.len()) + 1);
            row.push(account.to_string());
            row.extend(record.iter().map(cell));
            while row.len() < headers.len() + 1 {
                row.push(String::new());
            }
            self.rows.push(row);
            added += 1;
        }

        Ok(added)
    }

    /// Write header and rows to `path`, creating parent directories
    pub fn write_to(&self, path: &Path) -> ReportResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_io_error)?;
        if let Some(header) = &self.header {
            writer.write_record(header).map_err(csv_io_error)?;
        }
        for row in &self.rows {
            writer.write_record(row).map_err(csv_io_error)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn cell(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

fn csv_io_error(err: csv::Error) -> ReportError {
    ReportError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

/// `(entry name, bytes)` of every `.csv` entry of a ZIP archive
pub fn extract_csv_entries(archive: &[u8]) -> ReportResult<Vec<(String, Vec<u8>)>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ReportError::Archive(format!("Invalid ZIP archive: {}", e)))?;

    let mut entries = Vec::new();
    for index in 0..zip.len() {
        let mut file = zip
            .by_index(index)
            .map_err(|e| ReportError::Archive(format!("Invalid ZIP entry {}: {}", index, e)))?;
        if file.is_dir() || !file.name().to_ascii_lowercase().ends_with(".csv") {
            continue;
        }
        let name = file.name().to_string();
        let mut bytes = Vec::with_capacity(file.size().min(MAX_ENTRY_PREALLOC) as usize);
        file.read_to_end(&mut bytes)?;
        entries.push((name, bytes));
    }
    Ok(entries)
}

/// Downloads the active reports of an instance
pub struct ResultsDownloader {
    api: Arc<dyn ReportApi>,
    ledger: Arc<dyn IdentifierLedger>,
    output_dir: PathBuf,
}

impl ResultsDownloader {
    pub fn new(
        api: Arc<dyn ReportApi>,
        ledger: Arc<dyn IdentifierLedger>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            api,
            ledger,
            output_dir,
        }
    }

    pub fn output_path(&self, instance_key: &str, report_name: &str) -> PathBuf {
        self.output_dir
            .join(instance_key)
            .join(format!("{}.csv", report_name))
    }

    /// Download and consolidate every report with an active identifier
    ///
    /// Returns the files written. Per-account failures are logged and
    /// skipped; only ledger and output errors abort.
    pub async fn download_instance(
        &self,
        instance: &InstanceConfig,
    ) -> ReportResult<Vec<PathBuf>> {
        let key = &instance.instance_key;
        let matrix = self.ledger.active_identifiers(key).await?;

        let report_names: BTreeSet<&String> = instance
            .accounts
            .iter()
            .filter_map(|account| matrix.get(account))
            .flat_map(|reports| reports.keys())
            .collect();

        info!(instance = %key, reports = report_names.len(), "Downloading report results");

        let mut written = Vec::new();
        for report_name in report_names {
            let mut table = ReportTable::new();

            for account in &instance.accounts {
                let Some(identifier) = matrix.get(account).and_then(|r| r.get(report_name)) else {
                    continue;
                };
                match self.fetch_account(account, identifier, &mut table).await {
                    Ok(rows) => debug!(
                        account = %account,
                        report = %report_name,
                        identifier = %identifier,
                        rows,
                        "Results merged"
                    ),
                    Err(e) => warn!(
                        account = %account,
                        report = %report_name,
                        identifier = %identifier,
                        error = %e,
                        "Skipping results for account"
                    ),
                }
            }

            if table.is_empty() {
                warn!(
                    instance = %key,
                    report = %report_name,
                    "No rows downloaded; no file written"
                );
                continue;
            }

            let path = self.output_path(key, report_name);
            table.write_to(&path)?;
            info!(
                instance = %key,
                report = %report_name,
                rows = table.rows().len(),
                path = %path.display(),
                "CSV file written"
            );
            written.push(path);
        }

        Ok(written)
    }

    async fn fetch_account(
        &self,
        account: &str,
        identifier: &str,
        table: &mut ReportTable,
    ) -> ReportResult<usize> {
        let response = self.api.fetch_results(account, identifier).await?;
        if !response.is_ok() {
            return Err(ReportError::http_status(response.status, &response.body));
        }

        let Some(archive) = parse_results_payload(&response.body)? else {
            return Err(ReportError::Archive("Response carried no Data payload".to_string()));
        };

        let mut rows = 0;
        for (name, bytes) in extract_csv_entries(&archive)? {
            let added = table.add_csv(account, &bytes)?;
            debug!(entry = %name, rows = added, "CSV entry read");
            rows += added;
        }
        Ok(rows)
    }
}
