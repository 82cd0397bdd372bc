//! Configuration file loading and path resolution
//!
//! Tests that touch process environment or the working directory are marked
//! `#[serial]` so they never interleave.

use cmdetl_common::config::{resolve_config_path, CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use cmdetl_common::{Error, PipelineConfig};
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG: &str = r#"
[postgres]
host = "localhost"
user = "etl"
password = "file-secret"
database = "warehouse"
schema = "dw_data"

[polling]
running_delay_secs = 45
max_attempts = 20

[instances.vantage]
api_base_url = "https://webapi.collaboratemd.com/v1/"
username = "vantage_user"
password = "vantage_pass"
accounts = ["10031998"]
report_configs = [
    { report_id = "10062054", filter_id = "10137065", name = "ar_aging" },
]
"#;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(&path, content).unwrap();
    path
}

/// Restores the working directory when dropped
struct CwdGuard(PathBuf);

impl CwdGuard {
    fn enter(dir: &Path) -> Self {
        let previous = env::current_dir().unwrap();
        env::set_current_dir(dir).unwrap();
        CwdGuard(previous)
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.0);
    }
}

#[test]
#[serial]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), CONFIG);

    let config = PipelineConfig::load(&path).unwrap();

    assert_eq!(config.polling.running_delay, Duration::from_secs(45));
    assert_eq!(config.polling.duplicate_delay, Duration::from_secs(60));
    assert_eq!(config.polling.max_attempts, Some(20));
    let vantage = config.instance("vantage").unwrap();
    assert_eq!(vantage.api_base_url, "https://webapi.collaboratemd.com/v1");
    assert_eq!(vantage.report_configs[0].filter_id, "10137065");
}

#[test]
fn test_load_missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PipelineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("absent.toml")));
}

#[test]
#[serial]
fn test_process_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), CONFIG);

    env::set_var("POSTGRES_PASSWORD", "env-secret");
    env::set_var("INSTANCE_VANTAGE_USERNAME", "env-user");
    let result = PipelineConfig::load(&path);
    env::remove_var("POSTGRES_PASSWORD");
    env::remove_var("INSTANCE_VANTAGE_USERNAME");

    let config = result.unwrap();
    assert_eq!(config.postgres.password, "env-secret");
    assert_eq!(config.instance("vantage").unwrap().username, "env-user");
}

#[test]
#[serial]
fn test_validation_lists_every_problem() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[postgres]
host = "localhost"

[instances.broken]
api_base_url = "https://example.test"
accounts = []
"#,
    );

    match PipelineConfig::load(&path) {
        Err(Error::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("missing database")));
            assert!(errors.iter().any(|e| e.contains("'broken'") && e.contains("username")));
            assert!(errors.iter().any(|e| e.contains("'broken'") && e.contains("accounts")));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_resolve_prefers_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")));
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved.unwrap(), PathBuf::from("/from/cli.toml"));
}

#[test]
#[serial]
fn test_resolve_uses_environment_variable() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved.unwrap(), PathBuf::from("/from/env.toml"));
}

#[test]
#[serial]
fn test_resolve_falls_back_to_working_directory() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(dir.path().join(DEFAULT_CONFIG_PATH), CONFIG).unwrap();

    let _cwd = CwdGuard::enter(dir.path());
    let resolved = resolve_config_path(None).unwrap();

    assert_eq!(resolved, PathBuf::from(DEFAULT_CONFIG_PATH));
    assert!(PipelineConfig::load(&resolved).is_ok());
}
