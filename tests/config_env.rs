// tests/config_env.rs
//
// File discovery through TREMOR_CONFIG_PATH and process-env layering.
// These tests mutate process env, so they run serially.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serial_test::serial;
use tremor_watch::config::{
    load_file_config_default, load_file_config_from, AppConfig, ENV_CONFIG_PATH,
};
use tremor_watch::ingest::types::SourceKind;

fn write_toml(dir: &Path, body: &str) -> std::path::PathBuf {
    let p = dir.join("tremor.toml");
    let mut f = std::fs::File::create(&p).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    p
}

#[test]
#[serial]
fn env_path_is_used_when_set() {
    let dir = tempfile::tempdir().unwrap();
    let p = write_toml(dir.path(), "lookback_hours = 12\nsources = [\"usgs\"]\n");

    std::env::set_var(ENV_CONFIG_PATH, &p);
    let file = load_file_config_default().unwrap();
    std::env::remove_var(ENV_CONFIG_PATH);

    assert_eq!(file.lookback_hours, Some(12));
    assert_eq!(file.sources, Some(vec!["usgs".to_string()]));
}

#[test]
#[serial]
fn env_path_to_missing_file_is_an_error() {
    std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/tremor.toml");
    let res = load_file_config_default();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
fn shipped_example_parses() {
    let file = load_file_config_from(Path::new("config/tremor.example.toml")).unwrap();
    assert_eq!(file.polling_interval_minutes, Some(5));
    assert_eq!(file.tracked_quakes_cap, Some(1000));
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = write_toml(dir.path(), "lookback_hours = \"six\"\n");
    assert!(load_file_config_from(&p).is_err());
}

#[test]
#[serial]
fn load_reads_process_env_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = write_toml(
        dir.path(),
        "polling_interval_minutes = 10\nlookback_hours = 3\n",
    );
    let db = dir.path().join("db.json");

    std::env::set_var(ENV_CONFIG_PATH, &p);
    std::env::set_var("DISCORD_BOT_TOKEN", "test-token");
    std::env::set_var("POLLING_INTERVAL_MINUTES", "2");
    std::env::set_var("DB_PATH", &db);
    std::env::set_var("QUAKE_SOURCES", "usgs, phivolcs");

    let cfg = AppConfig::load();

    for k in [
        ENV_CONFIG_PATH,
        "DISCORD_BOT_TOKEN",
        "POLLING_INTERVAL_MINUTES",
        "DB_PATH",
        "QUAKE_SOURCES",
    ] {
        std::env::remove_var(k);
    }

    let cfg = cfg.unwrap();
    assert_eq!(cfg.discord_token, "test-token");
    assert_eq!(cfg.poll_interval, Duration::from_secs(120));
    assert_eq!(cfg.lookback, Duration::from_secs(3 * 3600));
    assert_eq!(cfg.db_path, db);
    assert_eq!(cfg.sources, vec![SourceKind::Usgs, SourceKind::Phivolcs]);
}
