use hidkit::config::MAX_POLL_INTERVAL_MS;
use hidkit::{BackendKind, Config, HidError};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn empty_file_gives_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.backend.kind, None);
    assert_eq!(config.read.poll_interval(), Duration::from_millis(20));
    assert_eq!(config.read.default_report_len, 64);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn partial_sections_keep_other_defaults() {
    let config = Config::from_toml_str("[read]\npoll_interval_ms = 5\n").unwrap();
    assert_eq!(config.read.poll_interval_ms, 5);
    assert_eq!(config.read.default_report_len, 64);
}

#[test]
fn poll_interval_is_bounded() {
    for bad in [0, MAX_POLL_INTERVAL_MS + 1] {
        let text = format!("[read]\npoll_interval_ms = {bad}\n");
        assert!(matches!(Config::from_toml_str(&text), Err(HidError::Config(_))));
    }
    let text = format!("[read]\npoll_interval_ms = {MAX_POLL_INTERVAL_MS}\n");
    assert!(Config::from_toml_str(&text).is_ok());
}

#[test]
fn zero_report_len_is_rejected() {
    assert!(matches!(
        Config::from_toml_str("[read]\ndefault_report_len = 0\n"),
        Err(HidError::Config(_))
    ));
}

#[test]
fn unknown_backend_name_is_rejected() {
    assert!(matches!(
        Config::from_toml_str("[backend]\nkind = \"winusb\"\n"),
        Err(HidError::Config(_))
    ));
}

#[cfg(feature = "virtual")]
#[test]
fn virtual_backend_by_name() {
    let config = Config::from_toml_str("[backend]\nkind = \"virtual\"\n").unwrap();
    assert_eq!(config.backend.kind, Some(BackendKind::Virtual));

    let mgr = hidkit::Manager::with_config(&config).unwrap();
    assert_eq!(mgr.backend_kind(), BackendKind::Virtual);
    assert!(mgr.enumerate(0, 0).unwrap().is_empty());
}

#[test]
fn backends_not_in_this_build_are_rejected() {
    for kind in BackendKind::ALL {
        if kind.is_compiled_in() {
            continue;
        }
        let text = format!("[backend]\nkind = \"{kind}\"\n");
        assert!(matches!(Config::from_toml_str(&text), Err(HidError::Config(_))));
    }
}

#[test]
fn load_from_file_and_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[logging]\nlevel = \"debug\"\n\n[read]\ndefault_report_len = 32\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.read.default_report_len, 32);

    let again = Config::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
    assert_eq!(again, config);

    assert_eq!(Config::load_or_default(Some(&path)).unwrap(), config);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, HidError::Config(_)));
}
