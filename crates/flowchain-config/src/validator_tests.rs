use super::*;
use std::path::PathBuf;

#[test]
fn test_validate_default_config() {
    let result = ConfigValidator::validate(&Config::default());
    assert!(result.is_valid());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_unknown_backend() {
    let mut config = Config::default();
    config.store.backend = "sqlite".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "store.backend"));
}

#[test]
fn test_empty_file_store_path() {
    let mut config = Config::default();
    config.store.path = PathBuf::new();

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "store.path"));
}

#[test]
fn test_memory_backend_ignores_path() {
    let mut config = Config::default();
    config.store.backend = "memory".to_string();
    config.store.path = PathBuf::new();

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "store.backend"));
}

#[test]
fn test_empty_level() {
    let mut config = Config::default();
    config.logging.level = "  ".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "logging.level"));
}

#[test]
fn test_zero_timeout_warning() {
    let mut config = Config::default();
    config.engine.default_step_timeout_secs = Some(0);

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.path == "engine.default_step_timeout_secs")
    );
}

#[test]
fn test_huge_retention_warning() {
    let mut config = Config::default();
    config.store.max_records_per_workflow = 1_000_000;

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert_eq!(result.warnings.len(), 1);
}
