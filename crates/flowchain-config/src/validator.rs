//! Configuration validation.

use crate::schema::{Config, StoreBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Retention above this is probably a typo.
const RETENTION_WARNING_THRESHOLD: usize = 100_000;

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_engine(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_logging(config, &mut result);
        result
    }

    fn validate_engine(config: &Config, result: &mut ValidationResult) {
        if config.engine.default_step_timeout_secs == Some(0) {
            result.add_warning(ValidationWarning::new(
                "engine.default_step_timeout_secs",
                "a zero timeout fails every step that does not set its own",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        match config.store.backend() {
            None => result.add_error(ValidationError::new(
                "store.backend",
                format!(
                    "Unknown store backend '{}', valid values: [\"file\", \"memory\"]",
                    config.store.backend
                ),
            )),
            Some(StoreBackend::File) if config.store.path.as_os_str().is_empty() => {
                result.add_error(ValidationError::new(
                    "store.path",
                    "path cannot be empty for the file backend",
                ));
            }
            Some(StoreBackend::Memory) if config.engine.persist => {
                result.add_warning(ValidationWarning::new(
                    "store.backend",
                    "records in the memory backend are lost when the process exits",
                ));
            }
            Some(_) => {}
        }

        if config.store.max_records_per_workflow > RETENTION_WARNING_THRESHOLD {
            result.add_warning(ValidationWarning::new(
                "store.max_records_per_workflow",
                format!(
                    "retention is very high (>{}), listing executions may be slow",
                    RETENTION_WARNING_THRESHOLD
                ),
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "level cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
