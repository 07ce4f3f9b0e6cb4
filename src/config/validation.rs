//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Detect provider id collisions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Service fragments are not validated here; the compiler owns that and
//!   reports them per fragment

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::lifecycle::startup::STATIC_PROVIDER;

/// One semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("provider name {0:?} is used more than once")]
    DuplicateProvider(String),

    #[error("provider name must not be empty")]
    EmptyProviderName,

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingApiKey,
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Validate `config`, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_secs"));
    }

    let mut names = HashSet::from([STATIC_PROVIDER.to_string()]);
    for file in &config.providers.file {
        if file.name.trim().is_empty() {
            errors.push(ValidationError::EmptyProviderName);
        } else if !names.insert(file.name.clone()) {
            errors.push(ValidationError::DuplicateProvider(file.name.clone()));
        }
        if file.poll_interval_secs == 0 {
            errors.push(ValidationError::Zero("providers.file.poll_interval_secs"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FileProviderConfig;

    fn file(name: &str) -> FileProviderConfig {
        FileProviderConfig {
            name: name.to_string(),
            path: "services.toml".to_string(),
            poll_interval_secs: 1,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn test_all_errors_are_reported() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".to_string();
        config.timeouts.request_secs = 0;
        config.admin.enabled = true;
        config.providers.file = vec![file("a"), file("a"), file(STATIC_PROVIDER)];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::MissingApiKey));
        assert!(errors.contains(&ValidationError::Zero("timeouts.request_secs")));
        assert!(errors.contains(&ValidationError::DuplicateProvider("a".to_string())));
        assert!(errors.contains(&ValidationError::DuplicateProvider(STATIC_PROVIDER.to_string())));
    }
}
