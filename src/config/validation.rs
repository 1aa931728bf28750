use std::net::SocketAddr;

use eyre::Result;

use crate::{
    config::models::{MiddlewareConfig, ServerConfig, VirtualHostConfig},
    core::{
        log_format::LogTemplate,
        middleware::{self, PipelineError},
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid route pattern in virtual host '{vhost}': {pattern:?} must be either {{hostname}}/path or /path")]
    InvalidPattern { vhost: String, pattern: String },

    #[error("Invalid middleware set in virtual host '{vhost}': {source}")]
    InvalidPipeline {
        vhost: String,
        source: PipelineError,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator. A failure here is fatal: a
/// misconfigured gateway must not run in a partially-correct state.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address("http.http_addr", &config.http.http_addr) {
            errors.push(e);
        }
        if config.acme.accept_tos {
            if let Err(e) =
                Self::validate_listen_address("http.https_addr", &config.http.https_addr)
            {
                errors.push(e);
            }
            if config.acme.email.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: "acme.email".to_string(),
                });
            }
        }

        if let Err(e) = config.timeouts.request_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "timeouts.request".to_string(),
                message: e.to_string(),
            });
        }
        if let Err(e) = config.timeouts.shutdown_grace_period() {
            errors.push(ValidationError::InvalidField {
                field: "timeouts.shutdown_grace".to_string(),
                message: e.to_string(),
            });
        }

        if config.virtual_hosts.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "virtual_hosts".to_string(),
            });
        }
        for (index, vhost) in config.virtual_hosts.iter().enumerate() {
            if let Err(mut vhost_errors) = Self::validate_virtual_host(index, vhost) {
                errors.append(&mut vhost_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(field: &str, address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: format!("{field} = {address}"),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080' or '0.0.0.0:80')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_virtual_host(
        index: usize,
        vhost: &VirtualHostConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let label = vhost
            .patterns
            .first()
            .cloned()
            .unwrap_or_else(|| format!("virtual_hosts[{index}]"));

        if vhost.patterns.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("virtual_hosts[{index}].patterns"),
            });
        }
        for pattern in &vhost.patterns {
            if !pattern.contains('/') {
                errors.push(ValidationError::InvalidPattern {
                    vhost: label.clone(),
                    pattern: pattern.clone(),
                });
            }
        }

        if let Err(source) = middleware::plan(&vhost.middlewares) {
            errors.push(ValidationError::InvalidPipeline {
                vhost: label.clone(),
                source,
            });
        }
        for entry in &vhost.middlewares {
            if let Err(e) = Self::validate_middleware(&label, entry) {
                errors.push(e);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_middleware(vhost: &str, entry: &MiddlewareConfig) -> ValidationResult<()> {
        match entry {
            MiddlewareConfig::Static { root, .. } => {
                if !std::path::Path::new(root).is_dir() {
                    return Err(ValidationError::InvalidField {
                        field: format!("virtual host '{vhost}' static root"),
                        message: format!("'{root}' is not a directory"),
                    });
                }
            }
            MiddlewareConfig::Proxy { upstream } => {
                Self::validate_upstream(vhost, upstream)?;
            }
            MiddlewareConfig::BasicAuth { user, .. } => {
                if user.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: format!("virtual host '{vhost}' basic_auth user"),
                    });
                }
            }
            MiddlewareConfig::Log { path, format } => {
                if path.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: format!("virtual host '{vhost}' log path"),
                    });
                }
                if let Err(e) = LogTemplate::parse(format.as_deref()) {
                    return Err(ValidationError::InvalidField {
                        field: format!("virtual host '{vhost}' log format"),
                        message: e.to_string(),
                    });
                }
            }
            MiddlewareConfig::Errors { pages } => {
                for (status, page) in pages {
                    match status.parse::<u16>() {
                        Ok(code) if code >= 400 => {}
                        Ok(_) => {
                            return Err(ValidationError::InvalidField {
                                field: format!("virtual host '{vhost}' errors page {status}"),
                                message: "only statuses >= 400 can be mapped".to_string(),
                            });
                        }
                        Err(_) => {
                            return Err(ValidationError::InvalidField {
                                field: format!("virtual host '{vhost}' errors page {status}"),
                                message: "status must be a numeric HTTP code".to_string(),
                            });
                        }
                    }
                    if page.is_empty() {
                        return Err(ValidationError::MissingField {
                            field: format!("virtual host '{vhost}' errors page {status}"),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_upstream(vhost: &str, upstream: &str) -> ValidationResult<()> {
        let parsed = url::Url::parse(upstream).map_err(|e| ValidationError::InvalidField {
            field: format!("virtual host '{vhost}' proxy upstream"),
            message: format!("'{upstream}': {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ValidationError::InvalidField {
                field: format!("virtual host '{vhost}' proxy upstream"),
                message: format!("'{upstream}' must be an absolute http(s) URL"),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let error_messages: Vec<String> = errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect();
        format!(
            "Found {} validation error(s):\n{}",
            errors.len(),
            error_messages.join("\n")
        )
    }
}
