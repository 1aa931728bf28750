//! Middleware kinds, their canonical composition order, and the pure
//! pipeline planning step.
//!
//! Planning is a pure transformation over in-memory configuration: it
//! validates the middleware set of one virtual host and returns the entries
//! in canonical order, independent of the order the configuration listed
//! them in. Construction of the actual handlers happens in the adapters.
use std::fmt;

use crate::config::models::MiddlewareConfig;

/// The closed set of middleware kinds, in no particular order. The
/// composition order is [`CANONICAL_ORDER`], never the configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
    Static,
    Proxy,
    BasicAuth,
    Log,
    Errors,
}

/// Fixed total order in which middlewares compose into a chain. Content
/// producers first, then the wrapping kinds from innermost to outermost:
/// the last entry ends up closest to the client.
pub const CANONICAL_ORDER: [MiddlewareKind; 5] = [
    MiddlewareKind::Static,
    MiddlewareKind::Proxy,
    MiddlewareKind::BasicAuth,
    MiddlewareKind::Log,
    MiddlewareKind::Errors,
];

impl MiddlewareKind {
    pub fn of(config: &MiddlewareConfig) -> Self {
        match config {
            MiddlewareConfig::Static { .. } => MiddlewareKind::Static,
            MiddlewareConfig::Proxy { .. } => MiddlewareKind::Proxy,
            MiddlewareConfig::BasicAuth { .. } => MiddlewareKind::BasicAuth,
            MiddlewareConfig::Log { .. } => MiddlewareKind::Log,
            MiddlewareConfig::Errors { .. } => MiddlewareKind::Errors,
        }
    }

    /// Static and Proxy generate the response themselves and ignore their
    /// downstream; everything else wraps and delegates.
    pub fn is_content_producing(self) -> bool {
        matches!(self, MiddlewareKind::Static | MiddlewareKind::Proxy)
    }

    fn position(self) -> usize {
        CANONICAL_ORDER
            .iter()
            .position(|k| *k == self)
            .unwrap_or(CANONICAL_ORDER.len())
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MiddlewareKind::Static => "static",
            MiddlewareKind::Proxy => "proxy",
            MiddlewareKind::BasicAuth => "basic_auth",
            MiddlewareKind::Log => "log",
            MiddlewareKind::Errors => "errors",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("duplicate middleware kind '{0}'")]
    DuplicateMiddleware(MiddlewareKind),

    #[error("at most one content-producing middleware per virtual host, found '{0}' and '{1}'")]
    MultipleContentMiddlewares(MiddlewareKind, MiddlewareKind),
}

/// Validate a virtual host's middleware set and return the entries in
/// canonical order. A set with no content-producing middleware is allowed;
/// the composed pipeline then terminates in an always-404 handler.
pub fn plan(configs: &[MiddlewareConfig]) -> Result<Vec<&MiddlewareConfig>, PipelineError> {
    let mut seen: Vec<(MiddlewareKind, &MiddlewareConfig)> = Vec::with_capacity(configs.len());
    let mut content: Option<MiddlewareKind> = None;

    for config in configs {
        let kind = MiddlewareKind::of(config);
        if seen.iter().any(|(k, _)| *k == kind) {
            return Err(PipelineError::DuplicateMiddleware(kind));
        }
        if kind.is_content_producing() {
            if let Some(first) = content {
                return Err(PipelineError::MultipleContentMiddlewares(first, kind));
            }
            content = Some(kind);
        }
        seen.push((kind, config));
    }

    seen.sort_by_key(|(kind, _)| kind.position());
    Ok(seen.into_iter().map(|(_, config)| config).collect())
}
