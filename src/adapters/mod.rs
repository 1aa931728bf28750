pub mod access_log;
pub mod basic_auth;
pub mod error_pages;
pub mod log_writer;
pub mod pipeline;
pub mod proxy;
pub mod server;
pub mod static_files;

/// Re-export commonly used types from adapters
pub use access_log::AccessLog;
pub use basic_auth::BasicAuth;
pub use error_pages::ErrorPages;
pub use log_writer::RotatingLogWriter;
pub use proxy::ReverseProxy;
pub use static_files::StaticFiles;
