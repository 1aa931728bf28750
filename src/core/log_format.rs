//! Access-log record formatting and client address masking.
//!
//! Templates are parsed once at setup time into literal/field segments, so
//! rendering in the request path is a single pass with no re-parsing. The
//! field set is fixed; referencing anything else is a configuration error.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Default record template, resembling the common log format.
pub const COMMON_LOG_FORMAT: &str =
    r#"{remote} - {userAgent} [{timestamp}] "{method} {url} {proto}" {status} {size}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Remote,
    UserAgent,
    Timestamp,
    Method,
    Url,
    Proto,
    Status,
    Size,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "remote" => Some(Field::Remote),
            "userAgent" => Some(Field::UserAgent),
            "timestamp" => Some(Field::Timestamp),
            "method" => Some(Field::Method),
            "url" => Some(Field::Url),
            "proto" => Some(Field::Proto),
            "status" => Some(Field::Status),
            "size" => Some(Field::Size),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Field(Field),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown log field {0:?}")]
    UnknownField(String),

    #[error("unclosed '{{' in log format")]
    UnclosedField,
}

/// A parsed access-log line template with `{field}` placeholders.
#[derive(Debug, Clone)]
pub struct LogTemplate {
    segments: Vec<Segment>,
}

impl LogTemplate {
    /// Parse a template; an empty/absent format falls back to
    /// [`COMMON_LOG_FORMAT`].
    pub fn parse(format: Option<&str>) -> Result<Self, TemplateError> {
        let format = match format {
            Some(f) if !f.is_empty() => f,
            _ => COMMON_LOG_FORMAT,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = format;
        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or(TemplateError::UnclosedField)?;
            let name = &after[..close];
            let field =
                Field::parse(name).ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Field(field));
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, record: &LogRecord) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Remote) => out.push_str(&record.remote),
                Segment::Field(Field::UserAgent) => out.push_str(&record.user_agent),
                Segment::Field(Field::Timestamp) => out.push_str(&record.timestamp),
                Segment::Field(Field::Method) => out.push_str(&record.method),
                Segment::Field(Field::Url) => out.push_str(&record.url),
                Segment::Field(Field::Proto) => out.push_str(&record.proto),
                Segment::Field(Field::Status) => out.push_str(&record.status.to_string()),
                Segment::Field(Field::Size) => out.push_str(&record.size.to_string()),
            }
        }
        out
    }
}

/// One request's worth of access-log data, captured by the log middleware.
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub remote: String,
    pub user_agent: String,
    pub timestamp: String,
    pub method: String,
    pub url: String,
    pub proto: String,
    pub status: u16,
    pub size: u64,
}

/// Mask a client address before it reaches the access log: IPv4 keeps the
/// first 16 bits (255.255.0.0), IPv6 the first 56 (ffff:ffff:ffff:ff00::).
pub fn mask_ip(remote: SocketAddr) -> String {
    match remote.ip() {
        IpAddr::V4(v4) => {
            let [a, b, _, _] = v4.octets();
            Ipv4Addr::new(a, b, 0, 0).to_string()
        }
        IpAddr::V6(v6) => {
            let mut bytes = v6.octets();
            for byte in bytes.iter_mut().skip(7) {
                *byte = 0;
            }
            Ipv6Addr::from(bytes).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogRecord {
        LogRecord {
            remote: "203.0.0.0".to_string(),
            user_agent: "curl/8.0".to_string(),
            timestamp: "01/Jan/2026:00:00:00 +0000".to_string(),
            method: "GET".to_string(),
            url: "/index.html".to_string(),
            proto: "HTTP/1.1".to_string(),
            status: 200,
            size: 512,
        }
    }

    #[test]
    fn default_template_renders_common_log_line() {
        let template = LogTemplate::parse(None).unwrap();
        assert_eq!(
            template.render(&record()),
            "203.0.0.0 - curl/8.0 [01/Jan/2026:00:00:00 +0000] \"GET /index.html HTTP/1.1\" 200 512"
        );
    }

    #[test]
    fn custom_template_renders_selected_fields() {
        let template = LogTemplate::parse(Some("{status} {url}")).unwrap();
        assert_eq!(template.render(&record()), "200 /index.html");
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert_eq!(
            LogTemplate::parse(Some("{nope}")).map(|_| ()),
            Err(TemplateError::UnknownField("nope".to_string()))
        );
    }

    #[test]
    fn unclosed_field_is_rejected() {
        assert!(matches!(
            LogTemplate::parse(Some("{status")),
            Err(TemplateError::UnclosedField)
        ));
    }

    #[test]
    fn ipv4_mask_zeroes_the_low_half() {
        let addr: SocketAddr = "203.0.113.77:55555".parse().unwrap();
        assert_eq!(mask_ip(addr), "203.0.0.0");
    }

    #[test]
    fn ipv6_mask_keeps_56_bits() {
        let addr: SocketAddr = "[2001:db8:85a3:8d3f:1319:8a2e:370:7348]:443".parse().unwrap();
        assert_eq!(mask_ip(addr), "2001:db8:85a3:8d00::");
    }
}
