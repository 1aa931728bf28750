//! HTTP Basic authentication middleware.
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body;
use base64::Engine;
use http::{
    Request, Response, StatusCode,
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
};

use crate::ports::handler::{BoxHandler, RequestHandler};

pub struct BasicAuth {
    user: String,
    password: String,
    realm: String,
    next: BoxHandler,
}

impl BasicAuth {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
        next: BoxHandler,
    ) -> Self {
        Self { user: user.into(), password: password.into(), realm: realm.into(), next }
    }

    fn credentials_match(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, password)) = decoded.split_once(':') else {
            return false;
        };
        // Single combined comparison so timing does not reveal which of the
        // two values was wrong.
        constant_time_eq(user.as_bytes(), self.user.as_bytes())
            & constant_time_eq(password.as_bytes(), self.password.as_bytes())
    }

    fn challenge(&self) -> Response<Body> {
        let mut response = Response::new(Body::from("401 unauthorized"));
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        if let Ok(value) = format!(r#"Basic realm="{}""#, self.realm).parse() {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

#[async_trait]
impl RequestHandler for BasicAuth {
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body> {
        let authorized = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|header| self.credentials_match(header));
        if authorized {
            self.next.handle(req, remote).await
        } else {
            self.challenge()
        }
    }
}

/// Byte comparison without data-dependent early exit.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for (index, byte) in a.iter().enumerate() {
        diff |= (byte ^ b.get(index).copied().unwrap_or(0)) as usize;
    }
    diff == 0
}
