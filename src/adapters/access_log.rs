//! Access-log middleware.
//!
//! Request fields are captured before dispatch, the response body is wrapped
//! in a counter, and the record is written once the body finishes streaming
//! (or is dropped, when the client disconnects mid-response). Client
//! addresses are masked before they reach the log.
use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use chrono::Local;
use http::{Request, Response, Version, header::USER_AGENT};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::{
    adapters::log_writer::RotatingLogWriter,
    core::log_format::{LogRecord, LogTemplate, mask_ip},
    ports::handler::{BoxHandler, RequestHandler},
};

pub struct AccessLog {
    writer: RotatingLogWriter,
    template: Arc<LogTemplate>,
    next: BoxHandler,
}

impl AccessLog {
    pub fn new(writer: RotatingLogWriter, template: LogTemplate, next: BoxHandler) -> Self {
        Self { writer, template: Arc::new(template), next }
    }
}

#[async_trait]
impl RequestHandler for AccessLog {
    async fn handle(&self, req: Request<Body>, remote: SocketAddr) -> Response<Body> {
        let record = LogRecord {
            remote: mask_ip(remote),
            user_agent: req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string(),
            timestamp: Local::now().format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            method: req.method().to_string(),
            url: req.uri().to_string(),
            proto: proto_name(req.version()).to_string(),
            status: 0,
            size: 0,
        };

        let response = self.next.handle(req, remote).await;
        let (parts, body) = response.into_parts();
        let counting = CountingBody {
            inner: body,
            counted: 0,
            emitter: Some(Emitter {
                writer: self.writer.clone(),
                template: Arc::clone(&self.template),
                record,
                status: parts.status.as_u16(),
            }),
        };
        Response::from_parts(parts, Body::new(counting))
    }
}

fn proto_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP",
    }
}

struct Emitter {
    writer: RotatingLogWriter,
    template: Arc<LogTemplate>,
    record: LogRecord,
    status: u16,
}

impl Emitter {
    fn emit(mut self, size: u64) {
        self.record.status = self.status;
        self.record.size = size;
        let line = self.template.render(&self.record);
        if let Err(error) = self.writer.write_line(&line) {
            tracing::error!(%error, path = %self.writer.path().display(), "access log write failed");
        }
    }
}

/// Counts response body bytes and emits the log record exactly once, at
/// end-of-stream or on drop, whichever comes first.
struct CountingBody {
    inner: Body,
    counted: u64,
    emitter: Option<Emitter>,
}

impl CountingBody {
    fn finish(&mut self) {
        if let Some(emitter) = self.emitter.take() {
            emitter.emit(self.counted);
        }
    }
}

impl HttpBody for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.counted += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        self.finish();
    }
}
