//! In-memory response representation used by the pipeline.
//!
//! Stages build and decorate a [`GatewayResponse`] instead of touching Actix
//! response types directly; the catch-all route converts the finished value
//! into an `HttpResponse` once the chain returns. Keeping the chain free of
//! framework types lets the whole pipeline run in plain async tests.

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::{HttpResponse, HttpResponseBuilder};

/// The response a pipeline run produces: status, headers and a buffered body.
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    /// Empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON response; serialisation of `serde_json::Value` cannot fail.
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut response = Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        };
        response.insert_header("content-type", "application/json");
        response
    }

    /// Inserts a header, replacing any previous value; invalid names or
    /// values are skipped the way the proxy's header relay skips them.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    /// Header lookup as a string, for tests and the logger stage.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Converts into an Actix response at the edge of the system.
    pub fn into_http_response(self) -> HttpResponse {
        let mut builder = HttpResponseBuilder::new(self.status);
        for (name, value) in self.headers.iter() {
            builder.insert_header((name.clone(), value.clone()));
        }
        builder.body(self.body)
    }
}
