//! A processor that performs an HTTP request and captures the response.
//!
//! Supports request headers, an optional body, and asserting the response
//! status matches one of a configured set. For anything more advanced,
//! reach for a shell-command processor wrapping `curl` instead.
//!
//! # Examples
//!
//! ```rust,no_run
//! use flowline_core::{Job, SourceType, Processor};
//! use flowline_processor_http_request::{HttpRequest, Method, Header};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let processor = HttpRequest {
//!     url: "https://httpbin.org/headers".to_owned(),
//!     method: Method::Get,
//!     headers: vec![Header::new("accept", "application/json")],
//!     body: None,
//!     assert_status: vec![],
//! };
//!
//! let job = Job::new("demo", SourceType::Manual, chrono::Utc::now());
//! assert!(processor.should_process(&job).await);
//! # }
//! ```
#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use flowline_core::{Context, DataBag, Job, Processor, ProcessorError, StepResult};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::{error, fmt};
use url::Url;

/// The request configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// The URL to request.
    pub url: String,
    /// The HTTP method to use.
    pub method: Method,
    /// Headers added to the request.
    pub headers: Vec<Header>,
    /// An optional request body.
    pub body: Option<String>,
    /// If non-empty, the response status must match one of these values.
    pub assert_status: Vec<i32>,
}

/// A supported HTTP method.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// CONNECT
    Connect,
    /// DELETE
    Delete,
    /// GET
    Get,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
    /// PATCH
    Patch,
    /// POST
    Post,
    /// PUT
    Put,
    /// TRACE
    Trace,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Connect => Self::CONNECT,
            Method::Delete => Self::DELETE,
            Method::Get => Self::GET,
            Method::Head => Self::HEAD,
            Method::Options => Self::OPTIONS,
            Method::Patch => Self::PATCH,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Trace => Self::TRACE,
        }
    }
}

/// A single request header.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The header's name.
    pub name: String,
    /// The header's value.
    pub value: String,
}

impl Header {
    /// Construct a header from a name and value.
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }
}

impl HttpRequest {
    fn parsed_url(&self) -> Result<Url, Error> {
        Url::from_str(&self.url).map_err(Into::into)
    }

    fn validate(&self) -> Result<(), Error> {
        let _ = self.parsed_url()?;

        for header in &self.headers {
            let _ = header::HeaderName::from_str(header.name.as_str())?;
            let _ = header::HeaderValue::from_str(header.value.as_str())?;
        }

        Ok(())
    }

    async fn run(&self) -> Result<Option<String>, Error> {
        self.validate()?;

        let mut map = header::HeaderMap::new();
        for header in &self.headers {
            let _ = map.insert(
                header.name.as_str().parse::<header::HeaderName>()?,
                header.value.as_str().parse()?,
            );
        }

        let mut request = Client::new().request(self.method.into(), self.url.as_str()).headers(map);
        if let Some(body) = self.body.clone() {
            request = request.body(body);
        }

        let response = request.send().await?;

        let status = i32::from(response.status().as_u16());
        if !self.assert_status.is_empty() && !self.assert_status.contains(&status) {
            return Err(Error::Status(status));
        }

        let body = response.text().await?;
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(body))
        }
    }
}

#[async_trait]
impl Processor for HttpRequest {
    fn name(&self) -> &str {
        "http-request"
    }

    fn display_name(&self) -> &str {
        "HTTP Request"
    }

    fn description(&self) -> &str {
        "Performs an HTTP request and captures the response"
    }

    async fn should_process(&self, _job: &Job) -> bool {
        true
    }

    async fn process(&self, _job: &Job, _ctx: &mut Context) -> Result<StepResult, ProcessorError> {
        let now = chrono::Utc::now();
        let body = self.run().await.map_err(|err| ProcessorError::Failed(err.to_string()))?;

        let mut data = DataBag::new();
        data.set("body", json!(body));

        let mut result = StepResult::new(self.name(), now);
        result.mark_completed(data, chrono::Utc::now());
        Ok(result)
    }

    async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
        true
    }
}

/// The ways [`HttpRequest`] can fail.
#[derive(Debug)]
pub enum Error {
    /// The request itself failed (connection, TLS, decoding, ...).
    Response(reqwest::Error),
    /// A header's name or value was malformed.
    Header(String),
    /// The response status didn't match any of the asserted values.
    Status(i32),
    /// The configured URL is malformed.
    Url(url::ParseError),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(err) => write!(f, "response error: {}", err),
            Self::Url(err) => write!(f, "URL error: {}", err),
            Self::Header(err) => write!(f, "invalid header: {}", err),
            Self::Status(status) => write!(f, "invalid status code: {}", status),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Response(err) => Some(err),
            Self::Url(err) => Some(err),
            Self::Header(_) | Self::Status(_) => None,
            Self::__Unknown => unreachable!(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Response(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Url(err)
    }
}

impl From<header::InvalidHeaderName> for Error {
    fn from(err: header::InvalidHeaderName) -> Self {
        Self::Header(err.to_string())
    }
}

impl From<header::InvalidHeaderValue> for Error {
    fn from(err: header::InvalidHeaderValue) -> Self {
        Self::Header(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor_stub() -> HttpRequest {
        HttpRequest {
            url: "https://httpbin.org/status/200".to_owned(),
            method: Method::Get,
            headers: vec![],
            body: None,
            assert_status: vec![],
        }
    }

    mod validate {
        use super::*;

        #[test]
        fn test_valid_url_and_headers() {
            let mut processor = processor_stub();
            processor.headers = vec![Header::new("accept", "application/json")];

            processor.validate().unwrap();
        }

        #[test]
        fn test_invalid_url() {
            let mut processor = processor_stub();
            processor.url = "not a url".to_owned();

            assert!(matches!(processor.validate().unwrap_err(), Error::Url(_)));
        }

        #[test]
        fn test_invalid_header_name() {
            let mut processor = processor_stub();
            processor.headers = vec![Header::new("bad header\n", "value")];

            assert!(matches!(processor.validate().unwrap_err(), Error::Header(_)));
        }
    }

    // These exercise the live network path against httpbin.org, matching
    // this crate's long-standing test style.
    mod run {
        use super::*;

        #[tokio::test]
        #[ignore = "requires network access"]
        async fn test_empty_response() {
            let processor = processor_stub();
            assert!(processor.run().await.unwrap().is_none());
        }

        #[tokio::test]
        #[ignore = "requires network access"]
        async fn test_invalid_status() {
            let mut processor = processor_stub();
            processor.url = "https://httpbin.org/status/404".to_owned();
            processor.assert_status = vec![200, 201];

            let error = processor.run().await.unwrap_err();
            assert_eq!(error.to_string(), "invalid status code: 404");
        }
    }

    #[tokio::test]
    async fn test_processor_process_reports_invalid_url_as_failed() {
        let processor = HttpRequest {
            url: "not a url".to_owned(),
            method: Method::Get,
            headers: vec![],
            body: None,
            assert_status: vec![],
        };

        let job = flowline_core::Job::new(
            "demo",
            flowline_core::SourceType::Manual,
            chrono::Utc::now(),
        );
        let mut ctx = Context::new(job.id.clone(), flowline_core::Id::new());

        let err = processor.process(&job, &mut ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Failed(_)));
    }
}
