use std::{error::Error as StdError, io};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        combine::CombineError, minify::MinifyError, source::SourceError,
    },
    cache::StoreError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Why a serve call could not produce the artifact.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("bad request: {reason}")]
    BadRequest { reason: String },
    #[error(transparent)]
    Minifier(#[from] MinifyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to encode artifact: {0}")]
    Encoding(#[source] io::Error),
    #[error("failed to write response body: {0}")]
    Output(#[source] io::Error),
}

impl ServeError {
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServeError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ServeError::Minifier(_)
            | ServeError::Store(_)
            | ServeError::Source(_)
            | ServeError::Encoding(_)
            | ServeError::Output(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Minimal HTML error page pointing at `docs_url`.
    pub fn page(&self, docs_url: &str) -> String {
        let status = self.status_code();
        let title = status.canonical_reason().unwrap_or("Error");
        let url = escape_html(docs_url);
        format!("<h1>{title}</h1><p>Please see <a href=\"{url}\">{url}</a>.</p>")
    }
}

impl From<CombineError> for ServeError {
    fn from(error: CombineError) -> Self {
        match error {
            CombineError::Source(err) => ServeError::Source(err),
            CombineError::Minifier(err) => ServeError::Minifier(err),
        }
    }
}

impl From<DomainError> for ServeError {
    fn from(error: DomainError) -> Self {
        ServeError::bad_request(error.to_string())
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(_) => StatusCode::BAD_REQUEST,
            AppError::Serve(err) => err.status_code(),
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(_) => "Request could not be processed",
            AppError::Serve(err) if err.is_client_error() => "Request could not be processed",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_) | InfraError::Bind { .. }) => {
                "I/O failure during request"
            }
            AppError::Serve(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_requests_are_400_and_everything_else_500() {
        assert_eq!(
            ServeError::bad_request("no sources").status_code(),
            StatusCode::BAD_REQUEST
        );
        let store = ServeError::from(StoreError::missing("abc"));
        assert_eq!(store.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_page_links_escaped_docs() {
        let page = ServeError::bad_request("x").page("https://docs.rs/a?b=1&c=<2>");
        assert_eq!(
            page,
            "<h1>Bad Request</h1><p>Please see <a href=\"https://docs.rs/a?b=1&amp;c=&lt;2&gt;\">https://docs.rs/a?b=1&amp;c=&lt;2&gt;</a>.</p>"
        );
    }

    #[test]
    fn reports_collect_the_source_chain() {
        let err = ServeError::Encoding(io::Error::other("disk full"));
        let report = ErrorReport::from_error("test", err.status_code(), &err);
        assert_eq!(
            report.messages,
            vec![
                "failed to encode artifact: disk full".to_string(),
                "disk full".to_string()
            ]
        );
    }
}
