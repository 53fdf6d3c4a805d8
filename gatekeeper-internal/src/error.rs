use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::OnceCell;

use crate::rate_limit::RateLimitHeaders;

/// Controls whether internal error details are included in 5xx response bodies.
///
/// When false, 5xx bodies only carry a generic message. The details are
/// always logged when the error is constructed.
static DEBUG: OnceCell<bool> = OnceCell::const_new();

pub fn set_debug(debug: bool) -> Result<(), Error> {
    DEBUG.set(debug).map_err(|_| {
        Error::new(ErrorDetails::Config {
            message: "Failed to set debug mode".to_string(),
        })
    })
}

fn debug_enabled() -> bool {
    *DEBUG.get().unwrap_or(&false)
}

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We box `ErrorDetails` per the `clippy::result_large_err` lint
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    Unauthenticated,
    RateLimited {
        headers: RateLimitHeaders,
    },
    /// Only ever logged. The 200 and its headers are already on the wire when the
    /// consumer goes away, so this never becomes a response.
    StreamSinkClosed {
        sequence: u32,
    },
    Serialization {
        message: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::Unauthenticated => tracing::Level::WARN,
            ErrorDetails::RateLimited { .. } => tracing::Level::WARN,
            ErrorDetails::StreamSinkClosed { .. } => tracing::Level::DEBUG,
            ErrorDetails::Serialization { .. } => tracing::Level::ERROR,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorDetails::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            // The stream has already started with a 200 by the time this can happen
            ErrorDetails::StreamSinkClosed { .. } => StatusCode::OK,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }

    /// Fixed plain-text body sent back to the caller
    fn response_body(&self) -> String {
        match self {
            ErrorDetails::Unauthenticated => "Unauthorized".to_string(),
            ErrorDetails::RateLimited { .. } => "Rate Limit Exceeded".to_string(),
            ErrorDetails::StreamSinkClosed { .. } => String::new(),
            ErrorDetails::Serialization { .. }
            | ErrorDetails::Config { .. }
            | ErrorDetails::InternalError { .. } => {
                if debug_enabled() {
                    self.to_string()
                } else {
                    "Internal Server Error".to_string()
                }
            }
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::Unauthenticated => {
                write!(f, "Missing or malformed authorization credential")
            }
            ErrorDetails::RateLimited { headers } => write!(
                f,
                "Rate limit of {} requests per window exceeded, retry in {}s",
                headers.limit,
                headers.retry_after.unwrap_or_default()
            ),
            ErrorDetails::StreamSinkClosed { sequence } => {
                write!(f, "Stream consumer disconnected before frame {sequence}")
            }
            ErrorDetails::Serialization { message } => write!(f, "{message}"),
            ErrorDetails::Config { message } => write!(f, "{message}"),
            ErrorDetails::InternalError { message } => write!(f, "{message}"),
        }
    }
}

impl IntoResponse for Error {
    /// Convert the (already logged) error into a plain-text Axum response
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = self.0.response_body();
        let mut response = (status_code, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if let ErrorDetails::RateLimited { headers } = *self.0 {
            response.headers_mut().extend(headers.to_header_map());
        }
        response
    }
}
