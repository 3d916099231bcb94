use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("authentication rejected: {0}")]
    LoginError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("unexpected API response")]
    UnexpectedApiResponse,
    #[error("invalid response ({1}): {0}")]
    InvalidResponse(String, String),
    #[error("rate limit exceeded: {0}")]
    RateExceeded(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("malformed data: {0}")]
    MalformedData(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no successful refresh yet")]
    NotReady,
    #[error("format error")]
    FormatError,
    #[error("internal error")]
    InternalError,
}

impl Error {
    /// Errors a tier recovers from on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::LoginError(_)
                | Error::ApiError(_)
                | Error::UnexpectedApiResponse
                | Error::InvalidResponse(_, _)
                | Error::RateExceeded(_)
                | Error::Timeout(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Configuration(error.to_string())
    }
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::NotReady => {
                let error = "<html><body><h3>503 Service Unavailable</h3>No telemetry has been fetched yet</body></html>".to_string();
                Response::build()
                    .status(Status::ServiceUnavailable)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
            Error::RateExceeded(s) => {
                let error = format!("<html><body><h3>429 Too Many Requests</h3>Upstream API response: <code>{}</code></body></html>", s);
                Response::build()
                    .status(Status::TooManyRequests)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
            _ => {
                let error = format!(
                    "<html><body><h3>Unknown exception</h3><code>{}</code></body></html>",
                    self
                );
                Response::build()
                    .status(Status::InternalServerError)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
        }
    }
}
