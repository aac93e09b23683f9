use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The provider has no inventory for the requested country.
    #[error("No numbers available in {0}")]
    NoNumbersAvailable(String),
    #[error("invalid country code '{0}'")]
    InvalidCountry(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
    #[error("completion stream produced no text")]
    EmptyCompletion,
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),
}

impl AppError {
    /// Build an `Upstream` error from a non-success response, consuming its body.
    pub async fn from_response(service: &'static str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        AppError::Upstream {
            service,
            status,
            body,
        }
    }
}
