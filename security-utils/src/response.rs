use bytes::Bytes;
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use url::Url;

/// A fully read response, as handed to the response handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl NetworkResponse {
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// The media type of the `Content-Type` header, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        let value = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        value.split(';').next().map(str::trim)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }
}
