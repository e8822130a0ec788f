use thiserror::Error;

/// Failure of a single catalog query.
///
/// Errors stay local to the query key that produced them; they are stored in
/// the key's cache entry and shared with every waiter of the same request,
/// hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request could not complete (connection, DNS, timeout, aborted task).
    #[error("request failed: {message}")]
    Transport { message: String },
    /// The catalog answered with a non-success status.
    #[error("{message} (status {status})")]
    Response { status: u16, message: String },
    /// The response body did not match the expected structure.
    #[error("unexpected response shape: {message}")]
    Shape { message: String },
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn response(status: u16, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Response { .. } => "response",
            Self::Shape { .. } => "shape",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            FetchError::response(404, "Location not found").to_string(),
            "Location not found (status 404)"
        );
        assert_eq!(
            FetchError::shape("missing field `results`").to_string(),
            "unexpected response shape: missing field `results`"
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(FetchError::transport("timed out").kind(), "transport");
        assert_eq!(FetchError::response(500, "boom").kind(), "response");
        assert_eq!(FetchError::shape("bad").kind(), "shape");
    }
}
