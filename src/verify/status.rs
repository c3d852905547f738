//! HTTP status code mapping

use std::fmt;

use serde::{Deserialize, Serialize};

/// Symbolic reason for a non-success HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusReason {
    BadRequest,
    Forbidden,
    NotFound,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any status without a dedicated reason
    Other,
}

impl StatusReason {
    /// Maps a status code to its reason. Total over `u16`.
    ///
    /// 401 is not part of this table: callers turning a status into a result
    /// report it as unauthorized instead.
    pub fn from_status(status_code: u16) -> Self {
        match status_code {
            400 => StatusReason::BadRequest,
            403 => StatusReason::Forbidden,
            404 => StatusReason::NotFound,
            429 => StatusReason::TooManyRequests,
            500 => StatusReason::InternalServerError,
            503 => StatusReason::ServiceUnavailable,
            504 => StatusReason::GatewayTimeout,
            _ => StatusReason::Other,
        }
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::BadRequest => write!(f, "bad request"),
            StatusReason::Forbidden => write!(f, "forbidden"),
            StatusReason::NotFound => write!(f, "not found"),
            StatusReason::TooManyRequests => write!(f, "too many requests"),
            StatusReason::InternalServerError => write!(f, "internal server error"),
            StatusReason::ServiceUnavailable => write!(f, "service unavailable"),
            StatusReason::GatewayTimeout => write!(f, "gateway timeout"),
            StatusReason::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_table() {
        let table = [
            (400, StatusReason::BadRequest),
            (403, StatusReason::Forbidden),
            (404, StatusReason::NotFound),
            (429, StatusReason::TooManyRequests),
            (500, StatusReason::InternalServerError),
            (503, StatusReason::ServiceUnavailable),
            (504, StatusReason::GatewayTimeout),
        ];
        for (status, reason) in table {
            assert_eq!(StatusReason::from_status(status), reason, "status {}", status);
        }
    }

    #[test]
    fn test_unlisted_statuses_are_other() {
        for status in [0, 200, 302, 401, 418, 502, 599, u16::MAX] {
            assert_eq!(StatusReason::from_status(status), StatusReason::Other);
        }
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&StatusReason::InternalServerError).unwrap(),
            "\"internalServerError\""
        );
        assert_eq!(
            serde_json::to_string(&StatusReason::TooManyRequests).unwrap(),
            "\"tooManyRequests\""
        );
        assert_eq!(serde_json::to_string(&StatusReason::Other).unwrap(), "\"other\"");
    }
}
