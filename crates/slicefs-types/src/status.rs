use std::fmt;

use crate::status_code::{self, status_code_t, StatusCode, TransactionCode};

/// A status value carrying a code and optional message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    /// Create a status with just a code.
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create a status with a code and a descriptive message.
    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// POSIX errno equivalent of this status.
    pub fn errno(&self) -> i32 {
        status_code::to_errno(self.code)
    }

    /// Whether the failed transaction may succeed if run again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            TransactionCode::CONFLICT | TransactionCode::TOO_OLD | TransactionCode::RETRYABLE
        )
    }

    /// Produce a description like `"Meta::NotFound(3000) file missing"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}

impl From<std::io::Error> for Status {
    fn from(e: std::io::Error) -> Self {
        Self::with_message(StatusCode::IO_ERROR, e.to_string())
    }
}

impl From<serde_json::Error> for Status {
    fn from(e: serde_json::Error) -> Self {
        Self::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::MetaCode;

    #[test]
    fn test_status_ok() {
        let s = Status::new(StatusCode::OK);
        assert!(s.is_ok());
        assert_eq!(s.errno(), 0);
        assert_eq!(s.describe(), "OK(0)");
    }

    #[test]
    fn test_status_with_message() {
        let s = Status::with_message(MetaCode::NOT_FOUND, "file not found");
        assert!(!s.is_ok());
        assert_eq!(s.message(), Some("file not found"));
        assert_eq!(s.describe(), "Meta::NotFound(3000) file not found");
        assert_eq!(s.errno(), libc::ENOENT);
    }

    #[test]
    fn test_retryable() {
        assert!(Status::new(TransactionCode::CONFLICT).is_retryable());
        assert!(Status::new(TransactionCode::TOO_OLD).is_retryable());
        assert!(!Status::new(MetaCode::EXISTS).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let e = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let s: Status = e.into();
        assert_eq!(s.code(), StatusCode::IO_ERROR);
        assert!(s.to_string().contains("disk gone"));
    }
}
