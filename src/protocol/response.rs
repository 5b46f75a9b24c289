//! Response definitions
//!
//! Represents answers to requests. Failures are data, never errors.

use crate::error::{Result, ShelfError};
use crate::meta::Meta;

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
        }
    }
}

/// A response to a request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Entity description for OK, `{ type, message }` for ERROR
    pub payload: Meta,
}

impl Response {
    /// Create an OK response
    pub fn ok(payload: Meta) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create an ERROR response
    pub fn error(kind: &str, message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Meta::new().with("type", kind).with("message", message),
        }
    }

    /// Structured form of an error
    pub fn from_error(error: &ShelfError) -> Self {
        Self::error(error.kind(), &error.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Error type of an ERROR response
    pub fn error_kind(&self) -> Option<&str> {
        match self.status {
            Status::Ok => None,
            Status::Error => self.payload.get_str("type"),
        }
    }

    pub fn to_meta(&self) -> Meta {
        Meta::new()
            .with("status", self.status.as_str())
            .with("payload", self.payload.clone())
    }

    pub fn from_meta(meta: &Meta) -> Result<Self> {
        let status = match meta.get_str("status") {
            Some("ok") => Status::Ok,
            Some("error") => Status::Error,
            other => {
                return Err(ShelfError::Protocol(format!(
                    "Invalid response status {:?}",
                    other
                )))
            }
        };
        Ok(Self {
            status,
            payload: meta.get_node("payload").cloned().unwrap_or_default(),
        })
    }
}
