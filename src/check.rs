//! Explicit outcome type for operations run on behalf of a monitoring check
//!
//! Instead of intercepting failures around arbitrary calls, callers wrap an
//! operation with [`guarded`] and inspect the returned [`Outcome`].

use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use tracing::error;

/// Health reported for a guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Critical,
}

/// Result of a guarded operation: either a value or the rendered failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            status: CheckStatus::Ok,
            value: Some(value),
            error: None,
        }
    }

    pub fn critical(error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Critical,
            value: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Await `operation`, logging a failure under `label` and turning it into a
/// critical [`Outcome`].
pub async fn guarded<T, E, Fut>(label: &str, operation: Fut) -> Outcome<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match operation.await {
        Ok(value) => Outcome::ok(value),
        Err(err) => {
            error!("{}: {}", label, err);
            Outcome::critical(err.to_string())
        }
    }
}
