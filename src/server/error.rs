//! Errors surfaced by [`RunningServer::stop`](super::RunningServer::stop).

use thiserror::Error;

use crate::backend::BackendError;

/// A backend whose `close` failed.
#[derive(Debug, Error)]
#[error("closing {backend} backend failed: {source}")]
pub struct CloseFailure {
    /// `"gateway"`, `"application"` or `"controller"`.
    pub backend: &'static str,
    pub source: BackendError,
}

/// Shutdown finished but at least one backend did not close cleanly.
///
/// Every backend is asked to close regardless of earlier failures, so
/// `failures` lists each one that failed.
#[derive(Debug, Error)]
#[error("shutdown incomplete: {}", describe(.failures))]
pub struct ShutdownError {
    pub failures: Vec<CloseFailure>,
}

fn describe(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_failed_backend() {
        let err = ShutdownError {
            failures: vec![
                CloseFailure {
                    backend: "gateway",
                    source: BackendError::Close {
                        backend: "gateway",
                        reason: "broker unreachable".into(),
                    },
                },
                CloseFailure {
                    backend: "controller",
                    source: BackendError::Disconnected {
                        backend: "controller",
                    },
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("closing gateway backend failed"));
        assert!(text.contains("broker unreachable"));
        assert!(text.contains("closing controller backend failed"));
    }
}
