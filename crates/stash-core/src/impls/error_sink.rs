//! ErrorSink の実装
//!
//! - **TracingErrorSink**: tracing の `error!` に流す（デフォルト）
//! - **RecordingErrorSink**: 報告されたエラーをメモリに溜める（テスト・デモ用）

use std::sync::{Mutex, PoisonError};

use tracing::error;

use crate::domain::{ErrorKind, StashError};
use crate::ports::ErrorSink;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, origin: &str, err: &StashError) {
        error!(origin, kind = ?err.kind(), error = %err, "drain error");
    }
}

/// One reported error, flattened so it can be compared in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub origin: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<ReportedError>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ReportedError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.reports().into_iter().map(|r| r.kind).collect()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, origin: &str, err: &StashError) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReportedError {
                origin: origin.to_string(),
                kind: err.kind(),
                message: err.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PublishError;

    #[test]
    fn test_recording_sink_keeps_origin_and_kind() {
        let sink = RecordingErrorSink::new();
        sink.report("orders", &PublishError::Unreachable("down".into()).into());

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].origin, "orders");
        assert_eq!(reports[0].kind, ErrorKind::TransientDelivery);
        assert!(reports[0].message.contains("down"));
    }
}
