// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Span utilities and extension traits for request tracing.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for standardized request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Span for one prediction. `engine`, `latency_ms`, `status` and
    /// `error.message` are filled in after completion.
    pub fn predict(request_id: &str) -> Span {
        info_span!(
            "predict",
            request_id = %request_id,
            engine = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }

    /// Span for one telemetry collection.
    pub fn collect(request_id: &str, samples: usize) -> Span {
        info_span!(
            "collect",
            request_id = %request_id,
            samples,
            source = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }

    /// Fresh v4 request id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
