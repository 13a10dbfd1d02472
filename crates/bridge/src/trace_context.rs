//! Joins the worker's per-frame span to the producer's trace. The span
//! context travels in `FrameTask` since the pixels never leave the ring.

use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl From<&SpanContext> for TraceContext {
    fn from(cx: &SpanContext) -> Self {
        Self {
            trace_id: u128::from_be_bytes(cx.trace_id().to_bytes()),
            span_id: u64::from_be_bytes(cx.span_id().to_bytes()),
            sampled: cx.is_sampled(),
        }
    }
}

impl TraceContext {
    /// Context of the span the caller is in. `None` outside a span or when
    /// no OpenTelemetry layer is installed.
    pub fn from_current() -> Option<Self> {
        let cx = tracing::Span::current().context();
        let span = cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self::from(span_context))
    }

    pub fn span_context(&self) -> SpanContext {
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        SpanContext::new(
            TraceId::from_bytes(self.trace_id.to_be_bytes()),
            SpanId::from_bytes(self.span_id.to_be_bytes()),
            flags,
            true,
            TraceState::default(),
        )
    }

    /// Parent `span` under the producer's span.
    pub fn attach_to(&self, span: &tracing::Span) {
        let parent = opentelemetry::Context::new().with_remote_span_context(self.span_context());
        // Fails only for spans without an OpenTelemetry layer.
        let _ = span.set_parent(parent);
    }
}
