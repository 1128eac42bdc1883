use std::time::Duration;

use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;

use crate::context::CallContext;

/// Starts one client span per redis command, as a child of the span carried
/// by the call context. Calls without an ambient span get no-op handles so
/// the request path pays nothing when tracing is off.
pub(crate) struct QuerySpans {
    tracer: BoxedTracer,
    group: String,
    max_hits: i64,
    window: Duration,
}

impl QuerySpans {
    pub fn new(group: &str, max_hits: i64, window: Duration) -> Self {
        Self {
            tracer: global::tracer("swarmlimit"),
            group: group.to_owned(),
            max_hits,
            window,
        }
    }

    pub fn start(&self, cx: &CallContext, name: &'static str) -> SpanHandle {
        let Some(parent) = cx.trace_context() else {
            return SpanHandle(None);
        };
        if !parent.has_active_span() {
            return SpanHandle(None);
        }

        let span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Client)
            .with_attributes([
                KeyValue::new("component", "skipper"),
                KeyValue::new("group", self.group.clone()),
                KeyValue::new("max_hits", self.max_hits),
                KeyValue::new("window", format!("{:?}", self.window)),
            ])
            .start_with_context(&self.tracer, parent);

        SpanHandle(Some(span))
    }
}

pub(crate) struct SpanHandle(Option<BoxedSpan>);

impl SpanHandle {
    pub fn finish(mut self, failed: bool) {
        if let Some(span) = self.0.as_mut() {
            if failed {
                span.set_status(Status::error("redis query failed"));
            }
            span.end();
        }
    }
}
