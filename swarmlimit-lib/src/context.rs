use opentelemetry::Context as TraceContext;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Per-call handle flowing through every public limiter operation.
///
/// Carries a cancellation token that the redis ops honor mid-flight, and
/// optionally the caller's trace context so per-command spans become children
/// of the request span. The convenience variants of the limiter operations use
/// [`CallContext::background`], which never cancels and carries no parent
/// span.
#[derive(Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    trace: Option<TraceContext>,
}

impl CallContext {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_trace_context(mut self, cx: TraceContext) -> Self {
        self.trace = Some(cx);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the caller abandons the request.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }
}
