use crate::error::TransportError;
use crate::transport::{Headers, Transport};
use std::sync::Arc;

/// A transport that silently drops every frame and never reports events.
///
/// Useful for measuring the overhead of record construction and buffering
/// without any network I/O. Because it never opens, a logger using it stays
/// in `connecting` and keeps its buffer at capacity.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTransport;

impl NoopTransport {
    /// Factory-compatible constructor, ignores url and headers.
    pub fn factory(_url: &str, _headers: Option<&Headers>) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(NoopTransport))
    }
}

impl Transport for NoopTransport {
    fn send(&self, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
