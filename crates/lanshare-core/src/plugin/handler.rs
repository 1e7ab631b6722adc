//! Payload handler capability.
//!
//! Handlers interpret transferred bytes (files, URLs, text, ...).  They are
//! contributed by content plugins and looked up by content type; the core
//! only needs to construct them and feed them bytes.

/// Consumes the payload of one transfer.
pub trait PayloadHandler: Send {
    /// Receives the next chunk of payload bytes, in stream order.
    fn receive(&mut self, chunk: &[u8]);

    /// Called once when the stream ends cleanly.
    fn finish(&mut self);
}

/// Builds a fresh [`PayloadHandler`] per transfer.
pub trait HandlerFactory: Send + Sync {
    /// The content type this handler accepts, e.g. `"file"`.
    fn content_type(&self) -> &str;

    fn create(&self) -> Box<dyn PayloadHandler>;
}
