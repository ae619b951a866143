use crate::config::CompressionConfig;
use crate::service::BrotliService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that Brotli-compresses HTTP response bodies.
///
/// This layer wraps services and compresses their responses when the
/// request's `Accept-Encoding`, `Connection`, `Content-Type` and path allow
/// it. Compressed responses carry an exact `Content-Length`.
#[derive(Debug, Clone, Default)]
pub struct BrotliLayer {
    config: Arc<CompressionConfig>,
}

impl BrotliLayer {
    /// Creates a new layer with the given configuration.
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Returns the configuration shared by every wrapped service.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl<S> Layer<S> for BrotliLayer {
    type Service = BrotliService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BrotliService::new(inner, Arc::clone(&self.config))
    }
}
