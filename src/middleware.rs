use crate::config::CompressionConfig;
use crate::decision::{RequestSignal, should_compress};
use crate::interceptor::BrotliWriter;
use crate::writer::ResponseWriter;
use std::io;
use std::sync::Arc;

/// Brotli compression around a handler that writes its response through a
/// [`ResponseWriter`].
///
/// # Example
///
/// ```
/// use http_brotli_compression::{BrotliMiddleware, RequestSignal, ResponseBuffer, ResponseWriter};
/// use http::HeaderMap;
///
/// let middleware = BrotliMiddleware::default();
/// let mut headers = HeaderMap::new();
/// headers.insert("accept-encoding", "br".parse().unwrap());
///
/// let mut response = ResponseBuffer::new();
/// middleware
///     .handle(&RequestSignal::new(&headers, "/"), &mut response, |w| {
///         w.write_string("{\"message\":\"a simple message\"}")
///     })
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(response.headers()["content-encoding"], "br");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BrotliMiddleware {
    config: Arc<CompressionConfig>,
}

impl BrotliMiddleware {
    /// Creates the middleware with the given configuration.
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Returns the configuration shared by every request.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Runs `next` once, compressing what it writes when the request allows it.
    ///
    /// When compressing, `next` receives the compressing writer and the
    /// stream is finished after it returns, setting `Content-Length` to the
    /// compressed size. If `next` panics, the stream is still finished while
    /// unwinding. HEAD requests and responses whose status forbids a body
    /// get no compressed stream. Errors closing the stream are returned; `next`'s own result
    /// is returned untouched.
    pub fn handle<W, F, T>(
        &self,
        request: &RequestSignal<'_>,
        writer: &mut W,
        next: F,
    ) -> io::Result<T>
    where
        W: ResponseWriter + ?Sized,
        F: FnOnce(&mut dyn ResponseWriter) -> T,
    {
        if request.is_head() || !should_compress(request, &self.config) {
            tracing::trace!(path = request.path, "brotli skipped");
            return Ok(next(&mut &mut *writer));
        }

        tracing::trace!(path = request.path, "brotli enabled");
        let mut brotli = BrotliWriter::new(writer, &self.config);
        let output = next(&mut brotli);
        brotli.finish()?;
        Ok(output)
    }
}
