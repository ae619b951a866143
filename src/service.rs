use crate::config::CompressionConfig;
use crate::decision::{RequestSignal, should_compress};
use crate::future::ResponseFuture;
use bytes::Buf;
use http::Request;
use http_body::Body;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that Brotli-compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct BrotliService<S> {
    inner: S,
    config: Arc<CompressionConfig>,
}

impl<S> BrotliService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, config: Arc<CompressionConfig>) -> Self {
        Self { inner, config }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for BrotliService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: Body,
    ResBody::Data: Buf,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let signal = RequestSignal::from_request(&req);
        // A HEAD response has no body to encode
        let compress = !signal.is_head() && should_compress(&signal, &self.config);
        tracing::trace!(path = req.uri().path(), compress, "brotli decision");

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, compress.then(|| Arc::clone(&self.config)))
    }
}
