use crate::body::CompressionBody;
use crate::config::CompressionConfig;
use crate::decision::is_event_stream;
use crate::interceptor::{BrotliWriter, announce_encoding, is_bodiless_status};
use crate::writer::ResponseBuffer;
use bytes::{Buf, Bytes};
use http::{HeaderMap, Response, StatusCode, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::io::{self, Write};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Future for Brotli service responses.
    ///
    /// A compressed body whose exact length is known and within
    /// [`CompressionConfig::max_buffered_len`] is read to the end through a
    /// [`BrotliWriter`] before the response is yielded, so that its
    /// `Content-Length` is the exact compressed size. Any other compressed
    /// body is yielded at once and encoded frame by frame, without a
    /// `Content-Length`.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        state: State<B>,
    }
}

enum State<B> {
    /// Waiting on the inner service; holds the config if the request allows compression.
    Waiting(Option<Arc<CompressionConfig>>),
    Encoding(Encoding<B>),
    Done,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, config: Option<Arc<CompressionConfig>>) -> Self {
        Self {
            inner,
            state: State::Waiting(config),
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match this.state {
                State::Waiting(config) => {
                    let response = match this.inner.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => {
                            *this.state = State::Done;
                            return Poll::Ready(Err(e));
                        }
                        Poll::Ready(Ok(response)) => response,
                    };

                    match config.take().filter(|_| is_compressible(&response)) {
                        Some(config) if fits_buffer(&response, &config) => {
                            *this.state = State::Encoding(Encoding::new(response, &config));
                        }
                        Some(config) => {
                            *this.state = State::Done;
                            return Poll::Ready(Ok(stream_response(response, &config)));
                        }
                        None => {
                            *this.state = State::Done;
                            return Poll::Ready(Ok(response.map(CompressionBody::passthrough)));
                        }
                    }
                }
                State::Encoding(encoding) => {
                    let body_error = ready!(encoding.poll_encode(cx));
                    if let State::Encoding(encoding) = mem::replace(this.state, State::Done) {
                        return Poll::Ready(Ok(encoding.into_response(body_error)));
                    }
                }
                State::Done => panic!("`ResponseFuture` polled after completion"),
            }
        }
    }
}

/// A response whose body is being fed through the encoder.
struct Encoding<B> {
    body: Pin<Box<B>>,
    writer: BrotliWriter<ResponseBuffer>,
    trailers: Option<HeaderMap>,
}

impl<B> Encoding<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn new(response: Response<B>, config: &CompressionConfig) -> Self {
        let (parts, body) = response.into_parts();

        Self {
            body: Box::pin(body),
            writer: BrotliWriter::new(ResponseBuffer::from_parts(parts), config),
            trailers: None,
        }
    }

    /// Writes body frames into the encoder until the body ends or fails.
    fn poll_encode(&mut self, cx: &mut Context<'_>) -> Poll<Option<io::Error>> {
        loop {
            match ready!(self.body.as_mut().poll_frame(cx)) {
                None => return Poll::Ready(None),
                Some(Err(e)) => return Poll::Ready(Some(io::Error::other(e.into()))),
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(mut data) => {
                        while data.has_remaining() {
                            let chunk = data.chunk();
                            let len = chunk.len();
                            if let Err(e) = self.writer.write_all(chunk) {
                                return Poll::Ready(Some(e));
                            }
                            data.advance(len);
                        }
                    }
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            self.trailers = Some(trailers);
                        }
                    }
                },
            }
        }
    }

    /// Finishes the stream and builds the compressed response.
    fn into_response(self, body_error: Option<io::Error>) -> Response<CompressionBody<B>> {
        match self.writer.finish() {
            Ok(buffer) => {
                let (parts, data) = buffer.into_parts();
                let body = CompressionBody::compressed(data, body_error, self.trailers);
                Response::from_parts(parts, body)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to finish brotli response");
                let body = CompressionBody::compressed(Bytes::new(), Some(e), None);
                let mut response = Response::new(body);
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

/// Returns true if the body has a known length small enough to buffer.
fn fits_buffer<B: Body>(response: &Response<B>, config: &CompressionConfig) -> bool {
    response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len <= config.max_buffered_len())
}

/// Announces the encoding and wraps the body in a streaming encoder.
fn stream_response<B>(
    response: Response<B>,
    config: &CompressionConfig,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();
    announce_encoding(&mut parts.headers);
    // The encoded length is unknown until the body ends
    parts.headers.remove(header::CONTENT_LENGTH);
    tracing::trace!("brotli streaming response");

    Response::from_parts(parts, CompressionBody::streaming(body, config))
}

/// Checks the response head for reasons not to compress it.
fn is_compressible<B>(response: &Response<B>) -> bool {
    let headers = response.headers();

    !is_bodiless_status(response.status())
        && !has_content_encoding(headers)
        && !has_content_range(headers)
        && !is_streaming_content_type(headers)
}

/// Checks if Content-Encoding header is already present.
fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_ENCODING)
}

/// Checks if Content-Range header is present (range response).
fn has_content_range(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_RANGE)
}

/// Checks if the response is an unbounded event stream.
fn is_streaming_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| is_event_stream(v.as_bytes()))
}
