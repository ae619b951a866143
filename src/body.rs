use crate::config::CompressionConfig;
use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::io::{self, Write};
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be Brotli-compressed.
    ///
    /// A compressed body is already complete: it yields the whole encoded
    /// stream, then the inner body's error if it failed, then its trailers.
    /// A streaming body encodes the inner body frame by frame. A passthrough
    /// body forwards the inner body unchanged.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Compressed body, fully encoded.
        Compressed {
            data: Option<Bytes>,
            error: Option<io::Error>,
            trailers: Option<HeaderMap>,
        },
        /// Body compressed as the inner body yields frames.
        Streaming {
            #[pin]
            inner: B,
            state: StreamState,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
    }
}

impl<B> CompressionBody<B> {
    /// Creates a compressed body from the encoded bytes.
    pub fn compressed(data: Bytes, error: Option<io::Error>, trailers: Option<HeaderMap>) -> Self {
        Self::Compressed {
            data: Some(data).filter(|data| !data.is_empty()),
            error,
            trailers,
        }
    }

    /// Creates a body that compresses `inner` as its frames arrive.
    pub fn streaming(inner: B, config: &CompressionConfig) -> Self {
        Self::Streaming {
            inner,
            state: StreamState::new(config),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }
}

/// Encoder state for a streaming body.
pub(crate) struct StreamState {
    /// Present until the inner body ends or fails.
    encoder: Option<brotli::CompressorWriter<Vec<u8>>>,
    /// Input was written since the last flush.
    unflushed: bool,
    trailers: Option<HeaderMap>,
}

impl StreamState {
    fn new(config: &CompressionConfig) -> Self {
        Self {
            encoder: Some(brotli::CompressorWriter::new(
                Vec::new(),
                STREAM_BUFFER_SIZE,
                config.quality(),
                config.window_size(),
            )),
            unflushed: false,
            trailers: None,
        }
    }

    /// Polls the inner body and encodes its data.
    ///
    /// Encoded bytes are flushed out whenever the inner body is not ready,
    /// so a slow producer never leaves its output stuck in the encoder.
    fn poll_stream<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            let Some(encoder) = self.encoder.as_mut() else {
                return Poll::Ready(self.trailers.take().map(|t| Ok(Frame::trailers(t))));
            };

            match inner.as_mut().poll_frame(cx) {
                Poll::Pending => {
                    if !self.unflushed {
                        return Poll::Pending;
                    }
                    self.unflushed = false;
                    if let Err(e) = encoder.flush() {
                        self.encoder = None;
                        return Poll::Ready(Some(Err(e)));
                    }
                    return match take_output(encoder) {
                        Some(frame) => Poll::Ready(Some(Ok(frame))),
                        None => Poll::Pending,
                    };
                }
                Poll::Ready(None) => {
                    if let Some(encoder) = self.encoder.take() {
                        let output = encoder.into_inner();
                        if !output.is_empty() {
                            return Poll::Ready(Some(Ok(Frame::data(Bytes::from(output)))));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.encoder = None;
                    return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                }
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(mut data) => {
                        while data.has_remaining() {
                            let chunk = data.chunk();
                            let len = chunk.len();
                            if let Err(e) = encoder.write_all(chunk) {
                                self.encoder = None;
                                return Poll::Ready(Some(Err(e)));
                            }
                            data.advance(len);
                        }
                        self.unflushed = true;
                        if let Some(frame) = take_output(encoder) {
                            return Poll::Ready(Some(Ok(frame)));
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

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none() && self.trailers.is_none()
    }
}

const STREAM_BUFFER_SIZE: usize = 4096;

/// Takes the bytes the encoder has produced so far, if any.
fn take_output(encoder: &mut brotli::CompressorWriter<Vec<u8>>) -> Option<Frame<Bytes>> {
    let output = encoder.get_mut();
    if output.is_empty() {
        return None;
    }
    Some(Frame::data(Bytes::from(mem::take(output))))
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => {
                // Pass through frames, converting data to Bytes
                match inner.poll_frame(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Ready(Some(Ok(frame))) => {
                        let frame = frame.map_data(|data| {
                            let mut bytes = BytesMut::with_capacity(data.remaining());
                            let mut chunk = data;
                            while chunk.has_remaining() {
                                let slice = chunk.chunk();
                                bytes.extend_from_slice(slice);
                                chunk.advance(slice.len());
                            }
                            bytes.freeze()
                        });
                        Poll::Ready(Some(Ok(frame)))
                    }
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                }
            }
            CompressionBodyProj::Streaming { inner, state } => state.poll_stream(cx, inner),
            CompressionBodyProj::Compressed {
                data,
                error,
                trailers,
            } => {
                if let Some(data) = data.take() {
                    return Poll::Ready(Some(Ok(Frame::data(data))));
                }
                if let Some(error) = error.take() {
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(trailers.take().map(|trailers| Ok(Frame::trailers(trailers))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Streaming { state, .. } => state.is_end_stream(),
            CompressionBody::Compressed {
                data,
                error,
                trailers,
            } => data.is_none() && error.is_none() && trailers.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            CompressionBody::Streaming { .. } => SizeHint::default(),
            CompressionBody::Compressed { data, .. } => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
        }
    }
}
