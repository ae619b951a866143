use crate::config::{CompressionConfig, ENCODING};
use crate::writer::ResponseWriter;
use http::{HeaderMap, StatusCode, header};
use std::io::{self, Write};

const BUFFER_SIZE: usize = 4096;

/// A [`ResponseWriter`] that Brotli-compresses every body byte on its way to
/// the wrapped writer.
///
/// Creating the writer announces `Content-Encoding: br` and
/// `Vary: Accept-Encoding` on the wrapped writer. The compressed stream is
/// closed and `Content-Length` is set to the compressed size exactly once,
/// either by [`finish`](Self::finish) or when the writer is dropped.
pub struct BrotliWriter<W: ResponseWriter> {
    encoder: Option<brotli::CompressorWriter<Sink<W>>>,
}

impl<W: ResponseWriter> BrotliWriter<W> {
    /// Wraps `inner`, announcing the encoding on its headers.
    pub fn new(mut inner: W, config: &CompressionConfig) -> Self {
        announce_encoding(inner.headers_mut());

        let sink = Sink {
            inner,
            header_written: false,
            forwarded: 0,
            discard: false,
            error: None,
        };

        Self {
            encoder: Some(brotli::CompressorWriter::new(
                sink,
                BUFFER_SIZE,
                config.quality(),
                config.window_size(),
            )),
        }
    }

    /// Returns the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.encoder().get_ref().inner
    }

    /// Closes the compressed stream and sets `Content-Length` on the wrapped
    /// writer to the number of compressed bytes it received.
    ///
    /// If the status forbids a body (1xx, 204, 304) and no compressed byte
    /// has reached the wrapped writer, the stream is dropped instead and
    /// `Content-Encoding` is removed.
    pub fn finish(mut self) -> io::Result<W> {
        let encoder = self
            .encoder
            .take()
            .expect("brotli encoder is present until finish");
        finalize(encoder)
    }

    fn encoder(&self) -> &brotli::CompressorWriter<Sink<W>> {
        self.encoder
            .as_ref()
            .expect("brotli encoder is present until finish")
    }

    fn encoder_mut(&mut self) -> &mut brotli::CompressorWriter<Sink<W>> {
        self.encoder
            .as_mut()
            .expect("brotli encoder is present until finish")
    }

    /// Maps an encoder error back to the sink's original error, if it had one.
    fn sink_error(&mut self, err: io::Error) -> io::Error {
        self.encoder_mut().get_mut().error.take().unwrap_or(err)
    }
}

impl<W: ResponseWriter> Write for BrotliWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder_mut()
            .write(buf)
            .map_err(|err| self.sink_error(err))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder_mut()
            .flush()
            .map_err(|err| self.sink_error(err))
    }
}

impl<W: ResponseWriter> ResponseWriter for BrotliWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.get_ref().headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.encoder_mut().get_mut().inner.headers_mut()
    }

    fn status(&self) -> StatusCode {
        self.get_ref().status()
    }

    // A length set by the handler describes the uncompressed body
    fn write_header(&mut self, status: StatusCode) {
        self.encoder_mut().get_mut().write_header(status);
    }

    fn size(&self) -> usize {
        self.get_ref().size()
    }
}

impl<W: ResponseWriter> Drop for BrotliWriter<W> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            if let Err(err) = finalize(encoder) {
                tracing::warn!(error = %err, "failed to finish brotli stream");
            }
        }
    }
}

impl<W: ResponseWriter> std::fmt::Debug for BrotliWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrotliWriter")
            .field("finished", &self.encoder.is_none())
            .finish()
    }
}

fn finalize<W: ResponseWriter>(mut encoder: brotli::CompressorWriter<Sink<W>>) -> io::Result<W> {
    let sink = encoder.get_mut();
    if sink.forwarded == 0 && is_bodiless_status(sink.inner.status()) {
        sink.discard = true;
        let mut inner = encoder.into_inner().inner;
        let headers = inner.headers_mut();
        headers.remove(header::CONTENT_ENCODING);
        headers.remove(header::CONTENT_LENGTH);
        tracing::debug!(status = %inner.status(), "brotli stream dropped for bodiless response");
        return Ok(inner);
    }

    let mut sink = encoder.into_inner();
    if let Some(err) = sink.error.take() {
        return Err(err);
    }
    sink.inner.flush()?;

    let mut inner = sink.inner;
    let len = inner.size();
    inner
        .headers_mut()
        .insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
    tracing::debug!(compressed_len = len, "brotli stream finished");

    Ok(inner)
}

/// The compressor's output, forwarding to the wrapped writer.
///
/// The first byte commits the status through [`Sink::write_header`], so a
/// stale `Content-Length` never precedes compressed bytes.
struct Sink<W> {
    inner: W,
    header_written: bool,
    /// Compressed bytes accepted by `inner`.
    forwarded: usize,
    /// Swallow output instead of forwarding it.
    discard: bool,
    error: Option<io::Error>,
}

impl<W: ResponseWriter> Sink<W> {
    fn write_header(&mut self, status: StatusCode) {
        self.inner.headers_mut().remove(header::CONTENT_LENGTH);
        self.inner.write_header(status);
        self.header_written = true;
    }

    /// Keeps the first sink error so it can be returned unchanged; the
    /// encoder only sees its kind.
    fn stash(&mut self, err: io::Error) -> io::Error {
        let kind = err.kind();
        self.error.get_or_insert(err);
        io::Error::from(kind)
    }
}

impl<W: ResponseWriter> Write for Sink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.discard {
            return Ok(buf.len());
        }
        if !self.header_written {
            let status = self.inner.status();
            self.write_header(status);
        }
        match self.inner.write(buf) {
            Ok(n) => {
                self.forwarded += n;
                Ok(n)
            }
            Err(err) => Err(self.stash(err)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.discard {
            return Ok(());
        }
        self.inner.flush().map_err(|err| self.stash(err))
    }
}

/// Marks a response head as Brotli-encoded.
pub(crate) fn announce_encoding(headers: &mut HeaderMap) {
    headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(ENCODING),
    );
    // Byte ranges would address the encoded body
    headers.remove(header::ACCEPT_RANGES);
    add_vary_accept_encoding(headers);
}

/// Statuses that never carry a body.
pub(crate) fn is_bodiless_status(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("Accept-Encoding"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ResponseBuffer;
    use std::io::Read;

    fn decompress(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    /// A writer whose body writes fail after `limit` bytes.
    #[derive(Debug)]
    struct FailingWriter {
        buffer: ResponseBuffer,
        limit: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.buffer.size() + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
            }
            self.buffer.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ResponseWriter for FailingWriter {
        fn headers(&self) -> &HeaderMap {
            self.buffer.headers()
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            self.buffer.headers_mut()
        }

        fn status(&self) -> StatusCode {
            self.buffer.status()
        }

        fn write_header(&mut self, status: StatusCode) {
            self.buffer.write_header(status)
        }

        fn size(&self) -> usize {
            self.buffer.size()
        }
    }

    #[test]
    fn test_headers_announced_on_install() {
        let mut buffer = ResponseBuffer::new();
        let writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());

        assert_eq!(writer.headers().get(header::CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(writer.headers().get(header::VARY).unwrap(), "Accept-Encoding");
        // Nothing reaches the sink before the handler writes
        assert_eq!(writer.size(), 0);
        drop(writer);
    }

    #[test]
    fn test_round_trip_and_content_length() {
        let body = "hello brotli ".repeat(200);
        let mut buffer = ResponseBuffer::new();
        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());

        writer.write_all(body.as_bytes()).unwrap();
        writer.finish().unwrap();

        assert!(buffer.size() < body.len());
        assert_eq!(
            buffer.headers().get(header::CONTENT_LENGTH).unwrap(),
            buffer.size().to_string().as_str()
        );
        assert_eq!(decompress(buffer.body()), body.as_bytes());
    }

    #[test]
    fn test_write_returns_input_length() {
        let mut buffer = ResponseBuffer::new();
        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::fast());

        assert_eq!(writer.write_string("{\"ok\":true}").unwrap(), 11);
        writer.finish().unwrap();
        assert_eq!(decompress(buffer.body()), b"{\"ok\":true}");
    }

    #[test]
    fn test_write_header_removes_content_length() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(29));

        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
        writer.write_header(StatusCode::CREATED);
        assert!(writer.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(writer.status(), StatusCode::CREATED);

        writer.write_all(b"created").unwrap();
        writer.finish().unwrap();

        assert_eq!(buffer.status(), StatusCode::CREATED);
        assert_eq!(
            buffer.headers().get(header::CONTENT_LENGTH).unwrap(),
            buffer.size().to_string().as_str()
        );
    }

    #[test]
    fn test_first_byte_removes_stale_content_length() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(1_000_000));

        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
        writer.write_all(b"no explicit status").unwrap();
        writer.flush().unwrap();
        assert!(writer.headers().get(header::CONTENT_LENGTH).is_none());
        writer.finish().unwrap();

        assert_eq!(
            buffer.headers().get(header::CONTENT_LENGTH).unwrap(),
            buffer.size().to_string().as_str()
        );
    }

    #[test]
    fn test_empty_body_is_valid_stream() {
        let mut buffer = ResponseBuffer::new();
        BrotliWriter::new(&mut buffer, &CompressionConfig::default())
            .finish()
            .unwrap();

        assert!(buffer.size() > 0);
        assert_eq!(buffer.headers().get(header::CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(
            buffer.headers().get(header::CONTENT_LENGTH).unwrap(),
            buffer.size().to_string().as_str()
        );
        assert!(decompress(buffer.body()).is_empty());
    }

    #[test]
    fn test_bodiless_status_gets_no_stream() {
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let mut buffer = ResponseBuffer::new();
            let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
            writer.headers_mut().insert(
                header::CONTENT_LENGTH,
                header::HeaderValue::from_static("0"),
            );
            writer.write_header(status);
            writer.finish().unwrap();

            assert_eq!(buffer.status(), status);
            assert_eq!(buffer.size(), 0);
            assert!(buffer.headers().get(header::CONTENT_ENCODING).is_none());
            assert!(buffer.headers().get(header::CONTENT_LENGTH).is_none());
        }
    }

    #[test]
    fn test_bodiless_status_dropped_on_drop() {
        let mut buffer = ResponseBuffer::new();
        {
            let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
            writer.write_header(StatusCode::NO_CONTENT);
        }

        assert_eq!(buffer.size(), 0);
        assert!(buffer.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_drop_finalizes() {
        let mut buffer = ResponseBuffer::new();
        {
            let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
            writer.write_all(b"dropped without finish").unwrap();
        }

        assert_eq!(decompress(buffer.body()), b"dropped without finish");
        assert_eq!(
            buffer.headers().get(header::CONTENT_LENGTH).unwrap(),
            buffer.size().to_string().as_str()
        );
    }

    #[test]
    fn test_output_order_preserved() {
        let mut buffer = ResponseBuffer::new();
        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::fast());
        let mut expected = Vec::new();
        for i in 0..500 {
            let chunk = format!("chunk-{i};");
            writer.write_all(chunk.as_bytes()).unwrap();
            expected.extend_from_slice(chunk.as_bytes());
        }
        writer.finish().unwrap();

        assert_eq!(decompress(buffer.body()), expected);
    }

    #[test]
    fn test_flush_emits_decodable_prefix() {
        let mut buffer = ResponseBuffer::new();
        let mut writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
        writer.write_all(b"partial").unwrap();
        writer.flush().unwrap();
        assert!(writer.size() > 0);
        writer.finish().unwrap();
        assert_eq!(decompress(buffer.body()), b"partial");
    }

    #[test]
    fn test_sink_error_propagates_unchanged() {
        let sink = FailingWriter {
            buffer: ResponseBuffer::new(),
            limit: 0,
        };
        let mut writer = BrotliWriter::new(sink, &CompressionConfig::default());

        let err = writer
            .write_all(b"doomed")
            .and_then(|_| writer.flush())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(err.to_string(), "peer went away");

        let err = writer.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_vary_appended_to_existing() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .headers_mut()
            .insert(header::VARY, header::HeaderValue::from_static("origin"));
        let writer = BrotliWriter::new(&mut buffer, &CompressionConfig::default());
        drop(writer);

        let vary: Vec<_> = buffer
            .headers()
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary, vec!["origin", "Accept-Encoding"]);
    }

    #[test]
    fn test_vary_not_duplicated() {
        for existing in ["accept-encoding", "*", "Origin, Accept-Encoding"] {
            let mut buffer = ResponseBuffer::new();
            buffer
                .headers_mut()
                .insert(header::VARY, header::HeaderValue::from_static(existing));
            drop(BrotliWriter::new(&mut buffer, &CompressionConfig::default()));

            assert_eq!(buffer.headers().get_all(header::VARY).iter().count(), 1);
            assert_eq!(buffer.headers().get(header::VARY).unwrap(), existing);
        }
    }

    #[test]
    fn test_accept_ranges_removed() {
        let mut buffer = ResponseBuffer::new();
        buffer
            .headers_mut()
            .insert(header::ACCEPT_RANGES, header::HeaderValue::from_static("bytes"));
        drop(BrotliWriter::new(&mut buffer, &CompressionConfig::default()));

        assert!(buffer.headers().get(header::ACCEPT_RANGES).is_none());
    }
}
