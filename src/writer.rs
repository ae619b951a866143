use bytes::{Bytes, BytesMut};
use http::response::Parts;
use http::{HeaderMap, Response, StatusCode};
use std::io::{self, Write};

/// The response side of an HTTP exchange, as seen by a handler.
///
/// Body bytes go through [`Write`]. Headers stay mutable for the lifetime of
/// the writer; whether late changes reach the client depends on when the
/// implementation commits its head.
pub trait ResponseWriter: Write {
    /// Returns the response headers.
    fn headers(&self) -> &HeaderMap;

    /// Returns the response headers for modification.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Returns the status that is, or will be, sent.
    fn status(&self) -> StatusCode;

    /// Commits the response status.
    fn write_header(&mut self, status: StatusCode);

    /// Returns the number of body bytes written so far.
    fn size(&self) -> usize;

    /// Writes a string as body bytes.
    fn write_string(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn status(&self) -> StatusCode {
        (**self).status()
    }

    fn write_header(&mut self, status: StatusCode) {
        (**self).write_header(status)
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn write_string(&mut self, s: &str) -> io::Result<usize> {
        (**self).write_string(s)
    }
}

/// A [`ResponseWriter`] that keeps the whole response in memory.
///
/// The head is only committed when the buffer is turned into a response, so
/// headers set after the body (such as a corrected `Content-Length`) are kept.
#[derive(Debug)]
pub struct ResponseBuffer {
    parts: Parts,
    body: BytesMut,
    header_written: bool,
}

impl ResponseBuffer {
    /// Creates an empty `200 OK` response buffer.
    pub fn new() -> Self {
        let (parts, ()) = Response::new(()).into_parts();
        Self::from_parts(parts)
    }

    /// Creates a buffer seeded with an existing response head.
    ///
    /// The status in `parts` is the default; it is not considered written.
    pub fn from_parts(parts: Parts) -> Self {
        Self {
            parts,
            body: BytesMut::new(),
            header_written: false,
        }
    }

    /// Returns the body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns true once a status was committed, explicitly or by a body write.
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Splits the buffer into its response head and body.
    pub fn into_parts(self) -> (Parts, Bytes) {
        (self.parts, self.body.freeze())
    }

    /// Converts the buffer into an `http::Response`.
    pub fn into_response(self) -> Response<Bytes> {
        let (parts, body) = self.into_parts();
        Response::from_parts(parts, body)
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for ResponseBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.header_written = true;
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    fn status(&self) -> StatusCode {
        self.parts.status
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.header_written {
            tracing::debug!(
                current = %self.parts.status,
                ignored = %status,
                "response status already written"
            );
            return;
        }
        self.parts.status = status;
        self.header_written = true;
    }

    fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    #[test]
    fn test_new_buffer_is_empty_ok() {
        let buffer = ResponseBuffer::new();
        assert_eq!(buffer.status(), StatusCode::OK);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.headers().is_empty());
        assert!(!buffer.header_written());
    }

    #[test]
    fn test_first_status_wins() {
        let mut buffer = ResponseBuffer::new();
        buffer.write_header(StatusCode::NOT_FOUND);
        buffer.write_header(StatusCode::OK);
        assert_eq!(buffer.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_body_write_commits_status() {
        let mut buffer = ResponseBuffer::new();
        buffer.write_all(b"hello").unwrap();
        assert!(buffer.header_written());

        buffer.write_header(StatusCode::CREATED);
        assert_eq!(buffer.status(), StatusCode::OK);
    }

    #[test]
    fn test_write_string_and_size() {
        let mut buffer = ResponseBuffer::new();
        assert_eq!(buffer.write_string("hello ").unwrap(), 6);
        buffer.write_all(b"world").unwrap();
        assert_eq!(buffer.size(), 11);
        assert_eq!(buffer.body(), b"hello world");
    }

    #[test]
    fn test_headers_survive_into_response() {
        let mut buffer = ResponseBuffer::new();
        buffer.write_all(b"abc").unwrap();
        buffer
            .headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(3));

        let response = buffer.into_response();
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "3");
        assert_eq!(response.body().as_ref(), b"abc");
    }

    #[test]
    fn test_from_parts_keeps_head() {
        let (parts, ()) = Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("x-id", "7")
            .body(())
            .unwrap()
            .into_parts();

        let buffer = ResponseBuffer::from_parts(parts);
        assert_eq!(buffer.status(), StatusCode::ACCEPTED);
        assert_eq!(buffer.headers().get("x-id").unwrap(), "7");
        assert!(!buffer.header_written());
    }

    #[test]
    fn test_mut_ref_forwards() {
        let mut buffer = ResponseBuffer::new();
        {
            let writer: &mut dyn ResponseWriter = &mut buffer;
            writer.write_header(StatusCode::IM_A_TEAPOT);
            writer.write_string("tea").unwrap();
            assert_eq!(ResponseWriter::size(&writer), 3);
        }
        assert_eq!(buffer.status(), StatusCode::IM_A_TEAPOT);
    }
}
