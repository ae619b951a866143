//! Brotli compression for HTTP responses.
//!
//! This crate compresses response bodies with Brotli (`br`) when the client
//! accepts it, and keeps `Content-Encoding`, `Vary` and `Content-Length`
//! consistent with the bytes actually sent. It can be used two ways:
//!
//! - [`BrotliMiddleware`] wraps a handler that writes through a
//!   [`ResponseWriter`], compressing bytes as they are written.
//! - [`BrotliLayer`] is a Tower layer over `http` services.
//!
//! # Example
//!
//! ```ignore
//! use http_brotli_compression::{BrotliLayer, CompressionConfig};
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(BrotliLayer::new(CompressionConfig::fast()))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - `Accept-Encoding` does not list `br`
//! - `Connection` contains `Upgrade`
//! - the request `Content-Type` is `text/event-stream`
//! - the path extension is one of the configured skip extensions
//!   (by default `.png`, `.gif`, `.jpeg`, `.jpg`, `.mp3`, `.mp4`)
//!
//! Both entry points additionally pass through HEAD requests. The Tower
//! layer also passes through bodiless statuses, responses that already have
//! a `Content-Encoding` or `Content-Range`, and `text/event-stream`
//! responses.
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to `br`
//! - `Vary` includes `Accept-Encoding`
//! - `Accept-Ranges` is removed
//! - `Content-Length` is removed when the status is written and set to the
//!   compressed length once the stream is finished
//!
//! The Tower layer compresses a body whole, and sets its exact
//! `Content-Length`, only when the body's length is known and within
//! [`CompressionConfig::max_buffered_len`]. Other bodies are compressed frame
//! by frame and sent without `Content-Length`.
//!
//! A response whose status forbids a body (1xx, 204, 304) never gets a
//! compressed stream.

#![deny(missing_docs)]

mod body;
mod config;
mod decision;
mod future;
mod interceptor;
mod layer;
mod middleware;
mod service;
mod writer;

pub use body::CompressionBody;
pub use config::{
    CompressionConfig, ConfigError, DEFAULT_MAX_BUFFERED_LEN, DEFAULT_SKIP_EXTENSIONS, ENCODING,
    QUALITY_RANGE, WINDOW_SIZE_RANGE,
};
pub use decision::{MIN_EXTENSION_LEN, RequestSignal, should_compress};
pub use future::ResponseFuture;
pub use interceptor::BrotliWriter;
pub use layer::BrotliLayer;
pub use middleware::BrotliMiddleware;
pub use service::BrotliService;
pub use writer::{ResponseBuffer, ResponseWriter};
