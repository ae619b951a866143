use std::collections::HashSet;
use std::ops::RangeInclusive;

/// The `Content-Encoding` token produced by this crate.
pub const ENCODING: &str = "br";

/// Accepted Brotli quality levels. Higher is smaller but slower.
pub const QUALITY_RANGE: RangeInclusive<u32> = 0..=11;

/// Accepted Brotli window sizes, as log2 of the sliding window.
pub const WINDOW_SIZE_RANGE: RangeInclusive<u32> = 10..=24;

/// Extensions of media that is already entropy-dense.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[".png", ".gif", ".jpeg", ".jpg", ".mp3", ".mp4"];

/// Largest body, in bytes, that the Tower layer compresses whole before
/// sending the response head.
pub const DEFAULT_MAX_BUFFERED_LEN: u64 = 1024 * 1024;

/// Errors returned when building a [`CompressionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The quality level is outside [`QUALITY_RANGE`].
    #[error("brotli quality {0} is out of range 0..=11")]
    QualityOutOfRange(u32),
    /// The window size is outside [`WINDOW_SIZE_RANGE`].
    #[error("brotli window size {0} is out of range 10..=24")]
    WindowSizeOutOfRange(u32),
    /// A skip extension is empty or lacks its leading dot.
    #[error("skip extension {0:?} must start with '.' and name a suffix")]
    InvalidExtension(String),
}

/// Immutable compression settings shared by every request.
///
/// Values are validated on construction, so a config that exists is always
/// usable by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    quality: u32,
    window_size: u32,
    skip_extensions: HashSet<String>,
    max_buffered_len: u64,
}

impl CompressionConfig {
    /// Creates a config with the given quality and window size and the
    /// default skip extensions.
    pub fn new(quality: u32, window_size: u32) -> Result<Self, ConfigError> {
        if !QUALITY_RANGE.contains(&quality) {
            return Err(ConfigError::QualityOutOfRange(quality));
        }
        if !WINDOW_SIZE_RANGE.contains(&window_size) {
            return Err(ConfigError::WindowSizeOutOfRange(window_size));
        }

        Ok(Self {
            quality,
            window_size,
            ..Self::balanced()
        })
    }

    /// Moderate effort, suitable for live traffic.
    pub fn balanced() -> Self {
        Self::preset(4)
    }

    /// Low effort, favors latency over ratio.
    pub fn fast() -> Self {
        Self::preset(1)
    }

    fn preset(quality: u32) -> Self {
        Self {
            quality,
            window_size: 11,
            skip_extensions: DEFAULT_SKIP_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_buffered_len: DEFAULT_MAX_BUFFERED_LEN,
        }
    }

    /// Replaces the set of path extensions that are never compressed.
    ///
    /// Each extension must include its leading dot, e.g. `.webp`.
    pub fn with_skip_extensions<I, S>(mut self, extensions: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut skip = HashSet::new();
        for ext in extensions {
            let ext = ext.into();
            if ext.len() < 2 || !ext.starts_with('.') || ext[1..].contains(['.', '/']) {
                return Err(ConfigError::InvalidExtension(ext));
            }
            skip.insert(ext);
        }
        self.skip_extensions = skip;
        Ok(self)
    }

    /// Sets the largest body the Tower layer compresses whole.
    ///
    /// A body whose exact length is known and within this bound is sent with
    /// the compressed `Content-Length`. Any other body is compressed as a
    /// stream of frames and sent without one.
    pub fn with_max_buffered_len(mut self, len: u64) -> Self {
        self.max_buffered_len = len;
        self
    }

    /// Returns the Brotli quality level.
    pub fn quality(&self) -> u32 {
        self.quality
    }

    /// Returns the Brotli window size (lgwin).
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Returns true if responses for paths ending in `extension` are skipped.
    pub fn skips_extension(&self, extension: &str) -> bool {
        self.skip_extensions.contains(extension)
    }

    /// Returns the largest body the Tower layer compresses whole.
    pub fn max_buffered_len(&self) -> u64 {
        self.max_buffered_len
    }

    /// Iterates over the configured skip extensions in no particular order.
    pub fn skip_extensions(&self) -> impl Iterator<Item = &str> {
        self.skip_extensions.iter().map(String::as_str)
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::balanced()
    }
}
