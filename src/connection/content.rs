//! Content-Type and Cache-Control selection by file extension.

use std::fmt;

/// The closed set of content types the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    TextPlain,
    TextHtml,
    TextCss,
    TextJavascript,
    ApplicationJson,
    ApplicationManifestJson,
    ApplicationWasm,
    ImagePng,
    VideoMp4,
    ApplicationOctetStream,
}

impl ContentType {
    /// Pick a type from the path's extension; unknown extensions are binary.
    pub fn for_path(path: &str) -> Self {
        if path.ends_with(".txt") {
            ContentType::TextPlain
        } else if path.ends_with(".html") {
            ContentType::TextHtml
        } else if path.ends_with(".css") {
            ContentType::TextCss
        } else if path.ends_with(".js") {
            ContentType::TextJavascript
        } else if path.ends_with(".json") {
            ContentType::ApplicationJson
        } else if path.ends_with(".webmanifest") {
            ContentType::ApplicationManifestJson
        } else if path.ends_with(".wasm") {
            ContentType::ApplicationWasm
        } else if path.ends_with(".png") {
            ContentType::ImagePng
        } else if path.ends_with(".mp4") {
            ContentType::VideoMp4
        } else {
            ContentType::ApplicationOctetStream
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::TextPlain => "text/plain; charset=utf-8",
            ContentType::TextHtml => "text/html; charset=utf-8",
            ContentType::TextCss => "text/css; charset=utf-8",
            ContentType::TextJavascript => "text/javascript; charset=utf-8",
            ContentType::ApplicationJson => "application/json; charset=utf-8",
            ContentType::ApplicationManifestJson => "application/manifest+json; charset=utf-8",
            ContentType::ApplicationWasm => "application/wasm",
            ContentType::ImagePng => "image/png",
            ContentType::VideoMp4 => "video/mp4",
            ContentType::ApplicationOctetStream => "application/octet-stream",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two caching policies the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    NoCache,
    Immutable,
}

impl CacheControl {
    /// Documents are revalidated; every other known asset type is immutable.
    pub fn for_path(path: &str) -> Self {
        match ContentType::for_path(path) {
            ContentType::TextPlain | ContentType::TextHtml | ContentType::ApplicationOctetStream => {
                CacheControl::NoCache
            }
            _ => CacheControl::Immutable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheControl::NoCache => "no-cache",
            CacheControl::Immutable => "max-age=31536000, immutable",
        }
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
