//! # Image Loading and Decoding
//!
//! Turns image references into pixel data ready for PDF embedding. JPEG
//! images pass through without re-encoding (PDF supports DCTDecode
//! natively). Every other format the `image` crate reads is decoded to RGB
//! pixels with a separate alpha channel for SMask transparency.
//!
//! References are resolved through an [`ImageResolver`]. A failed lookup is
//! a value ([`ImageLookup`]), never an error: the renderer draws the element
//! without its image and carries on with the row.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use thiserror::Error;

/// Default timeout for fetching remote images.
/// Decoded images kept per resolver. A batch usually repeats a handful of
/// logos while per-row photos are used once, so only the most recent few
/// stay in memory.
pub const DECODED_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(8) {
    Some(n) => n,
    None => panic!("cache capacity must be non-zero"),
};

pub const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote images larger than this are rejected.
const MAX_REMOTE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid data URI: missing comma")]
    DataUri,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image data too short")]
    TooShort,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },
}

/// A fully decoded/loaded image ready for PDF embedding.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub pixel_data: ImagePixelData,
    pub width_px: u32,
    pub height_px: u32,
}

/// The pixel data in a format the PDF serializer can consume directly.
#[derive(Debug, Clone)]
pub enum ImagePixelData {
    /// Raw JPEG bytes, embedded directly with DCTDecode.
    Jpeg {
        data: Vec<u8>,
        color_space: JpegColorSpace,
    },
    /// Decoded RGB pixels + optional alpha channel.
    Decoded {
        /// width * height * 3 bytes (RGB)
        rgb: Vec<u8>,
        /// width * height bytes (grayscale alpha). None if fully opaque.
        alpha: Option<Vec<u8>>,
    },
}

/// JPEG color space for the PDF /ColorSpace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegColorSpace {
    DeviceRGB,
    DeviceGray,
}

/// Outcome of resolving an image reference.
#[derive(Debug, Clone)]
pub enum ImageLookup {
    Found(Arc<LoadedImage>),
    /// Nothing matched the reference.
    NotFound,
    /// Something matched but could not be read or decoded.
    Failed(String),
}

impl ImageLookup {
    pub fn image(&self) -> Option<&Arc<LoadedImage>> {
        match self {
            ImageLookup::Found(img) => Some(img),
            _ => None,
        }
    }

    fn from_result(result: Result<LoadedImage, ImageError>) -> Self {
        match result {
            Ok(img) => ImageLookup::Found(Arc::new(img)),
            Err(e) => ImageLookup::Failed(e.to_string()),
        }
    }
}

/// Finds and decodes the image an element refers to.
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> ImageLookup;
}

/// Decode a `data:image/...;base64,...` URI.
pub fn load_data_uri(src: &str) -> Result<LoadedImage, ImageError> {
    let comma_pos = src.find(',').ok_or(ImageError::DataUri)?;
    let bytes = base64_decode(&src[comma_pos + 1..])?;
    decode_image_bytes(&bytes)
}

pub fn is_data_uri(src: &str) -> bool {
    src.starts_with("data:image/")
}

pub fn is_url(src: &str) -> bool {
    let lower = src.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Read and decode an image file.
pub fn load_file(path: &Path) -> Result<LoadedImage, ImageError> {
    let bytes = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image_bytes(&bytes)
}

fn base64_decode(input: &str) -> Result<Vec<u8>, ImageError> {
    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.decode(input.trim())?)
}

/// Detect image format from magic bytes and decode accordingly.
pub fn decode_image_bytes(data: &[u8]) -> Result<LoadedImage, ImageError> {
    if data.len() < 4 {
        return Err(ImageError::TooShort);
    }
    if is_jpeg(data) {
        decode_jpeg(data)
    } else {
        decode_raster(data)
    }
}

fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// JPEG: read dimensions and color space without decoding pixels.
fn decode_jpeg(data: &[u8]) -> Result<LoadedImage, ImageError> {
    let reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(image::ImageError::IoError(e)))?;
    let (width, height) = reader.into_dimensions()?;

    Ok(LoadedImage {
        pixel_data: ImagePixelData::Jpeg {
            data: data.to_vec(),
            color_space: detect_jpeg_color_space(data),
        },
        width_px: width,
        height_px: height,
    })
}

/// Scan JPEG markers to find the SOF (Start of Frame) segment and read
/// the number of components to determine color space.
fn detect_jpeg_color_space(data: &[u8]) -> JpegColorSpace {
    let mut i = 2; // skip SOI marker (FF D8)
    while i + 1 < data.len() {
        if data[i] != 0xFF {
            break;
        }
        let marker = data[i + 1];
        // SOF markers: C0-C3, C5-C7, C9-CB, CD-CF
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof && i + 9 < data.len() {
            return if data[i + 9] == 1 {
                JpegColorSpace::DeviceGray
            } else {
                JpegColorSpace::DeviceRGB
            };
        }
        if i + 3 < data.len() {
            let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
            i += 2 + seg_len;
        } else {
            break;
        }
    }
    JpegColorSpace::DeviceRGB
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// PNG, GIF, BMP, WebP: decode to RGBA, split into RGB + alpha.
fn decode_raster(data: &[u8]) -> Result<LoadedImage, ImageError> {
    let reader = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(image::ImageError::IoError(e)))?;
    let img = reader.decode()?;

    let rgba = img.to_rgba8();
    let width = rgba.width();
    let height = rgba.height();

    let pixels = pixel_count(width, height);
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    let mut has_transparency = false;

    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel[3]);
        if pixel[3] != 255 {
            has_transparency = true;
        }
    }

    Ok(LoadedImage {
        pixel_data: ImagePixelData::Decoded {
            rgb,
            alpha: has_transparency.then_some(alpha),
        },
        width_px: width,
        height_px: height,
    })
}

/// Resolves references against the filesystem: data URIs, absolute paths,
/// paths relative to a base directory, and finally a case-insensitive file
/// name search of the base directory tree. Path lookups are memoized;
/// decoded images only for the [`DECODED_CACHE_CAPACITY`] most recent files.
pub struct FsImageResolver {
    base_dir: PathBuf,
    paths: Mutex<HashMap<String, Option<PathBuf>>>,
    images: Mutex<LruCache<PathBuf, ImageLookup>>,
}

impl FsImageResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            paths: Mutex::new(HashMap::new()),
            images: Mutex::new(LruCache::new(DECODED_CACHE_CAPACITY)),
        }
    }

    /// The file `reference` points at, if any.
    pub fn locate(&self, reference: &str) -> Option<PathBuf> {
        let key = reference.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        if let Ok(paths) = self.paths.lock() {
            if let Some(hit) = paths.get(&key) {
                return hit.clone();
            }
        }
        let found = self.search(reference.trim(), &key);
        if let Ok(mut paths) = self.paths.lock() {
            paths.insert(key, found.clone());
        }
        found
    }

    fn search(&self, reference: &str, key: &str) -> Option<PathBuf> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        let candidate = self.base_dir.join(path);
        if candidate.is_file() {
            return Some(candidate);
        }
        walkdir::WalkDir::new(&self.base_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| entry.file_name().to_string_lossy().to_lowercase() == key)
            .map(|entry| entry.into_path())
    }
}

impl ImageResolver for FsImageResolver {
    fn resolve(&self, reference: &str) -> ImageLookup {
        if is_data_uri(reference) {
            return ImageLookup::from_result(load_data_uri(reference));
        }
        let Some(path) = self.locate(reference) else {
            return ImageLookup::NotFound;
        };
        if let Ok(mut images) = self.images.lock() {
            if let Some(hit) = images.get(&path) {
                return hit.clone();
            }
        }
        let lookup = ImageLookup::from_result(load_file(&path));
        if let Ok(mut images) = self.images.lock() {
            images.put(path, lookup.clone());
        }
        lookup
    }
}

/// Fetches `http://` and `https://` references. Other references are not
/// found. Each request is bounded by a timeout; a timeout is a failure.
pub struct UrlImageResolver {
    agent: ureq::Agent,
    cache: Mutex<LruCache<String, ImageLookup>>,
}

impl UrlImageResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            cache: Mutex::new(LruCache::new(DECODED_CACHE_CAPACITY)),
        }
    }

    fn fetch(&self, url: &str) -> Result<LoadedImage, ImageError> {
        let fetch_err = |message: String| ImageError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| fetch_err(e.to_string()))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_REMOTE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| fetch_err(e.to_string()))?;
        decode_image_bytes(&bytes)
    }
}

impl Default for UrlImageResolver {
    fn default() -> Self {
        Self::new(DEFAULT_URL_TIMEOUT)
    }
}

impl ImageResolver for UrlImageResolver {
    fn resolve(&self, reference: &str) -> ImageLookup {
        let url = reference.trim();
        if !is_url(url) {
            return ImageLookup::NotFound;
        }
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(url) {
                return hit.clone();
            }
        }
        let lookup = ImageLookup::from_result(self.fetch(url));
        if let ImageLookup::Failed(reason) = &lookup {
            tracing::warn!(url, reason = %reason, "remote image failed");
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(url.to_string(), lookup.clone());
        }
        lookup
    }
}

/// Tries resolvers in order. The first `Found` wins; otherwise the first
/// failure is reported, or `NotFound`.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Box<dyn ImageResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl ImageResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    /// URL lookup first, then the filesystem below `base_dir`.
    pub fn standard(base_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::new()
            .with(UrlImageResolver::new(timeout))
            .with(FsImageResolver::new(base_dir))
    }
}

impl ImageResolver for ChainResolver {
    fn resolve(&self, reference: &str) -> ImageLookup {
        let mut outcome = ImageLookup::NotFound;
        for resolver in &self.resolvers {
            match resolver.resolve(reference) {
                found @ ImageLookup::Found(_) => return found,
                failed @ ImageLookup::Failed(_) if matches!(outcome, ImageLookup::NotFound) => {
                    outcome = failed;
                }
                _ => {}
            }
        }
        outcome
    }
}

/// Resolves nothing. Used when a composition has no image support.
pub struct NoImages;

impl ImageResolver for NoImages {
    fn resolve(&self, _reference: &str) -> ImageLookup {
        ImageLookup::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(pixel: [u8; 4]) -> Vec<u8> {
        let mut img = image::RgbaImage::new(1, 1);
        img.put_pixel(0, 0, image::Rgba(pixel));
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(encoder, img.as_raw(), 1, 1, image::ColorType::Rgba8)
            .unwrap();
        buf
    }

    #[test]
    fn test_is_jpeg() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!is_jpeg(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!is_jpeg(&[0xFF]));
    }

    #[test]
    fn test_invalid_data_uri() {
        assert!(matches!(load_data_uri("data:image/png;base64"), Err(ImageError::DataUri)));
    }

    #[test]
    fn test_too_short_data() {
        assert!(matches!(decode_image_bytes(&[0x00, 0x01]), Err(ImageError::TooShort)));
    }

    #[test]
    fn test_unsupported_format() {
        assert!(decode_image_bytes(&[0x00, 0x01, 0x02, 0x03, 0x04]).is_err());
    }

    #[test]
    fn test_decode_png_with_alpha() {
        let loaded = decode_image_bytes(&png_bytes([255, 0, 0, 128])).unwrap();
        match &loaded.pixel_data {
            ImagePixelData::Decoded { rgb, alpha } => {
                assert_eq!(rgb, &[255, 0, 0]);
                assert_eq!(alpha.as_ref().unwrap(), &[128]);
            }
            _ => panic!("PNG should decode to Decoded variant"),
        }
    }

    #[test]
    fn test_opaque_png_has_no_alpha() {
        let loaded = decode_image_bytes(&png_bytes([0, 0, 255, 255])).unwrap();
        match &loaded.pixel_data {
            ImagePixelData::Decoded { alpha, .. } => assert!(alpha.is_none()),
            _ => panic!("PNG should decode to Decoded variant"),
        }
    }

    #[test]
    fn test_jpeg_passthrough() {
        let img = image::RgbImage::from_fn(2, 2, |_, _| image::Rgb([0, 128, 255]));
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new(&mut buf);
        image::ImageEncoder::write_image(encoder, img.as_raw(), 2, 2, image::ColorType::Rgb8)
            .unwrap();

        let loaded = decode_image_bytes(&buf).unwrap();
        assert_eq!((loaded.width_px, loaded.height_px), (2, 2));
        match &loaded.pixel_data {
            ImagePixelData::Jpeg { data, color_space } => {
                assert!(data.starts_with(&[0xFF, 0xD8]));
                assert_eq!(*color_space, JpegColorSpace::DeviceRGB);
            }
            _ => panic!("JPEG should stay as Jpeg variant"),
        }
    }

    #[test]
    fn test_data_uri_resolves_without_files() {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(png_bytes([0, 255, 0, 255]));
        let resolver = FsImageResolver::new("/nonexistent");
        let lookup = resolver.resolve(&format!("data:image/png;base64,{}", b64));
        assert!(lookup.image().is_some());
    }

    #[test]
    fn test_fs_resolver_searches_tree_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("assets").join("photos");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Logo.PNG"), png_bytes([1, 2, 3, 255])).unwrap();

        let resolver = FsImageResolver::new(dir.path());
        assert_eq!(resolver.locate("logo.png"), Some(nested.join("Logo.PNG")));
        assert!(resolver.resolve("LOGO.png").image().is_some());
        assert!(matches!(resolver.resolve("missing.png"), ImageLookup::NotFound));
    }

    #[test]
    fn test_pixel_count_does_not_overflow_u32() {
        assert_eq!(pixel_count(70_000, 70_000), 4_900_000_000);
        assert_eq!(pixel_count(0, 10), 0);
    }

    #[test]
    fn test_fs_resolver_releases_old_images() {
        let dir = tempfile::tempdir().unwrap();
        let count = DECODED_CACHE_CAPACITY.get() + 4;
        for i in 0..count {
            std::fs::write(dir.path().join(format!("p{}.png", i)), png_bytes([i as u8, 0, 0, 255])).unwrap();
        }
        let resolver = FsImageResolver::new(dir.path());

        let first = resolver.resolve("p0.png").image().cloned().unwrap();
        let again = resolver.resolve("p0.png").image().cloned().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        drop(again);

        for i in 1..count {
            assert!(resolver.resolve(&format!("p{}.png", i)).image().is_some());
        }
        assert_eq!(Arc::strong_count(&first), 1);

        let latest = resolver.resolve(&format!("p{}.png", count - 1)).image().cloned().unwrap();
        assert_eq!(Arc::strong_count(&latest), 2);
    }

    #[test]
    fn test_fs_resolver_reports_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        let resolver = FsImageResolver::new(dir.path());
        assert!(matches!(resolver.resolve("broken.png"), ImageLookup::Failed(_)));
    }

    #[test]
    fn test_url_resolver_ignores_non_urls() {
        let resolver = UrlImageResolver::default();
        assert!(matches!(resolver.resolve("logo.png"), ImageLookup::NotFound));
    }

    #[test]
    fn test_chain_prefers_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), png_bytes([9, 9, 9, 255])).unwrap();
        let chain = ChainResolver::new()
            .with(NoImages)
            .with(FsImageResolver::new(dir.path()));
        assert!(chain.resolve("a.png").image().is_some());
        assert!(matches!(chain.resolve("b.png"), ImageLookup::NotFound));
    }
}
