// image.rs -- Hardware image files.
//
// The harness never interprets an image; it only needs to know which
// runtime can consume it. Two formats are recognised:
//
//   xclbin -- FPGA container. First eight bytes are the ASCII magic
//            "xclbin2" followed by a NUL.
//   WGSL   -- compute shader source, recognised by the `.wgsl` extension.
//
// Anything else is `Unknown` and must be paired with an explicit backend.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::runtime::RuntimeError;

/// Magic prefix of an xclbin container.
pub const XCLBIN_MAGIC: &[u8; 8] = b"xclbin2\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Xclbin,
    Wgsl,
    Unknown,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Xclbin => write!(f, "xclbin"),
            ImageKind::Wgsl => write!(f, "WGSL"),
            ImageKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A hardware image read fully into memory.
#[derive(Debug, Clone)]
pub struct HardwareImage {
    path: PathBuf,
    bytes: Vec<u8>,
    kind: ImageKind,
}

impl HardwareImage {
    /// Read `path` and classify its contents.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let bytes = fs::read(path).map_err(|source| RuntimeError::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = sniff(path, &bytes);
        log::debug!("image {}: {} bytes, {kind}", path.display(), bytes.len());
        Ok(HardwareImage { path: path.to_path_buf(), bytes, kind })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The image as UTF-8 text, for source-form images such as WGSL.
    pub fn as_text(&self) -> Result<&str, RuntimeError> {
        std::str::from_utf8(&self.bytes).map_err(|_| RuntimeError::UnsupportedImage {
            path: self.path.clone(),
            expected: "UTF-8 text",
        })
    }
}

/// Classify an image from its path and leading bytes.
///
/// The xclbin magic wins over the extension: a renamed bitstream is still
/// a bitstream.
pub fn sniff(path: &Path, bytes: &[u8]) -> ImageKind {
    if bytes.starts_with(XCLBIN_MAGIC) {
        return ImageKind::Xclbin;
    }
    let is_wgsl = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("wgsl"))
        .unwrap_or(false);
    if is_wgsl {
        ImageKind::Wgsl
    } else {
        ImageKind::Unknown
    }
}

/// Read only enough of `path` to classify it.
pub fn sniff_file(path: &Path) -> Result<ImageKind, RuntimeError> {
    use std::io::Read;

    let mut head = Vec::with_capacity(XCLBIN_MAGIC.len());
    fs::File::open(path)
        .and_then(|f| f.take(XCLBIN_MAGIC.len() as u64).read_to_end(&mut head))
        .map_err(|source| RuntimeError::ImageRead { path: path.to_path_buf(), source })?;
    Ok(sniff(path, &head))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sniff_xclbin_magic() {
        let mut bytes = XCLBIN_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        assert_eq!(sniff(Path::new("vadd.xclbin"), &bytes), ImageKind::Xclbin);
        // Extension does not matter when the magic is present.
        assert_eq!(sniff(Path::new("vadd.wgsl"), &bytes), ImageKind::Xclbin);
    }

    #[test]
    fn test_sniff_wgsl_extension() {
        assert_eq!(sniff(Path::new("k/krnl_vadd.wgsl"), b"@compute"), ImageKind::Wgsl);
        assert_eq!(sniff(Path::new("K.WGSL"), b""), ImageKind::Wgsl);
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff(Path::new("vadd.xclbin"), b"xclbin1\0"), ImageKind::Unknown);
        assert_eq!(sniff(Path::new("noext"), b""), ImageKind::Unknown);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HardwareImage::load(Path::new("/definitely/not/here.xclbin")).unwrap_err();
        assert!(matches!(err, RuntimeError::ImageRead { .. }));
    }

    #[test]
    fn test_load_and_sniff_file() {
        let mut f = tempfile::Builder::new().suffix(".wgsl").tempfile().unwrap();
        f.write_all(b"@compute @workgroup_size(64) fn main() {}").unwrap();

        let img = HardwareImage::load(f.path()).unwrap();
        assert_eq!(img.kind(), ImageKind::Wgsl);
        assert!(img.as_text().unwrap().starts_with("@compute"));
        assert_eq!(sniff_file(f.path()).unwrap(), ImageKind::Wgsl);
    }

    #[test]
    fn test_non_utf8_text_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        let img = HardwareImage::load(f.path()).unwrap();
        assert!(matches!(img.as_text(), Err(RuntimeError::UnsupportedImage { .. })));
    }
}
