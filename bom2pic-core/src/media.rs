//! Embedded media parts and their file types.

/// Bytes of one media part, copied out of the package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaBlob {
    /// Package path, e.g. `xl/media/image1.png`.
    pub path: String,
    pub bytes: Vec<u8>,
    /// Lower-case extension without the dot.
    pub extension: &'static str,
}

impl MediaBlob {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        let extension = infer_extension(&bytes, &path);
        MediaBlob { path, bytes, extension }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Sniff an image type from its leading bytes.
///
/// Raster formats come from `infer`; the Windows metafile formats it does
/// not know are matched by their headers.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if let Some(kind) = infer::get(bytes) {
        let mime = kind.mime_type();
        return match mime {
            "image/jpeg" => Some("jpg"),
            "image/tiff" => Some("tif"),
            _ if mime.starts_with("image/") => Some(kind.extension()),
            _ => metafile_extension(bytes),
        };
    }
    metafile_extension(bytes)
}

fn metafile_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 44 && bytes.starts_with(&[0x01, 0, 0, 0]) && &bytes[40..44] == b" EMF" {
        Some("emf")
    } else if bytes.starts_with(&[0xD7, 0xCD, 0xC6, 0x9A]) || bytes.starts_with(&[0x01, 0x00, 0x09, 0x00]) {
        Some("wmf")
    } else {
        None
    }
}

/// Extension for a media part: sniffed type, then the part's own extension,
/// then `png`.
pub fn infer_extension(bytes: &[u8], path: &str) -> &'static str {
    if let Some(ext) = sniff_extension(bytes) {
        return ext;
    }

    let from_path = path
        .rsplit_once('/')
        .map_or(path, |(_, file)| file)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match from_path.as_deref() {
        Some("png") => "png",
        Some("jpg") | Some("jpeg") | Some("jpe") => "jpg",
        Some("gif") => "gif",
        Some("bmp") => "bmp",
        Some("tif") | Some("tiff") => "tif",
        Some("webp") => "webp",
        Some("emf") => "emf",
        Some("wmf") => "wmf",
        Some("svg") => "svg",
        _ => "png",
    }
}
