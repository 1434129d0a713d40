//! Read-only access to the parts of a zip-based spreadsheet package.
//!
//! The package borrows the uploaded bytes and only inflates a part when it is
//! asked for by name, so media that is never extracted is never decompressed.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use zip::ZipArchive;

use crate::error::{Bom2PicError, Result};

/// Part every OPC package must carry at its root.
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Default ceiling on the inflated size of a single part.
pub const DEFAULT_MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

/// An opened spreadsheet container.
///
/// Cloning is cheap: the central directory is shared, and each clone keeps
/// its own read cursor, so clones can be handed to parallel workers.
#[derive(Clone, Debug)]
pub struct Package<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    /// Normalized part name -> name as stored in the central directory.
    part_names: Arc<BTreeMap<String, String>>,
    max_part_bytes: u64,
}

impl<'a> Package<'a> {
    /// Open a package from raw container bytes.
    ///
    /// Fails with [`Bom2PicError::MalformedContainer`] when the bytes are not a
    /// zip archive or the `[Content_Types].xml` manifest is missing.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| Bom2PicError::MalformedContainer(format!("not a zip archive: {}", e)))?;

        // Producers occasionally store names with a leading slash.
        let part_names: BTreeMap<String, String> = archive
            .file_names()
            .map(|name| (name.trim_start_matches('/').to_string(), name.to_string()))
            .collect();

        if !part_names.contains_key(CONTENT_TYPES_PART) {
            return Err(Bom2PicError::MalformedContainer(format!(
                "missing {}",
                CONTENT_TYPES_PART
            )));
        }

        Ok(Package {
            archive,
            part_names: Arc::new(part_names),
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
        })
    }

    /// Set the per-part inflation ceiling.
    pub fn with_max_part_bytes(mut self, limit: u64) -> Self {
        self.max_part_bytes = limit;
        self
    }

    /// Check if a part exists (case-sensitive, exact path).
    pub fn contains(&self, path: &str) -> bool {
        self.part_names.contains_key(path)
    }

    /// Number of parts in the package.
    pub fn len(&self) -> usize {
        self.part_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.part_names.is_empty()
    }

    /// All part names in lexical order.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.part_names.keys().map(String::as_str)
    }

    /// Part names under a path prefix, e.g. `"xl/media/"`, in lexical order.
    pub fn parts_with_prefix<'p>(&'p self, prefix: &'p str) -> impl Iterator<Item = &'p str> + 'p {
        self.part_names
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .map(|(name, _)| name.as_str())
            .take_while(move |name| name.starts_with(prefix))
    }

    /// Inflate a part into memory. Returns `Ok(None)` when the part does not exist.
    pub fn read_part(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(stored) = self.part_names.get(path) else {
            return Ok(None);
        };

        let file = self.archive.by_name(stored)?;

        let declared = file.size();
        if declared > self.max_part_bytes {
            return Err(Bom2PicError::malformed_part(
                path,
                format!("part inflates to {} bytes, limit is {}", declared, self.max_part_bytes),
            ));
        }

        let mut buf = Vec::with_capacity(declared as usize);
        file.take(self.max_part_bytes + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > self.max_part_bytes {
            return Err(Bom2PicError::malformed_part(
                path,
                format!("part exceeds {} bytes", self.max_part_bytes),
            ));
        }
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_rejects_non_zip() {
        let err = Package::from_bytes(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, Bom2PicError::MalformedContainer(_)));
    }

    #[test]
    fn test_rejects_missing_manifest() {
        let bytes = build_zip(&[("xl/workbook.xml", b"<workbook/>")]);
        let err = Package::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Bom2PicError::MalformedContainer(msg) if msg.contains("Content_Types")));
    }

    #[test]
    fn test_lookup_and_prefix_enumeration() {
        let bytes = build_zip(&[
            (CONTENT_TYPES_PART, b"<Types/>"),
            ("xl/media/image2.png", b"two"),
            ("xl/media/image1.png", b"one"),
            ("xl/mediaextra.bin", b"x"),
            ("xl/workbook.xml", b"<workbook/>"),
        ]);
        let mut package = Package::from_bytes(&bytes).unwrap();

        assert!(package.contains("xl/workbook.xml"));
        assert!(!package.contains("XL/workbook.xml"));
        let media: Vec<&str> = package.parts_with_prefix("xl/media/").collect();
        assert_eq!(media, vec!["xl/media/image1.png", "xl/media/image2.png"]);

        assert_eq!(package.read_part("xl/media/image1.png").unwrap(), Some(b"one".to_vec()));
        assert_eq!(package.read_part("xl/media/missing.png").unwrap(), None);
    }

    #[test]
    fn test_part_size_ceiling() {
        let big = vec![b'a'; 4096];
        let bytes = build_zip(&[(CONTENT_TYPES_PART, b"<Types/>"), ("xl/media/big.bin", big.as_slice())]);
        let mut package = Package::from_bytes(&bytes).unwrap().with_max_part_bytes(1024);
        let err = package.read_part("xl/media/big.bin").unwrap_err();
        assert!(matches!(err, Bom2PicError::MalformedPart { .. }));
    }

    #[test]
    fn test_clones_read_independently() {
        let bytes = build_zip(&[(CONTENT_TYPES_PART, b"<Types/>"), ("a.xml", b"<a/>")]);
        let package = Package::from_bytes(&bytes).unwrap();
        let mut first = package.clone();
        let mut second = package;
        assert_eq!(first.read_part("a.xml").unwrap(), second.read_part("a.xml").unwrap());
    }
}
