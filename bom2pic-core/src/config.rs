//! Runtime settings for extraction and archiving.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Bom2PicError, Result};
use crate::package::DEFAULT_MAX_PART_BYTES;
use crate::pipeline::ExtractOptions;
use crate::quota::Plan;

const MIB: u64 = 1024 * 1024;

/// Which worksheets of a workbook are scanned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetScope {
    /// Every worksheet, in workbook order.
    #[default]
    All,
    /// Only the first worksheet.
    First,
}

impl FromStr for SheetScope {
    type Err = Bom2PicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SheetScope::All),
            "first" => Ok(SheetScope::First),
            other => Err(Bom2PicError::Config(format!("unknown sheet scope '{}'", other))),
        }
    }
}

/// Compression level for archive entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression (Stored)
    None,
    /// Fast compression (deflate level 1)
    #[default]
    Fast,
    /// Balanced compression (deflate level 6)
    Default,
    /// Maximum compression (deflate level 9)
    Best,
}

impl FromStr for CompressionLevel {
    type Err = Bom2PicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "stored" | "0" => Ok(CompressionLevel::None),
            "fast" | "1" => Ok(CompressionLevel::Fast),
            "default" | "6" => Ok(CompressionLevel::Default),
            "best" | "9" => Ok(CompressionLevel::Best),
            other => Err(Bom2PicError::Config(format!("unknown compression level '{}'", other))),
        }
    }
}

impl CompressionLevel {
    /// Zip entry options for this level.
    pub fn file_options(self) -> zip::write::FileOptions<'static, zip::write::ExtendedFileOptions> {
        use zip::write::FileOptions;
        use zip::CompressionMethod;

        match self {
            CompressionLevel::None => FileOptions::default()
                .large_file(false)
                .compression_method(CompressionMethod::Stored),
            CompressionLevel::Fast => FileOptions::default()
                .large_file(false)
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(1)),
            CompressionLevel::Default => FileOptions::default()
                .large_file(false)
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(6)),
            CompressionLevel::Best => FileOptions::default()
                .large_file(false)
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(9)),
        }
    }
}

/// Layout of the output archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Directory prefix for image entries; empty puts them at the root.
    pub images_dir: String,
    /// Add a `report.csv` manifest entry.
    pub write_report: bool,
    pub compression: CompressionLevel,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        ArchiveSettings {
            images_dir: String::new(),
            write_report: true,
            compression: CompressionLevel::default(),
        }
    }
}

impl ArchiveSettings {
    /// Archive path for an image filename.
    pub fn entry_path(&self, filename: &str) -> String {
        let dir = self.images_dir.trim_matches('/');
        if dir.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", dir, filename)
        }
    }
}

/// Service-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Largest accepted upload, per file.
    pub max_upload_bytes: u64,
    /// Most files accepted in one request; 0 is unlimited.
    pub max_files: usize,
    /// Ceiling on images per file applied on top of the plan; 0 is unlimited.
    pub max_images_per_file: usize,
    /// Honor plan overrides supplied with a request.
    pub allow_plan_override: bool,
    pub sheet_scope: SheetScope,
    pub parallel: bool,
    /// Decompressed size ceiling for a single package part.
    pub max_part_bytes: u64,
    pub archive: ArchiveSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_upload_bytes: 20 * MIB,
            max_files: 0,
            max_images_per_file: 0,
            allow_plan_override: false,
            sheet_scope: SheetScope::All,
            parallel: true,
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
            archive: ArchiveSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `BOM2PIC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`Settings::from_env`], reading variables through `lookup`.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(mb) = env_value::<u64, _>(&lookup, "BOM2PIC_MAX_UPLOAD_MB")? {
            settings.max_upload_bytes = mb.saturating_mul(MIB);
        }
        if let Some(n) = env_value::<usize, _>(&lookup, "BOM2PIC_MAX_FILES")? {
            settings.max_files = n;
        }
        if let Some(n) = env_value::<usize, _>(&lookup, "BOM2PIC_MAX_IMAGES")? {
            settings.max_images_per_file = n;
        }
        if let Some(raw) = non_empty(&lookup, "BOM2PIC_ALLOW_PLAN_OVERRIDE") {
            settings.allow_plan_override = parse_flag(&raw).ok_or_else(|| {
                Bom2PicError::Config(format!("BOM2PIC_ALLOW_PLAN_OVERRIDE: expected a boolean, got '{}'", raw))
            })?;
        }
        if let Some(raw) = non_empty(&lookup, "BOM2PIC_SHEET_SCOPE") {
            settings.sheet_scope = raw.parse()?;
        }

        Ok(settings)
    }

    /// Settings from a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Bom2PicError::Config(e.to_string()))
    }

    /// Effective per-file cap: the smaller of the plan's limit and the
    /// configured ceiling.
    pub fn per_file_cap(&self, plan: &Plan) -> Option<usize> {
        let ceiling = (self.max_images_per_file > 0).then_some(self.max_images_per_file);
        match (plan.per_file_cap(), ceiling) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Extraction options for a file under `plan`.
    pub fn extract_options(&self, plan: &Plan) -> ExtractOptions {
        ExtractOptions {
            cap: self.per_file_cap(plan),
            sheet_scope: self.sheet_scope,
            parallel: self.parallel,
            max_part_bytes: self.max_part_bytes,
        }
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_value<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Bom2PicError::Config(format!("{}: expected a number, got '{}'", key, raw))),
        None => Ok(None),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
