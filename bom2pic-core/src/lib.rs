//! # bom2pic-core
//!
//! Pulls the pictures out of xlsx bill-of-materials workbooks and names each
//! one after the row it is anchored to.
//!
//! ## Example
//!
//! ```no_run
//! use bom2pic_core::{
//!     process_batch, BatchRequest, InMemoryUsageStore, QuotaGate, Settings, StaticPlanCatalog,
//!     UploadedFile,
//! };
//!
//! let files = vec![UploadedFile::new("bom.xlsx", std::fs::read("bom.xlsx")?)];
//! let request = BatchRequest {
//!     files: &files,
//!     image_column: "A",
//!     name_column: "C",
//!     account: None,
//!     override_plan: None,
//! };
//! let store = InMemoryUsageStore::new();
//! let result = process_batch(
//!     &request,
//!     &Settings::default(),
//!     &StaticPlanCatalog::default(),
//!     &QuotaGate::new(&store),
//!     std::fs::File::create("images.zip")?,
//! )?;
//! println!("{} images", result.summary.processed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod cell_text;
pub mod config;
pub mod diagnostic;
pub mod drawing;
pub mod error;
pub mod media;
pub mod package;
pub mod pipeline;
pub mod quota;
pub mod relationships;
pub mod service;
pub mod utils;
pub mod workbook;
pub mod worksheet;

pub use aggregate::{aggregate, normalize_name, output_filename, Aggregate, ArchiveEntry, EntryAction, ReportRow, Summary};
pub use config::{ArchiveSettings, CompressionLevel, Settings, SheetScope};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use drawing::{parse_drawing, Anchor, CellPosition, DrawingPicture};
pub use error::{Bom2PicError, QuotaRejection, Result, StatusClass};
pub use media::MediaBlob;
pub use package::Package;
pub use pipeline::{extract_file, extract_files, ColumnSelection, ExtractOptions, ExtractedImage, ExtractionOutcome};
pub use quota::{
    resolve_plan, Account, Admission, InMemoryUsageStore, Limit, Plan, PlanCatalog, PlanSource, QuotaGate,
    StaticPlanCatalog, UsagePeriod, UsageStore,
};
pub use relationships::{Relationship, RelationshipType, Relationships};
pub use service::{process_batch, validate_request, BatchRequest, BatchResult, FileDiagnostic, FileFailure, UploadedFile};
pub use workbook::{SheetEntry, WorkbookManifest};
pub use worksheet::{RowValue, SheetGeometry};
