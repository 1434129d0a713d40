//! One upload request, end to end.
//!
//! Validation and admission run before any upload is opened. Usage is
//! committed once, after the archive has been written; a request that fails
//! at any step leaves the usage counter untouched.

use std::io::{Seek, Write};

use crate::aggregate::{aggregate, Summary};
use crate::config::Settings;
use crate::diagnostic::Diagnostic;
use crate::error::{Bom2PicError, Result};
use crate::pipeline::{extract_files, ColumnSelection, ExtractionOutcome};
use crate::quota::{resolve_plan, Account, PlanCatalog, PlanSource, QuotaGate};

/// A named upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadedFile {
            name: name.into(),
            bytes,
        }
    }
}

/// Everything the request layer hands over.
#[derive(Clone, Debug)]
pub struct BatchRequest<'a> {
    pub files: &'a [UploadedFile],
    pub image_column: &'a str,
    pub name_column: &'a str,
    pub account: Option<Account<'a>>,
    /// Plan id asked for by the caller; honored only when enabled.
    pub override_plan: Option<&'a str>,
}

/// An upload that contributed nothing because it could not be read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

/// A diagnostic together with the upload it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDiagnostic {
    pub file: String,
    pub diagnostic: Diagnostic,
}

/// A completed request.
#[derive(Debug)]
pub struct BatchResult<W> {
    pub summary: Summary,
    pub plan_source: PlanSource,
    /// The archive writer, finished.
    pub writer: W,
    pub diagnostics: Vec<FileDiagnostic>,
    pub failures: Vec<FileFailure>,
    /// Account usage after commit; 0 for anonymous requests.
    pub usage_after: u64,
}

/// Check the request shape before anything is opened.
pub fn validate_request(request: &BatchRequest<'_>, settings: &Settings) -> Result<ColumnSelection> {
    let columns = ColumnSelection::parse(request.image_column, request.name_column)?;

    if request.files.is_empty() {
        return Err(Bom2PicError::InvalidRequest("no files uploaded".to_string()));
    }
    if settings.max_files > 0 && request.files.len() > settings.max_files {
        return Err(Bom2PicError::InvalidRequest(format!(
            "too many files: {} (max {})",
            request.files.len(),
            settings.max_files
        )));
    }
    for file in request.files {
        if !file.name.to_ascii_lowercase().ends_with(".xlsx") {
            return Err(Bom2PicError::InvalidRequest(format!(
                "'{}' is not an .xlsx file",
                file.name
            )));
        }
        if file.bytes.len() as u64 > settings.max_upload_bytes {
            return Err(Bom2PicError::InvalidRequest(format!(
                "'{}' is {} bytes, over the {} byte limit",
                file.name,
                file.bytes.len(),
                settings.max_upload_bytes
            )));
        }
    }

    Ok(columns)
}

/// Run a request: validate, admit, extract, archive into `writer`, commit.
pub fn process_batch<W: Write + Seek>(
    request: &BatchRequest<'_>,
    settings: &Settings,
    catalog: &dyn PlanCatalog,
    gate: &QuotaGate<'_>,
    writer: W,
) -> Result<BatchResult<W>> {
    let columns = validate_request(request, settings)?;

    let (plan, plan_source) = resolve_plan(
        catalog,
        settings.allow_plan_override,
        request.override_plan,
        request.account.as_ref(),
    );
    let account_id = request.account.as_ref().map(|account| account.id);
    let admission = gate.admit(&plan, account_id)?;

    let options = settings.extract_options(&plan);
    let inputs: Vec<(&str, &[u8])> = request
        .files
        .iter()
        .map(|file| (file.name.as_str(), file.bytes.as_slice()))
        .collect();

    let mut outcomes: Vec<ExtractionOutcome> = Vec::with_capacity(inputs.len());
    let mut failures = Vec::new();
    let mut first_error = None;
    let results = extract_files(&inputs, &columns, &options);
    for ((name, _), result) in inputs.iter().zip(results) {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                tracing::warn!(file = *name, error = %e, "upload skipped");
                failures.push(FileFailure {
                    file: name.to_string(),
                    reason: e.to_string(),
                });
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if outcomes.is_empty() {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    let merged = aggregate(&outcomes);
    let writer = merged.write_archive(&settings.archive, writer)?;
    let mut summary = merged.summary(&plan.id);
    summary.failed_files = failures.len();
    drop(merged);

    let usage_after = gate.commit(admission, summary.processed as u64)?;

    tracing::info!(
        plan = %summary.plan,
        source = ?plan_source,
        files = summary.files,
        failed = summary.failed_files,
        processed = summary.processed,
        saved = summary.saved,
        duplicate = summary.duplicate,
        requested = summary.requested,
        truncated = summary.truncated,
        "request complete"
    );

    let diagnostics = outcomes
        .into_iter()
        .flat_map(|outcome| {
            let file = outcome.source_file;
            outcome.diagnostics.into_iter().map(move |diagnostic| FileDiagnostic {
                file: file.clone(),
                diagnostic,
            })
        })
        .collect();

    Ok(BatchResult {
        summary,
        plan_source,
        writer,
        diagnostics,
        failures,
        usage_after,
    })
}
