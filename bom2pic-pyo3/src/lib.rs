//! Python bindings for bom2pic.
//!
//! Exposes the batch entry point used by the upload service, plan
//! resolution and a quota exception carrying the rejection body.

use std::io::Cursor;

use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList};

use bom2pic_core::{
    process_batch, Account, BatchRequest, BatchResult, Bom2PicError, InMemoryUsageStore, PlanSource, QuotaGate,
    Settings, StaticPlanCatalog, UploadedFile, UsageStore,
};

mod plan;
mod usage;

use plan::PyPlan;
use usage::{PyMemoryUsageStore, PyUsageStore};

create_exception!(
    bom2pic,
    QuotaExceededError,
    PyException,
    "Monthly image quota exhausted. args[0] is the JSON rejection body."
);

pub(crate) fn to_py_err(e: Bom2PicError) -> PyErr {
    match e {
        Bom2PicError::QuotaExceeded(ref rejection) => QuotaExceededError::new_err(rejection.to_json()),
        Bom2PicError::Io(e) => PyIOError::new_err(e.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn plan_source_name(source: PlanSource) -> &'static str {
    match source {
        PlanSource::Override => "override",
        PlanSource::Account => "account",
        PlanSource::Anonymous => "anonymous",
    }
}

fn summary_dict<'py>(py: Python<'py>, result: &BatchResult<Cursor<Vec<u8>>>) -> PyResult<Bound<'py, PyDict>> {
    let summary = &result.summary;
    let dict = PyDict::new(py);
    dict.set_item("plan", &summary.plan)?;
    dict.set_item("plan_source", plan_source_name(result.plan_source))?;
    dict.set_item("processed", summary.processed)?;
    dict.set_item("saved", summary.saved)?;
    dict.set_item("duplicate", summary.duplicate)?;
    dict.set_item("requested", summary.requested)?;
    dict.set_item("truncated", summary.truncated)?;
    dict.set_item("files", summary.files)?;
    dict.set_item("failed_files", summary.failed_files)?;
    dict.set_item("usage_after", result.usage_after)?;
    dict.set_item("filename", summary.archive_filename())?;

    let headers = PyDict::new(py);
    for (name, value) in summary.headers() {
        headers.set_item(name, value)?;
    }
    dict.set_item("headers", headers)?;

    let diagnostics = PyList::empty(py);
    for item in &result.diagnostics {
        let entry = PyDict::new(py);
        let kind = serde_json::to_value(item.diagnostic.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        entry.set_item("file", &item.file)?;
        entry.set_item("kind", kind)?;
        entry.set_item("sheet", item.diagnostic.sheet.as_deref())?;
        entry.set_item("part", item.diagnostic.part.as_deref())?;
        entry.set_item("detail", &item.diagnostic.detail)?;
        diagnostics.append(entry)?;
    }
    dict.set_item("diagnostics", diagnostics)?;

    let failures = PyList::empty(py);
    for failure in &result.failures {
        failures.append((failure.file.as_str(), failure.reason.as_str()))?;
    }
    dict.set_item("failures", failures)?;

    Ok(dict)
}

/// Extract row-named images from uploaded workbooks into one zip archive.
///
/// Args:
///     files: list of (filename, bytes) pairs, in upload order
///     image_column: column letter the pictures are anchored in
///     name_column: column letter holding each row's name
///     account_id: authenticated account, or None for anonymous requests
///     account_plan: plan id stored for the account
///     override_plan: plan id requested by the caller (honored only when enabled)
///     usage_store: object with get_usage(account_id, period) and
///         increment_usage(account_id, period, by); defaults to a fresh in-memory store
///     settings_json: settings as JSON; BOM2PIC_* environment variables otherwise
///
/// Returns:
///     tuple[bytes, dict]: the archive and its summary
///
/// Raises:
///     QuotaExceededError: the account's monthly quota is used up
///     ValueError: invalid columns, files or settings
#[pyfunction]
#[pyo3(signature = (
    files,
    image_column,
    name_column,
    account_id=None,
    account_plan=None,
    override_plan=None,
    usage_store=None,
    settings_json=None
))]
#[allow(clippy::too_many_arguments)]
fn process<'py>(
    py: Python<'py>,
    files: Vec<(String, Bound<'py, PyBytes>)>,
    image_column: &str,
    name_column: &str,
    account_id: Option<&str>,
    account_plan: Option<&str>,
    override_plan: Option<&str>,
    usage_store: Option<Bound<'py, PyAny>>,
    settings_json: Option<&str>,
) -> PyResult<(Bound<'py, PyBytes>, Bound<'py, PyDict>)> {
    let settings = match settings_json {
        Some(json) => Settings::from_json_str(json),
        None => Settings::from_env(),
    }
    .map_err(to_py_err)?;

    let uploads: Vec<UploadedFile> = files
        .iter()
        .map(|(name, data)| UploadedFile::new(name.clone(), data.as_bytes().to_vec()))
        .collect();

    let store: Box<dyn UsageStore> = match usage_store {
        Some(obj) => Box::new(PyUsageStore::new(obj.unbind())),
        None => Box::new(InMemoryUsageStore::new()),
    };
    let catalog = StaticPlanCatalog::default();
    let request = BatchRequest {
        files: &uploads,
        image_column,
        name_column,
        account: account_id.map(|id| Account { id, plan: account_plan }),
        override_plan,
    };

    let result = py
        .allow_threads(|| {
            let gate = QuotaGate::new(store.as_ref());
            process_batch(&request, &settings, &catalog, &gate, Cursor::new(Vec::new()))
        })
        .map_err(to_py_err)?;

    let summary = summary_dict(py, &result)?;
    Ok((PyBytes::new(py, result.writer.get_ref()), summary))
}

/// Resolve the plan a request would run under.
///
/// Args:
///     account_id: authenticated account, or None
///     account_plan: plan id stored for the account
///     override_plan: plan id requested by the caller
///     allow_override: whether overrides are honored
///
/// Returns:
///     Plan: the resolved plan
#[pyfunction]
#[pyo3(signature = (account_id=None, account_plan=None, override_plan=None, allow_override=false))]
fn resolve_plan(
    account_id: Option<&str>,
    account_plan: Option<&str>,
    override_plan: Option<&str>,
    allow_override: bool,
) -> PyPlan {
    let catalog = StaticPlanCatalog::default();
    let account = account_id.map(|id| Account { id, plan: account_plan });
    let (plan, _) = bom2pic_core::resolve_plan(&catalog, allow_override, override_plan, account.as_ref());
    PyPlan::from(plan)
}

/// The bom2pic Python module.
#[pymodule]
fn bom2pic(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyPlan>()?;
    m.add_class::<PyMemoryUsageStore>()?;
    m.add("QuotaExceededError", m.py().get_type::<QuotaExceededError>())?;

    m.add_function(wrap_pyfunction!(process, m)?)?;
    m.add_function(wrap_pyfunction!(resolve_plan, m)?)?;

    Ok(())
}
