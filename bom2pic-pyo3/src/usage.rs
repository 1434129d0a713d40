//! Usage stores backed by Python objects.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use bom2pic_core::{Bom2PicError, InMemoryUsageStore, Result, UsagePeriod, UsageStore};

/// Delegates to a Python object exposing `get_usage(account_id, period)`
/// and `increment_usage(account_id, period, by)`.
pub struct PyUsageStore {
    inner: Py<PyAny>,
}

impl PyUsageStore {
    pub fn new(inner: Py<PyAny>) -> Self {
        PyUsageStore { inner }
    }
}

fn store_error(e: PyErr) -> Bom2PicError {
    Bom2PicError::UsageStore(e.to_string())
}

impl UsageStore for PyUsageStore {
    fn get_usage(&self, account_id: &str, period: &UsagePeriod) -> Result<u64> {
        Python::with_gil(|py| {
            self.inner
                .bind(py)
                .call_method1("get_usage", (account_id, period.as_str()))?
                .extract::<u64>()
        })
        .map_err(store_error)
    }

    fn increment_usage(&self, account_id: &str, period: &UsagePeriod, by: u64) -> Result<()> {
        Python::with_gil(|py| {
            self.inner
                .bind(py)
                .call_method1("increment_usage", (account_id, period.as_str(), by))
                .map(|_| ())
        })
        .map_err(store_error)
    }
}

/// In-process usage counters, for scripts and tests.
#[pyclass(name = "MemoryUsageStore", frozen)]
#[derive(Default)]
pub struct PyMemoryUsageStore {
    inner: InMemoryUsageStore,
}

fn parse_period(period: &str) -> PyResult<UsagePeriod> {
    UsagePeriod::parse(period).map_err(|e| PyValueError::new_err(e.to_string()))
}

#[pymethods]
impl PyMemoryUsageStore {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    /// Usage for an account in a `YYYY-MM` period.
    fn get_usage(&self, account_id: &str, period: &str) -> PyResult<u64> {
        self.inner
            .get_usage(account_id, &parse_period(period)?)
            .map_err(crate::to_py_err)
    }

    fn increment_usage(&self, account_id: &str, period: &str, by: u64) -> PyResult<()> {
        self.inner
            .increment_usage(account_id, &parse_period(period)?, by)
            .map_err(crate::to_py_err)
    }

    fn set_usage(&self, account_id: &str, period: &str, value: u64) -> PyResult<()> {
        self.inner
            .set_usage(account_id, &parse_period(period)?, value)
            .map_err(crate::to_py_err)
    }

    /// The current `YYYY-MM` period.
    #[staticmethod]
    fn current_period() -> String {
        UsagePeriod::current().to_string()
    }
}
