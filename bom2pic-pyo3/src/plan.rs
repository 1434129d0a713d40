//! Python view of the plan catalog.

use pyo3::prelude::*;

use bom2pic_core::{Plan, PlanCatalog, StaticPlanCatalog};

/// A pricing tier. Limits of None are unlimited.
#[pyclass(name = "Plan", frozen)]
#[derive(Clone)]
pub struct PyPlan {
    inner: Plan,
}

impl From<Plan> for PyPlan {
    fn from(inner: Plan) -> Self {
        PyPlan { inner }
    }
}

#[pymethods]
impl PyPlan {
    #[getter]
    fn id(&self) -> &str {
        &self.inner.id
    }

    /// Images taken from a single file, or None.
    #[getter]
    fn per_file_limit(&self) -> Option<u64> {
        self.inner.per_file_limit.as_option()
    }

    /// Images per account per month, or None.
    #[getter]
    fn monthly_quota(&self) -> Option<u64> {
        self.inner.monthly_quota.as_option()
    }

    /// All plans in the built-in catalog.
    #[staticmethod]
    fn catalog() -> Vec<PyPlan> {
        StaticPlanCatalog::default()
            .plans()
            .iter()
            .cloned()
            .map(PyPlan::from)
            .collect()
    }

    /// Look up a plan by id; None when unknown.
    #[staticmethod]
    fn lookup(id: &str) -> Option<PyPlan> {
        StaticPlanCatalog::default().lookup(id).map(PyPlan::from)
    }

    fn __repr__(&self) -> String {
        format!(
            "Plan(id='{}', per_file_limit={}, monthly_quota={})",
            self.inner.id, self.inner.per_file_limit, self.inner.monthly_quota
        )
    }

    fn __eq__(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}
