//! Plans, monthly usage and the admission gate.
//!
//! A request is evaluated against one resolved [`Plan`]. Admission happens
//! before any file is opened; usage is committed once, after the archive has
//! been written.

use std::fmt;
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;

#[cfg(feature = "fast-hash")]
use hashbrown::HashMap;
#[cfg(not(feature = "fast-hash"))]
use std::collections::HashMap;

use crate::error::{Bom2PicError, QuotaRejection, Result};

/// A count limit that may be unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "Option<u64>")]
pub enum Limit {
    Finite(u64),
    Unlimited,
}

impl Limit {
    pub fn as_option(self) -> Option<u64> {
        match self {
            Limit::Finite(n) => Some(n),
            Limit::Unlimited => None,
        }
    }
}

impl From<Limit> for Option<u64> {
    fn from(limit: Limit) -> Self {
        limit.as_option()
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(n) => write!(f, "{}", n),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// A pricing tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: String,
    /// Images taken from a single uploaded file.
    pub per_file_limit: Limit,
    /// Images processed per account per calendar month.
    pub monthly_quota: Limit,
}

impl Plan {
    pub fn new(id: impl Into<String>, per_file_limit: Limit, monthly_quota: Limit) -> Self {
        Plan {
            id: id.into(),
            per_file_limit,
            monthly_quota,
        }
    }

    /// Per-file cap as a slice length.
    pub fn per_file_cap(&self) -> Option<usize> {
        self.per_file_limit
            .as_option()
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
    }
}

pub const DEMO_PLAN: &str = "demo";
pub const FREE_PLAN: &str = "free";
pub const BASIC_PLAN: &str = "basic";
pub const PRO_PLAN: &str = "pro";
pub const PRO_PLUS_PLAN: &str = "pro_plus";

/// Lookup of plans by id.
pub trait PlanCatalog: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Plan>;

    /// Plan for requests without an account.
    fn anonymous_plan(&self) -> Plan;

    /// Plan for accounts whose stored plan is unknown.
    fn account_fallback_plan(&self) -> Plan;
}

/// Fixed, in-process plan catalog.
#[derive(Clone, Debug)]
pub struct StaticPlanCatalog {
    plans: Vec<Plan>,
    anonymous: Plan,
    account_fallback: Plan,
}

impl StaticPlanCatalog {
    /// Build a catalog; the anonymous and fallback ids must name plans in `plans`.
    pub fn new(plans: Vec<Plan>, anonymous_id: &str, account_fallback_id: &str) -> Result<Self> {
        let find = |id: &str| {
            plans
                .iter()
                .find(|plan| plan.id == id)
                .cloned()
                .ok_or_else(|| Bom2PicError::Config(format!("plan '{}' is not in the catalog", id)))
        };
        let anonymous = find(anonymous_id)?;
        let account_fallback = find(account_fallback_id)?;
        Ok(StaticPlanCatalog {
            plans,
            anonymous,
            account_fallback,
        })
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

impl Default for StaticPlanCatalog {
    fn default() -> Self {
        let demo = Plan::new(DEMO_PLAN, Limit::Finite(10), Limit::Unlimited);
        let free = Plan::new(FREE_PLAN, Limit::Finite(50), Limit::Finite(200));
        StaticPlanCatalog {
            plans: vec![
                demo.clone(),
                free.clone(),
                Plan::new(BASIC_PLAN, Limit::Unlimited, Limit::Finite(5_000)),
                Plan::new(PRO_PLAN, Limit::Unlimited, Limit::Finite(25_000)),
                Plan::new(PRO_PLUS_PLAN, Limit::Unlimited, Limit::Unlimited),
            ],
            anonymous: demo,
            account_fallback: free,
        }
    }
}

impl PlanCatalog for StaticPlanCatalog {
    fn lookup(&self, id: &str) -> Option<Plan> {
        let id = id.trim();
        self.plans
            .iter()
            .find(|plan| plan.id.eq_ignore_ascii_case(id))
            .cloned()
    }

    fn anonymous_plan(&self) -> Plan {
        self.anonymous.clone()
    }

    fn account_fallback_plan(&self) -> Plan {
        self.account_fallback.clone()
    }
}

/// The authenticated caller, as known to the request layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account<'a> {
    pub id: &'a str,
    /// Plan id stored for the account.
    pub plan: Option<&'a str>,
}

/// Where a resolved plan came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Override,
    Account,
    Anonymous,
}

/// Resolve the plan a request runs under.
///
/// Precedence: an override id (only when `allow_override` is set and the id
/// is known), then the account's stored plan (unknown ids fall back to the
/// catalog's account fallback), then the anonymous plan.
pub fn resolve_plan(
    catalog: &dyn PlanCatalog,
    allow_override: bool,
    override_id: Option<&str>,
    account: Option<&Account<'_>>,
) -> (Plan, PlanSource) {
    if let Some(id) = override_id.filter(|id| !id.trim().is_empty()) {
        if !allow_override {
            tracing::debug!(plan = id, "plan override ignored: disabled by configuration");
        } else if let Some(plan) = catalog.lookup(id) {
            return (plan, PlanSource::Override);
        } else {
            tracing::warn!(plan = id, "unknown override plan ignored");
        }
    }

    if let Some(account) = account {
        let plan = account
            .plan
            .and_then(|id| catalog.lookup(id))
            .unwrap_or_else(|| catalog.account_fallback_plan());
        return (plan, PlanSource::Account);
    }

    (catalog.anonymous_plan(), PlanSource::Anonymous)
}

/// A calendar month usage is counted in, formatted `YYYY-MM`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UsagePeriod(String);

impl UsagePeriod {
    /// The current month in UTC.
    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        UsagePeriod(format!("{:04}-{:02}", date.year(), date.month()))
    }

    /// Parse a `YYYY-MM` string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| Bom2PicError::InvalidRequest(format!("invalid usage period '{}'", s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UsagePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent per-account monthly counters.
///
/// Implementations must make `increment_usage` atomic; retry idempotency is
/// theirs to provide.
pub trait UsageStore: Send + Sync {
    fn get_usage(&self, account_id: &str, period: &UsagePeriod) -> Result<u64>;

    fn increment_usage(&self, account_id: &str, period: &UsagePeriod, by: u64) -> Result<()>;
}

/// A process-local usage store.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    counters: Mutex<HashMap<(String, UsagePeriod), u64>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a counter.
    pub fn set_usage(&self, account_id: &str, period: &UsagePeriod, value: u64) -> Result<()> {
        let mut counters = self.lock()?;
        counters.insert((account_id.to_string(), period.clone()), value);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, UsagePeriod), u64>>> {
        self.counters
            .lock()
            .map_err(|_| Bom2PicError::UsageStore("usage counters poisoned".to_string()))
    }
}

impl UsageStore for InMemoryUsageStore {
    fn get_usage(&self, account_id: &str, period: &UsagePeriod) -> Result<u64> {
        let counters = self.lock()?;
        Ok(counters
            .get(&(account_id.to_string(), period.clone()))
            .copied()
            .unwrap_or(0))
    }

    fn increment_usage(&self, account_id: &str, period: &UsagePeriod, by: u64) -> Result<()> {
        let mut counters = self.lock()?;
        let counter = counters
            .entry((account_id.to_string(), period.clone()))
            .or_insert(0);
        *counter = counter.saturating_add(by);
        Ok(())
    }
}

/// Proof that a request was admitted. Consumed by [`QuotaGate::commit`], so
/// usage can be committed at most once per admission.
#[derive(Debug)]
#[must_use = "an admission must be committed once the request completes"]
pub struct Admission {
    plan: Plan,
    account_id: Option<String>,
    usage_before: u64,
}

impl Admission {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Usage recorded before this request.
    pub fn usage_before(&self) -> u64 {
        self.usage_before
    }
}

/// Admission and commit against a usage store for one period.
pub struct QuotaGate<'s> {
    store: &'s dyn UsageStore,
    period: UsagePeriod,
}

impl<'s> QuotaGate<'s> {
    pub fn new(store: &'s dyn UsageStore) -> Self {
        Self::with_period(store, UsagePeriod::current())
    }

    pub fn with_period(store: &'s dyn UsageStore, period: UsagePeriod) -> Self {
        QuotaGate { store, period }
    }

    pub fn period(&self) -> &UsagePeriod {
        &self.period
    }

    /// Decide whether a request may start.
    ///
    /// Rejects with [`Bom2PicError::QuotaExceeded`] when the plan has a
    /// finite monthly quota and the account's usage has already reached it.
    /// Requests without an account have no counter and are always admitted.
    pub fn admit(&self, plan: &Plan, account_id: Option<&str>) -> Result<Admission> {
        let usage_before = match account_id {
            Some(account) => self.store.get_usage(account, &self.period)?,
            None => 0,
        };

        if let (Limit::Finite(quota), Some(account)) = (plan.monthly_quota, account_id) {
            if usage_before >= quota {
                tracing::info!(
                    account,
                    plan = %plan.id,
                    usage = usage_before,
                    limit = quota,
                    period = %self.period,
                    "monthly quota exhausted"
                );
                return Err(Bom2PicError::QuotaExceeded(QuotaRejection::new(
                    plan.id.clone(),
                    quota,
                    usage_before,
                    self.period.as_str(),
                )));
            }
        }

        Ok(Admission {
            plan: plan.clone(),
            account_id: account_id.map(str::to_string),
            usage_before,
        })
    }

    /// Record a completed request's processed count. Returns the new usage.
    pub fn commit(&self, admission: Admission, processed: u64) -> Result<u64> {
        let Some(account) = admission.account_id else {
            return Ok(0);
        };
        if processed > 0 {
            self.store.increment_usage(&account, &self.period, processed)?;
        }
        Ok(admission.usage_before.saturating_add(processed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> UsagePeriod {
        UsagePeriod::parse("2026-10").unwrap()
    }

    #[test]
    fn test_default_catalog() {
        let catalog = StaticPlanCatalog::default();
        let free = catalog.lookup("FREE").unwrap();
        assert_eq!(free.per_file_limit, Limit::Finite(50));
        assert_eq!(free.monthly_quota, Limit::Finite(200));
        assert_eq!(catalog.lookup("pro_plus").unwrap().monthly_quota, Limit::Unlimited);
        assert!(catalog.lookup("enterprise").is_none());
        assert_eq!(catalog.anonymous_plan().id, DEMO_PLAN);
        assert_eq!(catalog.anonymous_plan().per_file_cap(), Some(10));
    }

    #[test]
    fn test_custom_catalog_requires_known_defaults() {
        let plans = vec![Plan::new("trial", Limit::Finite(3), Limit::Finite(3))];
        assert!(StaticPlanCatalog::new(plans.clone(), "trial", "trial").is_ok());
        assert!(matches!(
            StaticPlanCatalog::new(plans, "trial", "missing"),
            Err(Bom2PicError::Config(_))
        ));
    }

    #[test]
    fn test_resolution_precedence() {
        let catalog = StaticPlanCatalog::default();
        let account = Account { id: "acct-1", plan: Some("basic") };

        let (plan, source) = resolve_plan(&catalog, true, Some("pro_plus"), Some(&account));
        assert_eq!((plan.id.as_str(), source), ("pro_plus", PlanSource::Override));

        // override disabled: the account's plan wins
        let (plan, source) = resolve_plan(&catalog, false, Some("pro_plus"), Some(&account));
        assert_eq!((plan.id.as_str(), source), ("basic", PlanSource::Account));

        // override disabled and anonymous: demo, never the override
        let (plan, source) = resolve_plan(&catalog, false, Some("pro_plus"), None);
        assert_eq!((plan.id.as_str(), source), ("demo", PlanSource::Anonymous));

        // unknown stored plan falls back to free
        let stale = Account { id: "acct-2", plan: Some("legacy") };
        assert_eq!(resolve_plan(&catalog, false, None, Some(&stale)).0.id, "free");

        // unknown override is ignored even when enabled
        assert_eq!(resolve_plan(&catalog, true, Some("gold"), None).0.id, "demo");
    }

    #[test]
    fn test_usage_period() {
        assert_eq!(period().as_str(), "2026-10");
        assert_eq!(UsagePeriod::parse("2026-3").unwrap().as_str(), "2026-03");
        assert!(UsagePeriod::parse("2026-13").is_err());
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(UsagePeriod::from_date(date).to_string(), "2024-02");
    }

    #[test]
    fn test_admission_rejects_at_quota() {
        let store = InMemoryUsageStore::new();
        store.set_usage("acct", &period(), 200).unwrap();
        let gate = QuotaGate::with_period(&store, period());
        let free = StaticPlanCatalog::default().lookup("free").unwrap();

        let err = gate.admit(&free, Some("acct")).unwrap_err();
        match err {
            Bom2PicError::QuotaExceeded(rejection) => {
                assert_eq!(rejection.plan, "free");
                assert_eq!(rejection.limit, 200);
                assert_eq!(rejection.usage, 200);
                assert_eq!(rejection.period, "2026-10");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // rejection leaves usage untouched
        assert_eq!(store.get_usage("acct", &period()).unwrap(), 200);
    }

    #[test]
    fn test_commit_increments_once() {
        let store = InMemoryUsageStore::new();
        store.set_usage("acct", &period(), 199).unwrap();
        let gate = QuotaGate::with_period(&store, period());
        let free = StaticPlanCatalog::default().lookup("free").unwrap();

        let admission = gate.admit(&free, Some("acct")).unwrap();
        assert_eq!(admission.usage_before(), 199);
        assert_eq!(gate.commit(admission, 7).unwrap(), 206);
        assert_eq!(store.get_usage("acct", &period()).unwrap(), 206);

        // now over quota
        assert!(gate.admit(&free, Some("acct")).is_err());
    }

    #[test]
    fn test_anonymous_and_unlimited_are_admitted() {
        let store = InMemoryUsageStore::new();
        let gate = QuotaGate::with_period(&store, period());
        let catalog = StaticPlanCatalog::default();

        let admission = gate.admit(&catalog.anonymous_plan(), None).unwrap();
        assert_eq!(gate.commit(admission, 5).unwrap(), 0);

        store.set_usage("whale", &period(), 1_000_000).unwrap();
        let unlimited = catalog.lookup("pro_plus").unwrap();
        assert!(gate.admit(&unlimited, Some("whale")).is_ok());
    }

    #[test]
    fn test_limit_serializes_as_number_or_null() {
        let plan = Plan::new("x", Limit::Finite(10), Limit::Unlimited);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["per_file_limit"], 10);
        assert!(json["monthly_quota"].is_null());
        assert_eq!(Limit::Unlimited.to_string(), "unlimited");
    }
}
