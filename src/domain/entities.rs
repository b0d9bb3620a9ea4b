use serde::Serialize;

/// One line of the classification database, keyed by its 8-digit code.
///
/// Records are built once from wire data and never mutated afterwards; a
/// version bump on the remote store replaces whole shards, not individual
/// records.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationRecord {
    pub code: String,
    pub description: String,
    /// Most-favored-nation ad-valorem rate, in percent. 0 for duty-free lines.
    pub base_rate: f64,
    /// Punitive rate applied instead of `base_rate` when the origin country
    /// has its normal trade relations status suspended.
    pub column2_rate: f64,
    /// Origin countries that take the Column 2 rate.
    pub ntr_suspended: Vec<String>,
    /// Trade-remedy layers stacked on the base rate, in document order.
    pub additive_duties: Vec<AdditiveDutyRule>,
}

/// Tariff layer kinds. `Mfn` and `Column2` only ever appear on the base
/// component of a result; rules carry one of the remedy kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyKind {
    Mfn,
    Column2,
    Section301,
    Section232,
    Reciprocal,
    Ieepa,
    Fentanyl,
    Other,
}

/// Which origin countries a rule applies to.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleScope {
    All,
    Countries(Vec<String>),
}

impl RuleScope {
    pub fn includes(&self, country: &str) -> bool {
        match self {
            RuleScope::All => true,
            RuleScope::Countries(countries) => countries.iter().any(|c| c == country),
        }
    }
}

/// Country-specific rate override on a rule. Outranks both the quota table
/// and the rule's default rate.
#[derive(Clone, Debug, PartialEq)]
pub struct RateException {
    pub countries: Vec<String>,
    pub rate: f64,
}

/// One trade-remedy layer attached to a record.
///
/// Every wire shape the store has used over time (typed additive duties,
/// per-country reciprocal rows, IEEPA rows) normalizes into this union at
/// load time, so the engine never matches on label text.
#[derive(Clone, Debug, PartialEq)]
pub struct AdditiveDutyRule {
    pub kind: DutyKind,
    pub scope: RuleScope,
    /// Default ad-valorem rate, in percent.
    pub rate: f64,
    pub exceptions: Vec<RateException>,
    /// Consult the quota table for this record's material class before
    /// falling back to `rate`.
    pub quota_eligible: bool,
    pub label: String,
}

/// A downloadable partition of the classification database: every record
/// whose code starts with `segment`.
#[derive(Clone, Debug, PartialEq)]
pub struct Shard {
    pub segment: String,
    pub count: usize,
    pub entries: Vec<ClassificationRecord>,
}

/// One applied tariff layer in a calculation result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DutyComponent {
    pub kind: DutyKind,
    /// Ad-valorem rate, in percent.
    pub rate: f64,
    pub amount: f64,
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FeeLine {
    /// Fee rate, in percent of declared value.
    pub rate: f64,
    pub amount: f64,
}

/// Processing fees applied to every import regardless of tariff layers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Fees {
    pub mpf: FeeLine,
    pub hmf: FeeLine,
}

/// Full duty breakdown for one shipment. Created fresh on every
/// calculation; never mutated after being returned.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DutyCalculationResult {
    pub code: String,
    pub description: String,
    /// Base component first, then remedy layers in document order.
    pub components: Vec<DutyComponent>,
    /// Sum of all component rates, in percent.
    pub total_rate: f64,
    /// Sum of all component amounts, before fees.
    pub duty_only: f64,
    pub fees: Fees,
    /// `duty_only` plus both fees.
    pub amount: f64,
}

/// Autocomplete result row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub code: String,
    pub description: String,
}
