//! Classification data model and the pure duty calculation core.

pub mod calculation;
pub mod entities;
pub mod rules;

pub use calculation::{calculate, CalculationFlags};
pub use entities::{
    AdditiveDutyRule, ClassificationRecord, DutyCalculationResult, DutyComponent, DutyKind,
    FeeLine, Fees, RateException, RuleScope, SearchHit, Shard,
};
pub use rules::{material_class, over_quota_rate, quota_info, MaterialClass, QuotaCountryInfo};
