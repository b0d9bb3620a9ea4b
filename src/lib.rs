//! Core import-duty calculation for a classification lookup tool.
//!
//! Two subsystems share this crate. The reference-data service
//! ([`infra::hts::HtsClient`]) resolves 8-digit classification codes
//! against a remote store that is too large to ship whole: it is split
//! into chapter-prefix shards fetched on demand, cached on disk as one
//! versioned generation, and searched by prefix for autocomplete. The
//! calculation engine ([`engine::DutyCalculator`]) layers trade-remedy
//! tariffs, exemptions and processing fees on top of a resolved record and
//! returns a structured breakdown.
//!
//! Presentation concerns (screens, history, settings) live in the callers;
//! this crate only talks JSON to the store and structs to everyone else.

pub mod domain;
pub mod engine;
pub mod infra;
pub mod util;

pub use domain::calculation::CalculationFlags;
pub use domain::entities::{
    AdditiveDutyRule, ClassificationRecord, DutyCalculationResult, DutyComponent, DutyKind,
    Fees, RateException, RuleScope, SearchHit,
};
pub use engine::DutyCalculator;
pub use infra::cache::ShardCache;
pub use infra::hts::{HtsClient, HtsClientError, DEFAULT_SEARCH_LIMIT};
