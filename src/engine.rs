//! Duty calculation engine: resolves a classification record through the
//! reference-data service and applies the layered tariff rules to it.

use std::sync::Arc;

use crate::domain::calculation::{self, CalculationFlags};
use crate::domain::entities::DutyCalculationResult;
use crate::infra::hts::{HtsClient, HtsClientError};

/// The calculation entry point consumed by presentation collaborators.
/// Holds shared references; construct once per process and clone freely.
#[derive(Clone)]
pub struct DutyCalculator {
    refdata: Arc<HtsClient>,
}

impl DutyCalculator {
    pub fn new(refdata: Arc<HtsClient>) -> Self {
        Self { refdata }
    }

    /// Full duty breakdown for a shipment. `Ok(None)` means the code has no
    /// entry in the classification database; callers surface that as "not
    /// found" rather than an error. Only network failures (after the retry
    /// budget) surface as `Err`.
    ///
    /// `code` is expected normalized to 8 digits and `country` to a known
    /// 2-letter code; validation belongs to the caller.
    pub async fn calculate(
        &self,
        code: &str,
        declared_value: f64,
        country: &str,
        flags: CalculationFlags,
    ) -> Result<Option<DutyCalculationResult>, HtsClientError> {
        let Some(record) = self.refdata.lookup(code).await? else {
            return Ok(None);
        };
        Ok(Some(calculation::calculate(
            &record,
            declared_value,
            country,
            flags,
        )))
    }
}
