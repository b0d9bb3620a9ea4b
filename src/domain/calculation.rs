//! Pure duty calculation over a resolved classification record.
//!
//! No I/O and no retained state: the result is a function of the record,
//! the shipment inputs and the static rule configuration.

use std::collections::HashSet;

use tracing::debug;

use super::entities::{
    AdditiveDutyRule, ClassificationRecord, DutyCalculationResult, DutyComponent, DutyKind, FeeLine,
    Fees,
};
use super::rules;
use crate::util::country;

// Merchandise Processing Fee: 0.3464% of declared value, clamped.
const MPF_RATE: f64 = 0.003464;
const MPF_MIN: f64 = 27.75;
const MPF_MAX: f64 = 538.40;
// Harbor Maintenance Fee: 0.125%, uncapped.
const HMF_RATE: f64 = 0.00125;

/// Caller toggles for a calculation.
#[derive(Clone, Copy, Debug)]
pub struct CalculationFlags {
    /// Reciprocal layers always stack on the base rate; the toggle is part
    /// of the caller contract but does not change the arithmetic.
    pub reciprocal_additive: bool,
    /// Drop every reciprocal-kind layer from the breakdown.
    pub exclude_reciprocal: bool,
    /// Shipment carries a USMCA certificate of origin.
    pub usmca_origin: bool,
}

impl Default for CalculationFlags {
    fn default() -> Self {
        Self {
            reciprocal_additive: true,
            exclude_reciprocal: false,
            usmca_origin: false,
        }
    }
}

/// Computes the full duty breakdown for one shipment.
///
/// `country_code` is assumed normalized to a known 2-letter code and
/// `declared_value` to a positive amount; the record comes from the
/// reference-data service.
pub fn calculate(
    record: &ClassificationRecord,
    declared_value: f64,
    country_code: &str,
    flags: CalculationFlags,
) -> DutyCalculationResult {
    let remedy_country = country::remedy_scope(country_code);
    let mut components: Vec<DutyComponent> = Vec::new();

    // Base component comes first, even at 0%.
    let (base_kind, base_rate, base_label) = if record.ntr_suspended.iter().any(|c| c == country_code)
    {
        (DutyKind::Column2, record.column2_rate, "Column 2")
    } else {
        (DutyKind::Mfn, record.base_rate, "MFN")
    };
    components.push(component(base_kind, base_rate, declared_value, base_label));

    // Rules reached through different wire paths can encode the same layer;
    // only the first instance of a (kind, effective rate) pair counts.
    let mut seen: HashSet<(DutyKind, u64)> = HashSet::new();

    for rule in &record.additive_duties {
        if !rule.scope.includes(remedy_country) {
            continue;
        }
        if rule.kind == DutyKind::Reciprocal {
            if flags.exclude_reciprocal {
                continue;
            }
            if flags.usmca_origin && matches!(country_code, "CA" | "MX") {
                continue;
            }
        }
        if rules::is_exempt(&record.code, rule.kind) {
            debug!(code = %record.code, kind = ?rule.kind, "chapter exemption; skipping layer");
            continue;
        }
        // Emergency IEEPA measures do not stack with Section 232.
        if rule.kind == DutyKind::Ieepa
            && components.iter().any(|c| c.kind == DutyKind::Section232)
        {
            debug!(code = %record.code, "skipping IEEPA layer; Section 232 takes precedence");
            continue;
        }

        let rate = effective_rate(rule, remedy_country, &record.code);
        if !seen.insert((rule.kind, rate.to_bits())) {
            continue;
        }
        components.push(component(rule.kind, rate, declared_value, &rule.label));
    }

    let total_rate = components.iter().map(|c| c.rate).sum();
    let duty_only = components.iter().map(|c| c.amount).sum::<f64>();
    let mpf = (declared_value * MPF_RATE).clamp(MPF_MIN, MPF_MAX);
    let hmf = declared_value * HMF_RATE;

    DutyCalculationResult {
        code: record.code.clone(),
        description: record.description.clone(),
        components,
        total_rate,
        duty_only,
        fees: Fees {
            mpf: FeeLine {
                rate: MPF_RATE * 100.0,
                amount: mpf,
            },
            hmf: FeeLine {
                rate: HMF_RATE * 100.0,
                amount: hmf,
            },
        },
        amount: duty_only + mpf + hmf,
    }
}

/// Effective rate for a rule and origin country, in priority order:
/// country exception, then quota table, then the rule's default rate.
fn effective_rate(rule: &AdditiveDutyRule, country: &str, code: &str) -> f64 {
    if let Some(exception) = rule
        .exceptions
        .iter()
        .find(|e| e.countries.iter().any(|c| c == country))
    {
        return exception.rate;
    }

    if rule.quota_eligible {
        // No quota-consumption feed exists, so quota lines always take the
        // over-quota rate.
        match rules::material_class(code).and_then(|class| rules::over_quota_rate(country, class)) {
            Some(rate) => return rate,
            None => {
                debug!(country, code, "no quota arrangement; using default rate");
            }
        }
    }

    rule.rate
}

fn component(kind: DutyKind, rate: f64, declared_value: f64, label: &str) -> DutyComponent {
    DutyComponent {
        kind,
        rate,
        amount: declared_value * rate / 100.0,
        label: label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{RateException, RuleScope};

    fn record(code: &str, base_rate: f64, duties: Vec<AdditiveDutyRule>) -> ClassificationRecord {
        ClassificationRecord {
            code: code.to_string(),
            description: "test entry".to_string(),
            base_rate,
            column2_rate: 0.0,
            ntr_suspended: Vec::new(),
            additive_duties: duties,
        }
    }

    fn rule(kind: DutyKind, scope: RuleScope, rate: f64) -> AdditiveDutyRule {
        AdditiveDutyRule {
            kind,
            scope,
            rate,
            exceptions: Vec::new(),
            quota_eligible: false,
            label: format!("{kind:?}"),
        }
    }

    fn countries(codes: &[&str]) -> RuleScope {
        RuleScope::Countries(codes.iter().map(|c| c.to_string()).collect())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn duty_free_record_yields_single_zero_component() {
        let r = record("01012100", 0.0, Vec::new());
        let res = calculate(&r, 1000.0, "DE", CalculationFlags::default());

        assert_eq!(res.components.len(), 1);
        assert_eq!(res.components[0].kind, DutyKind::Mfn);
        assert_eq!(res.components[0].rate, 0.0);
        assert_eq!(res.duty_only, 0.0);
        assert_eq!(res.total_rate, 0.0);
        // Fees still apply to duty-free lines.
        assert!(close(res.fees.mpf.amount, 27.75));
        assert!(close(res.fees.hmf.amount, 1.25));
        assert!(close(res.amount, 29.0));
    }

    #[test]
    fn mpf_clamps_to_floor_and_ceiling() {
        let r = record("01012100", 0.0, Vec::new());

        let res = calculate(&r, 1_000.0, "DE", CalculationFlags::default());
        assert!(close(res.fees.mpf.amount, 27.75));

        let res = calculate(&r, 10_000.0, "DE", CalculationFlags::default());
        assert!(close(res.fees.mpf.amount, 34.64));

        let res = calculate(&r, 1_000_000.0, "DE", CalculationFlags::default());
        assert!(close(res.fees.mpf.amount, 538.40));
    }

    #[test]
    fn hmf_is_uncapped() {
        let r = record("01012100", 0.0, Vec::new());
        let res = calculate(&r, 10_000.0, "DE", CalculationFlags::default());
        assert!(close(res.fees.hmf.amount, 12.50));

        let res = calculate(&r, 10_000_000.0, "DE", CalculationFlags::default());
        assert!(close(res.fees.hmf.amount, 12_500.0));
    }

    #[test]
    fn exception_outranks_quota_and_default_for_steel() {
        let mut steel = rule(DutyKind::Section232, RuleScope::All, 50.0);
        steel.quota_eligible = true;
        steel.exceptions.push(RateException {
            countries: vec!["GB".to_string(), "UK".to_string()],
            rate: 25.0,
        });
        let r = record("72011000", 0.0, vec![steel]);

        let res = calculate(&r, 1000.0, "DE", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 50.0);
        assert!(close(res.components[1].amount, 500.0));

        let res = calculate(&r, 1000.0, "GB", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 25.0);
        assert!(close(res.components[1].amount, 250.0));
    }

    #[test]
    fn country_exception_overrides_own_default() {
        let mut layer = rule(DutyKind::Other, RuleScope::All, 25.0);
        layer.exceptions.push(RateException {
            countries: vec!["CA".to_string()],
            rate: 10.0,
        });
        let r = record("31042000", 0.0, vec![layer]);

        let res = calculate(&r, 1000.0, "CA", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 10.0);
        assert!(close(res.components[1].amount, 100.0));

        let res = calculate(&r, 1000.0, "DE", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 25.0);
    }

    #[test]
    fn quota_rate_replaces_default_for_participants_only() {
        let mut aluminum = rule(DutyKind::Section232, RuleScope::All, 50.0);
        aluminum.quota_eligible = true;
        let r = record("76011000", 0.0, vec![aluminum]);

        // UK arrangement keeps the reduced over-quota rate.
        let res = calculate(&r, 1000.0, "GB", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 25.0);

        // No arrangement: the rule's own rate stands.
        let res = calculate(&r, 1000.0, "JP", CalculationFlags::default());
        assert_eq!(res.components[1].rate, 50.0);
    }

    #[test]
    fn duplicate_kind_rate_pairs_collapse() {
        let first = rule(DutyKind::Fentanyl, countries(&["CN"]), 20.0);
        let mut second = rule(DutyKind::Fentanyl, countries(&["CN"]), 20.0);
        second.label = "Anti-trafficking tariff".to_string();
        let r = record("85011000", 5.0, vec![first, second]);

        let res = calculate(&r, 1000.0, "CN", CalculationFlags::default());
        assert_eq!(res.components.len(), 2);
        assert_eq!(res.total_rate, 25.0);
        assert!(close(res.duty_only, 250.0));
    }

    #[test]
    fn exclude_reciprocal_removes_every_reciprocal_layer() {
        let r = record(
            "85011000",
            0.0,
            vec![
                rule(DutyKind::Reciprocal, countries(&["CN"]), 10.0),
                rule(DutyKind::Section301, countries(&["CN"]), 25.0),
            ],
        );
        let flags = CalculationFlags {
            exclude_reciprocal: true,
            ..Default::default()
        };

        let res = calculate(&r, 1000.0, "CN", flags);
        let kinds: Vec<_> = res.components.iter().map(|c| c.kind).collect();
        assert!(!kinds.contains(&DutyKind::Reciprocal));
        assert!(kinds.contains(&DutyKind::Section301));
    }

    #[test]
    fn usmca_origin_drops_reciprocal_for_usmca_partners_only() {
        let duties = vec![
            rule(DutyKind::Reciprocal, RuleScope::All, 25.0),
            rule(DutyKind::Fentanyl, RuleScope::All, 20.0),
        ];
        let r = record("85011000", 0.0, duties);
        let flags = CalculationFlags {
            usmca_origin: true,
            ..Default::default()
        };

        let res = calculate(&r, 1000.0, "CA", flags);
        let kinds: Vec<_> = res.components.iter().map(|c| c.kind).collect();
        assert!(!kinds.contains(&DutyKind::Reciprocal));
        assert!(kinds.contains(&DutyKind::Fentanyl));

        let res = calculate(&r, 1000.0, "MX", flags);
        assert!(!res.components.iter().any(|c| c.kind == DutyKind::Reciprocal));

        // The carve-out is origin-certificate specific; other countries keep
        // the layer even with the flag set.
        let res = calculate(&r, 1000.0, "DE", flags);
        assert!(res.components.iter().any(|c| c.kind == DutyKind::Reciprocal));
    }

    #[test]
    fn ntr_suspended_origin_takes_column2_base() {
        let mut r = record("44071100", 3.0, Vec::new());
        r.column2_rate = 35.0;
        r.ntr_suspended = vec!["RU".to_string(), "BY".to_string()];

        let res = calculate(&r, 1000.0, "RU", CalculationFlags::default());
        assert_eq!(res.components[0].kind, DutyKind::Column2);
        assert_eq!(res.components[0].rate, 35.0);
        assert_eq!(res.components[0].label, "Column 2");

        let res = calculate(&r, 1000.0, "DE", CalculationFlags::default());
        assert_eq!(res.components[0].kind, DutyKind::Mfn);
        assert_eq!(res.components[0].rate, 3.0);
    }

    #[test]
    fn pharma_chapter_skips_reciprocal_but_not_fentanyl() {
        let r = record(
            "30049010",
            0.0,
            vec![
                rule(DutyKind::Reciprocal, countries(&["CN"]), 10.0),
                rule(DutyKind::Fentanyl, countries(&["CN"]), 20.0),
            ],
        );

        let res = calculate(&r, 1000.0, "CN", CalculationFlags::default());
        let kinds: Vec<_> = res.components.iter().map(|c| c.kind).collect();
        assert!(!kinds.contains(&DutyKind::Reciprocal));
        assert!(kinds.contains(&DutyKind::Fentanyl));
    }

    #[test]
    fn returned_goods_chapter_skips_fentanyl_but_not_reciprocal() {
        let r = record(
            "98010010",
            0.0,
            vec![
                rule(DutyKind::Reciprocal, countries(&["CN"]), 10.0),
                rule(DutyKind::Fentanyl, countries(&["CN"]), 20.0),
            ],
        );

        let res = calculate(&r, 1000.0, "CN", CalculationFlags::default());
        let kinds: Vec<_> = res.components.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&DutyKind::Reciprocal));
        assert!(!kinds.contains(&DutyKind::Fentanyl));
    }

    #[test]
    fn ieepa_does_not_stack_with_section232() {
        let mut steel = rule(DutyKind::Section232, RuleScope::All, 50.0);
        steel.quota_eligible = true;
        let ieepa = rule(DutyKind::Ieepa, countries(&["CA"]), 25.0);
        let r = record("72011000", 0.0, vec![steel, ieepa.clone()]);

        let res = calculate(&r, 1000.0, "CA", CalculationFlags::default());
        let kinds: Vec<_> = res.components.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&DutyKind::Section232));
        assert!(!kinds.contains(&DutyKind::Ieepa));

        // Without a Section 232 layer the IEEPA measure applies normally.
        let r = record("44071100", 0.0, vec![ieepa]);
        let res = calculate(&r, 1000.0, "CA", CalculationFlags::default());
        assert!(res.components.iter().any(|c| c.kind == DutyKind::Ieepa));
    }

    #[test]
    fn hong_kong_matches_china_scoped_rules() {
        let r = record(
            "85011000",
            0.0,
            vec![rule(DutyKind::Section301, countries(&["CN"]), 25.0)],
        );
        let res = calculate(&r, 1000.0, "HK", CalculationFlags::default());
        assert!(res.components.iter().any(|c| c.kind == DutyKind::Section301));
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let mut steel = rule(DutyKind::Section232, RuleScope::All, 50.0);
        steel.quota_eligible = true;
        let r = record(
            "72011000",
            2.5,
            vec![steel, rule(DutyKind::Reciprocal, countries(&["CN"]), 10.0)],
        );

        let first = calculate(&r, 12_345.0, "CN", CalculationFlags::default());
        let second = calculate(&r, 12_345.0, "CN", CalculationFlags::default());
        assert_eq!(first, second);
    }

    #[test]
    fn totals_sum_components_and_fees() {
        let r = record(
            "85011000",
            5.0,
            vec![rule(DutyKind::Section301, countries(&["CN"]), 25.0)],
        );

        let res = calculate(&r, 10_000.0, "CN", CalculationFlags::default());
        assert_eq!(res.total_rate, 30.0);
        assert!(close(res.duty_only, 3_000.0));
        assert!(close(res.amount, 3_000.0 + 34.64 + 12.50));
    }
}
