//! Static trade-remedy configuration: quota participation per country and
//! chapter-level exemptions per duty kind. Loaded once, never mutated.

use super::entities::DutyKind;

/// Material classes subject to tariff-rate-quota arrangements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialClass {
    Steel,
    Aluminum,
}

/// Material class of a classification code, by chapter: 72/73 steel, 76
/// aluminum. Everything else has no quota arrangement.
pub fn material_class(code: &str) -> Option<MaterialClass> {
    if code.starts_with("72") || code.starts_with("73") {
        Some(MaterialClass::Steel)
    } else if code.starts_with("76") {
        Some(MaterialClass::Aluminum)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaRates {
    pub in_quota: f64,
    pub over_quota: f64,
}

/// Quota arrangement for one origin country. A `None` class means the
/// country has no arrangement for that material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaCountryInfo {
    pub code: &'static str,
    pub steel: Option<QuotaRates>,
    pub aluminum: Option<QuotaRates>,
}

const fn both(code: &'static str, over_quota: f64) -> QuotaCountryInfo {
    QuotaCountryInfo {
        code,
        steel: Some(QuotaRates { in_quota: 0.0, over_quota }),
        aluminum: Some(QuotaRates { in_quota: 0.0, over_quota }),
    }
}

/// Countries with steel/aluminum quota arrangements. The UK arrangement
/// keeps the pre-increase 25% over-quota rate; everyone else is at 50%.
pub static QUOTA_COUNTRIES: &[QuotaCountryInfo] = &[
    both("AR", 50.0),
    both("BR", 50.0),
    both("KR", 50.0),
    // EU member states
    both("AT", 50.0),
    both("BE", 50.0),
    both("BG", 50.0),
    both("HR", 50.0),
    both("CY", 50.0),
    both("CZ", 50.0),
    both("DK", 50.0),
    both("EE", 50.0),
    both("FI", 50.0),
    both("FR", 50.0),
    both("DE", 50.0),
    both("GR", 50.0),
    both("HU", 50.0),
    both("IE", 50.0),
    both("IT", 50.0),
    both("LV", 50.0),
    both("LT", 50.0),
    both("LU", 50.0),
    both("MT", 50.0),
    both("NL", 50.0),
    both("PL", 50.0),
    both("PT", 50.0),
    both("RO", 50.0),
    both("SK", 50.0),
    both("SI", 50.0),
    both("ES", 50.0),
    both("SE", 50.0),
    // Bloc-level code for entries that do not identify the member state
    both("EU", 50.0),
    // UK arrangement; both ISO and legacy codes appear in wire data
    both("GB", 25.0),
    both("UK", 25.0),
];

pub fn quota_info(country: &str) -> Option<&'static QuotaCountryInfo> {
    QUOTA_COUNTRIES.iter().find(|info| info.code == country)
}

/// Over-quota rate for a country and material class, if the country
/// participates. There is no shipment-volume feed, so callers apply this
/// rate unconditionally rather than the in-quota rate.
pub fn over_quota_rate(country: &str, class: MaterialClass) -> Option<f64> {
    let info = quota_info(country)?;
    let rates = match class {
        MaterialClass::Steel => info.steel,
        MaterialClass::Aluminum => info.aluminum,
    };
    rates.map(|r| r.over_quota)
}

struct ChapterExemption {
    kind: DutyKind,
    chapters: &'static [&'static str],
    prefixes: &'static [&'static str],
}

/// Chapter classes carved out of specific remedy layers, regardless of
/// origin country. Pharmaceuticals, medical devices, semiconductors and
/// energy products skip the reciprocal layer; returned-goods chapter 98
/// skips the anti-trafficking layer.
static CHAPTER_EXEMPTIONS: &[ChapterExemption] = &[
    ChapterExemption {
        kind: DutyKind::Reciprocal,
        chapters: &["27", "30"],
        prefixes: &["9018", "9019", "9020", "9021", "9022", "8541", "8542"],
    },
    ChapterExemption {
        kind: DutyKind::Fentanyl,
        chapters: &["98"],
        prefixes: &[],
    },
];

/// Whether a code's chapter is exempt from a given duty kind.
pub fn is_exempt(code: &str, kind: DutyKind) -> bool {
    CHAPTER_EXEMPTIONS.iter().any(|exemption| {
        exemption.kind == kind
            && (exemption.chapters.iter().any(|ch| code.starts_with(ch))
                || exemption.prefixes.iter().any(|p| code.starts_with(p)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_class_by_chapter() {
        assert_eq!(material_class("72011000"), Some(MaterialClass::Steel));
        assert_eq!(material_class("73089095"), Some(MaterialClass::Steel));
        assert_eq!(material_class("76011000"), Some(MaterialClass::Aluminum));
        assert_eq!(material_class("31042000"), None);
    }

    #[test]
    fn uk_keeps_reduced_over_quota_rate() {
        assert_eq!(over_quota_rate("GB", MaterialClass::Steel), Some(25.0));
        assert_eq!(over_quota_rate("UK", MaterialClass::Aluminum), Some(25.0));
        assert_eq!(over_quota_rate("DE", MaterialClass::Steel), Some(50.0));
    }

    #[test]
    fn non_participants_have_no_quota() {
        assert_eq!(over_quota_rate("JP", MaterialClass::Steel), None);
        assert_eq!(over_quota_rate("CN", MaterialClass::Aluminum), None);
    }

    #[test]
    fn pharma_chapter_skips_reciprocal_only() {
        assert!(is_exempt("30049010", DutyKind::Reciprocal));
        assert!(!is_exempt("30049010", DutyKind::Fentanyl));
        assert!(!is_exempt("30049010", DutyKind::Section301));
    }

    #[test]
    fn returned_goods_chapter_skips_fentanyl_only() {
        assert!(is_exempt("98010010", DutyKind::Fentanyl));
        assert!(!is_exempt("98010010", DutyKind::Reciprocal));
    }

    #[test]
    fn medical_device_prefixes_skip_reciprocal() {
        assert!(is_exempt("90189080", DutyKind::Reciprocal));
        assert!(is_exempt("85423100", DutyKind::Reciprocal));
        assert!(!is_exempt("85011000", DutyKind::Reciprocal));
    }
}
