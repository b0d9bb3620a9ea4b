/// Origin country used for remedy-rule scope matching. Trade actions treat
/// Hong Kong and Macau as mainland China; base-rate resolution keeps the
/// declared origin.
pub fn remedy_scope(country: &str) -> &str {
    match country {
        "HK" | "MO" => "CN",
        other => other,
    }
}

/// Strips the BOM and surrounding whitespace that classification codes
/// sometimes carry in wire data.
pub fn clean_code(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '\u{feff}' || c.is_whitespace())
        .to_string()
}

/// Whether a string is a normalized 8-digit classification code.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == 8 && code.bytes().all(|b| b.is_ascii_digit())
}
