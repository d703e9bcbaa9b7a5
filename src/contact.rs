//! Contact field normalisation shared by party resolution and registration.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::models::MaritalStatus;

/// Shortest normalized number accepted when creating a party.
const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    // RFC 5322 simplified: local@domain.tld
    EMAIL_RE
        .get_or_init(|| {
            Regex::new(
                r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
            )
            .ok()
        })
        .as_ref()
}

/// Validate email format.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() < 5 || email.len() > 254 {
        return false;
    }
    match email_regex() {
        Some(re) => re.is_match(email),
        None => false,
    }
}

/// Trimmed, lowercased email. Blank input yields `None`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalize a phone number for uniqueness lookups.
///
/// Keeps digits only and drops a leading `1` country code from 11-digit
/// US numbers, so `(555) 123-4567`, `555.123.4567` and `+1 555 123 4567`
/// all normalize to `5551234567`. Returns `None` when no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    };
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Whether a normalized number is long enough to identify a party.
pub fn is_plausible_phone(normalized: &str) -> bool {
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&normalized.len())
        && normalized.chars().all(|c| c.is_ascii_digit())
}

/// Map the wizard's marital status values onto the URLA categories.
///
/// Divorced, widowed and single applicants are "Unmarried" on the form.
pub fn normalize_marital_status(raw: &str) -> Option<MaritalStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "married" => Some(MaritalStatus::Married),
        "separated" => Some(MaritalStatus::Separated),
        "unmarried" | "single" | "divorced" | "widowed" => Some(MaritalStatus::Unmarried),
        _ => None,
    }
}

/// Parse a currency amount such as `"$300,000"` or `"250000.50"`.
pub fn parse_amount(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

/// Accepts ISO (`1990-04-01`) and US (`04/01/1990`) dates.
pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Trimmed string, `None` when blank.
pub fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_strips_punctuation_and_country_code() {
        assert_eq!(normalize_phone("(555) 123-4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("+1 555 123 4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("555.123.4567").as_deref(), Some("5551234567"));
        assert_eq!(normalize_phone("---"), None);
    }

    #[test]
    fn test_eleven_digits_without_country_code_kept() {
        assert_eq!(normalize_phone("25551234567").as_deref(), Some("25551234567"));
    }

    #[test]
    fn test_plausible_phone() {
        assert!(is_plausible_phone("5551234567"));
        assert!(!is_plausible_phone("12345"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ann.lee@example.com"));
        assert!(!is_valid_email("ann.lee"));
        assert!(!is_valid_email("ann@localhost"));
        assert_eq!(normalize_email("  Ann@Example.COM "), Some("ann@example.com".to_string()));
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn test_marital_status_mapping() {
        assert_eq!(normalize_marital_status("MARRIED"), Some(MaritalStatus::Married));
        assert_eq!(normalize_marital_status("divorced"), Some(MaritalStatus::Unmarried));
        assert_eq!(normalize_marital_status("complicated"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$300,000"), BigDecimal::from_str("300000").ok());
        assert_eq!(parse_amount("1250.50"), BigDecimal::from_str("1250.50").ok());
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_birth_date() {
        let expected = NaiveDate::from_ymd_opt(1990, 4, 1);
        assert_eq!(parse_birth_date("1990-04-01"), expected);
        assert_eq!(parse_birth_date("04/01/1990"), expected);
        assert_eq!(parse_birth_date("April first"), None);
    }
}
