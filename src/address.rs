//! Address resolution for residence and subject property writes.

use serde::{Deserialize, Serialize};

use crate::contact::non_blank;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

impl Address {
    /// Renders `street, city, ST zip`, the same shape `parse_free_text` reads.
    pub fn format(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.zip_code
        )
    }
}

/// Outcome of reading the address fields of a step payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressInput {
    /// No address fields were sent.
    Absent,
    Resolved(Address),
    /// Address fields were sent but did not form a full address.
    Unparseable(String),
}

/// Parse `"street, city, STATE zip"`.
///
/// Splits on commas; the last segment must be exactly `STATE ZIP`, the one
/// before it is the city, and everything earlier is the street (so street
/// lines containing commas survive). Returns `None` when any part is missing.
pub fn parse_free_text(raw: &str) -> Option<Address> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() < 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let tail: Vec<&str> = parts[parts.len() - 1].split_whitespace().collect();
    if tail.len() != 2 {
        return None;
    }

    let city = parts[parts.len() - 2];
    let street = parts[..parts.len() - 2].join(", ");

    Some(Address {
        street,
        city: city.to_string(),
        state: tail[0].to_uppercase(),
        zip_code: tail[1].to_string(),
    })
}

/// Resolve structured fields or a free-text line into an address.
///
/// Structured fields win when all four are present.
pub fn resolve(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    zip_code: Option<&str>,
    free_text: Option<&str>,
) -> AddressInput {
    let street = non_blank(street);
    let city = non_blank(city);
    let state = non_blank(state);
    let zip_code = non_blank(zip_code);
    let free_text = non_blank(free_text);

    if let (Some(street), Some(city), Some(state), Some(zip_code)) =
        (street.as_ref(), city.as_ref(), state.as_ref(), zip_code.as_ref())
    {
        return AddressInput::Resolved(Address {
            street: street.clone(),
            city: city.clone(),
            state: state.to_uppercase(),
            zip_code: zip_code.clone(),
        });
    }

    if let Some(text) = free_text {
        return match parse_free_text(&text) {
            Some(address) => AddressInput::Resolved(address),
            None => AddressInput::Unparseable(format!("could not parse address '{}'", text)),
        };
    }

    if street.is_some() || city.is_some() || state.is_some() || zip_code.is_some() {
        return AddressInput::Unparseable("incomplete structured address".to_string());
    }

    AddressInput::Absent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_free_text() {
        let address = parse_free_text("123 Main St, Springfield, IL 62704").unwrap();
        assert_eq!(address.street, "123 Main St");
        assert_eq!(address.city, "Springfield");
        assert_eq!(address.state, "IL");
        assert_eq!(address.zip_code, "62704");
    }

    #[test]
    fn test_parse_keeps_commas_in_street() {
        let address = parse_free_text("Apt 4, 9 Elm Rd, Austin, tx 78701").unwrap();
        assert_eq!(address.street, "Apt 4, 9 Elm Rd");
        assert_eq!(address.state, "TX");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_free_text("garbage"), None);
        assert_eq!(parse_free_text("1 Main St, Springfield"), None);
        assert_eq!(parse_free_text("1 Main St, Springfield, IL"), None);
        assert_eq!(parse_free_text("1 Main St, , IL 62704"), None);
    }

    #[test]
    fn test_format_round_trips() {
        let address = parse_free_text("123 Main St, Springfield, IL 62704").unwrap();
        assert_eq!(parse_free_text(&address.format()), Some(address));
    }

    #[test]
    fn test_resolve_prefers_structured() {
        let input = resolve(
            Some("1 Oak Ave"),
            Some("Dover"),
            Some("de"),
            Some("19901"),
            Some("garbage"),
        );
        match input {
            AddressInput::Resolved(a) => {
                assert_eq!(a.street, "1 Oak Ave");
                assert_eq!(a.state, "DE");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_absent_and_partial() {
        assert_eq!(resolve(None, None, None, Some("  "), None), AddressInput::Absent);
        assert!(matches!(
            resolve(Some("1 Oak Ave"), None, None, None, None),
            AddressInput::Unparseable(_)
        ));
        assert!(matches!(
            resolve(None, None, None, None, Some("garbage")),
            AddressInput::Unparseable(_)
        ));
    }
}
