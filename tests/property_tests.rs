/// Property-based tests using proptest
/// Tests invariants of normalization, address parsing and progress projection
use proptest::prelude::*;
use rust_urla_api::address::{parse_free_text, Address};
use rust_urla_api::contact::{is_valid_email, normalize_email, normalize_phone, parse_amount};
use rust_urla_api::progress::{Section, SectionFlags};

// Property: normalization never panics on arbitrary input
proptest! {
    #[test]
    fn phone_normalization_never_panics(phone in "\\PC*") {
        let _ = normalize_phone(&phone);
    }

    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
        let _ = normalize_email(&email);
    }

    #[test]
    fn address_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_free_text(&raw);
    }

    #[test]
    fn amount_parsing_never_panics(raw in "\\PC*") {
        let _ = parse_amount(&raw);
    }
}

// Property: formatting of a phone number does not change its identity
proptest! {
    #[test]
    fn formatted_phones_normalize_to_the_same_digits(
        area in 200u16..=999u16,
        exchange in 200u16..=999u16,
        line in 0u16..=9999u16
    ) {
        let digits = format!("{}{}{:04}", area, exchange, line);
        let variants = [
            digits.clone(),
            format!("({}) {}-{:04}", area, exchange, line),
            format!("{}.{}.{:04}", area, exchange, line),
            format!("+1 {} {} {:04}", area, exchange, line),
            format!("1-{}-{}-{:04}", area, exchange, line),
        ];
        for variant in &variants {
            prop_assert_eq!(normalize_phone(variant), Some(digits.clone()));
        }
    }

    #[test]
    fn emails_normalize_case_insensitively(
        local in "[a-z]{1,10}",
        domain in "[a-z]{1,10}",
        tld in "[a-z]{2,4}"
    ) {
        let email = format!("{}@{}.{}", local, domain, tld);
        prop_assert_eq!(normalize_email(&email.to_uppercase()), Some(email.clone()));
        prop_assert!(is_valid_email(&email));
    }
}

// Property: a formatted address parses back to itself
proptest! {
    #[test]
    fn formatted_address_reparses(
        number in 1u32..99999u32,
        street in "[A-Z][a-z]{2,10}",
        suffix in prop::sample::select(vec!["St", "Ave", "Rd", "Blvd", "Ln"]),
        city in "[A-Z][a-z]{2,12}",
        state in "[A-Z]{2}",
        zip in "[0-9]{5}"
    ) {
        let address = Address {
            street: format!("{} {} {}", number, street, suffix),
            city,
            state,
            zip_code: zip,
        };
        prop_assert_eq!(parse_free_text(&address.format()), Some(address));
    }
}

// Property: the next incomplete section is the first false flag in canonical order
proptest! {
    #[test]
    fn next_incomplete_is_first_unset_section(flags in prop::collection::vec(any::<bool>(), 22)) {
        let mut set = SectionFlags::default();
        for (section, complete) in Section::ALL.iter().zip(flags.iter()) {
            set.set(*section, *complete);
        }

        let expected = Section::ALL
            .iter()
            .zip(flags.iter())
            .find(|(_, complete)| !**complete)
            .map(|(section, _)| *section);
        prop_assert_eq!(set.next_incomplete(), expected);

        let done = flags.iter().filter(|f| **f).count();
        prop_assert_eq!(set.completed_count(), done);
        prop_assert!((0..=100).contains(&set.percentage()));
        prop_assert_eq!(set.percentage() == 100, done == Section::ALL.len());
    }
}
