//! Typed step payloads.
//!
//! Each wizard step decodes its sub-payload into a struct holding exactly the
//! fields that step owns. Keys outside that struct are dropped by serde, which
//! is what keeps a later step from overwriting fields captured earlier.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::address::{self, AddressInput};
use crate::contact;
use crate::errors::AppError;

/// Wizard steps that own data. Anything else is navigation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepName {
    BorrowerInfo1,
    BorrowerInfo2,
    MaritalStatus,
    BorrowerEdit,
    CoBorrowerInfo1,
    CoBorrowerInfo2,
    Loan,
    Navigation(String),
}

/// Top-level payload key a step reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKey {
    Borrower,
    CoBorrower,
    Loan,
}

impl PayloadKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKey::Borrower => "borrower",
            PayloadKey::CoBorrower => "coBorrower",
            PayloadKey::Loan => "loan",
        }
    }
}

impl StepName {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "borrower-info-1" => StepName::BorrowerInfo1,
            "borrower-info-2" => StepName::BorrowerInfo2,
            "marital-status" => StepName::MaritalStatus,
            "borrower-edit" => StepName::BorrowerEdit,
            "co-borrower-info-1" => StepName::CoBorrowerInfo1,
            "co-borrower-info-2" => StepName::CoBorrowerInfo2,
            "loan" => StepName::Loan,
            other => StepName::Navigation(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepName::BorrowerInfo1 => "borrower-info-1",
            StepName::BorrowerInfo2 => "borrower-info-2",
            StepName::MaritalStatus => "marital-status",
            StepName::BorrowerEdit => "borrower-edit",
            StepName::CoBorrowerInfo1 => "co-borrower-info-1",
            StepName::CoBorrowerInfo2 => "co-borrower-info-2",
            StepName::Loan => "loan",
            StepName::Navigation(name) => name,
        }
    }

    pub fn owner(&self) -> Option<PayloadKey> {
        match self {
            StepName::BorrowerInfo1
            | StepName::BorrowerInfo2
            | StepName::MaritalStatus
            | StepName::BorrowerEdit => Some(PayloadKey::Borrower),
            StepName::CoBorrowerInfo1 | StepName::CoBorrowerInfo2 => Some(PayloadKey::CoBorrower),
            StepName::Loan => Some(PayloadKey::Loan),
            StepName::Navigation(_) => None,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `saveStep` call.
///
/// `step` names the step being left; when absent the deal's current form step
/// is used. `nextStep` (or `nextFormStep`) moves the cursor after data writes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStepRequest {
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default, alias = "nextFormStep")]
    pub next_step: Option<String>,
    #[serde(default)]
    pub borrower: Option<Value>,
    #[serde(default)]
    pub co_borrower: Option<Value>,
    #[serde(default)]
    pub loan: Option<Value>,
    /// Unrecognized top-level keys, kept only so they can be logged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SaveStepRequest {
    /// True when no data key is present (a pure cursor move).
    pub fn is_navigation_only(&self) -> bool {
        self.borrower.is_none() && self.co_borrower.is_none() && self.loan.is_none()
    }

    pub fn section(&self, key: PayloadKey) -> Option<&Value> {
        match key {
            PayloadKey::Borrower => self.borrower.as_ref(),
            PayloadKey::CoBorrower => self.co_borrower.as_ref(),
            PayloadKey::Loan => self.loan.as_ref(),
        }
    }

    /// Requested cursor value, `None` when blank.
    pub fn next_step(&self) -> Option<&str> {
        self.next_step
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ============ Per-step field sets ============

/// Identity fields (borrower-info-1, co-borrower-info-1).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFields {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_type: Option<String>,
    pub date_of_birth: Option<String>,
}

/// Address fields in either structured or free-text form.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressFields {
    pub current_address: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl AddressFields {
    pub fn resolve(&self) -> AddressInput {
        address::resolve(
            self.address.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.zip_code.as_deref(),
            self.current_address.as_deref(),
        )
    }
}

/// Consent and military flags. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentFields {
    #[serde(default, alias = "militaryServiceStatus", deserialize_with = "lenient_bool")]
    pub is_veteran: Option<bool>,
    #[serde(default, alias = "consentToCreditCheck", deserialize_with = "lenient_bool")]
    pub accept_terms: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub consent_to_contact: Option<bool>,
}

impl ConsentFields {
    pub fn is_empty(&self) -> bool {
        self.is_veteran.is_none()
            && self.accept_terms.is_none()
            && self.consent_to_contact.is_none()
    }
}

/// borrower-info-2: marital status, current address and consents.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidenceFields {
    pub marital_status: Option<String>,
    #[serde(flatten)]
    pub address: AddressFields,
    #[serde(flatten)]
    pub consents: ConsentFields,
}

/// marital-status step.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaritalStatusFields {
    pub marital_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub dependent_count: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormerResidenceFields {
    pub previous_address: Option<String>,
    pub previous_address_city: Option<String>,
    pub previous_address_state: Option<String>,
    pub previous_address_zip: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub years_at_previous_address: Option<i32>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub months_at_previous_address: Option<i32>,
    pub previous_housing_status: Option<String>,
}

impl FormerResidenceFields {
    /// The previous address line is treated as free text when city/state/zip are absent.
    pub fn resolve(&self) -> AddressInput {
        let structured = address::resolve(
            self.previous_address.as_deref(),
            self.previous_address_city.as_deref(),
            self.previous_address_state.as_deref(),
            self.previous_address_zip.as_deref(),
            None,
        );
        match structured {
            AddressInput::Unparseable(reason) => self
                .previous_address
                .as_deref()
                .and_then(address::parse_free_text)
                .map(AddressInput::Resolved)
                .unwrap_or(AddressInput::Unparseable(reason)),
            other => other,
        }
    }
}

/// borrower-edit: the full profile screen.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(flatten)]
    pub identity: IdentityFields,
    #[serde(flatten)]
    pub residence: ResidenceFields,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub dependent_count: Option<i32>,
    pub dependent_ages: Option<String>,
    pub citizenship_type: Option<String>,
    pub home_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub work_phone_ext: Option<String>,
    #[serde(flatten)]
    pub former: FormerResidenceFields,
}

/// co-borrower-info-2.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoBorrowerResidenceFields {
    #[serde(flatten)]
    pub residence: ResidenceFields,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub live_together: Option<bool>,
}

/// loan step. Purpose is deliberately absent: it is fixed at creation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanFields {
    #[serde(default, deserialize_with = "lenient_amount")]
    pub loan_amount: Option<BigDecimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub purchase_price: Option<BigDecimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub down_payment: Option<BigDecimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub estimated_price: Option<BigDecimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub outstanding_balance: Option<BigDecimal>,
    pub property_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pub loan_term_months: Option<i32>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub interest_rate: Option<BigDecimal>,
    pub property_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_applying_for_other_loans: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_down_payment_part_gift: Option<bool>,
}

/// A step's data, decoded into the fields it owns.
#[derive(Debug, Clone)]
pub enum StepPayload {
    BorrowerInfo1(IdentityFields),
    BorrowerInfo2(ResidenceFields),
    MaritalStatus(MaritalStatusFields),
    BorrowerEdit(Box<ProfileFields>),
    CoBorrowerInfo1(IdentityFields),
    CoBorrowerInfo2(CoBorrowerResidenceFields),
    Loan(LoanFields),
    /// Nothing to write for this step.
    Empty,
}

impl StepPayload {
    /// Decode the sub-payload owned by `step`.
    ///
    /// Data under keys the step does not own is ignored and logged.
    pub fn decode(step: &StepName, request: &SaveStepRequest) -> Result<Self, AppError> {
        for key in [PayloadKey::Borrower, PayloadKey::CoBorrower, PayloadKey::Loan] {
            if request.section(key).is_some() && step.owner() != Some(key) {
                tracing::debug!(
                    "Ignoring '{}' data on step '{}' (not owned by this step)",
                    key.as_str(),
                    step
                );
            }
        }
        if !request.extra.is_empty() {
            tracing::debug!(
                "Ignoring unrecognized keys on step '{}': {:?}",
                step,
                request.extra.keys().collect::<Vec<_>>()
            );
        }

        let Some(owner) = step.owner() else {
            return Ok(StepPayload::Empty);
        };
        let value = match request.section(owner) {
            Some(Value::Null) | None => return Ok(StepPayload::Empty),
            Some(value) => value,
        };

        let payload = match step {
            StepName::BorrowerInfo1 => StepPayload::BorrowerInfo1(decode_fields(step, value)?),
            StepName::BorrowerInfo2 => StepPayload::BorrowerInfo2(decode_fields(step, value)?),
            StepName::MaritalStatus => StepPayload::MaritalStatus(decode_fields(step, value)?),
            StepName::BorrowerEdit => {
                StepPayload::BorrowerEdit(Box::new(decode_fields(step, value)?))
            }
            StepName::CoBorrowerInfo1 => {
                StepPayload::CoBorrowerInfo1(decode_fields(step, value)?)
            }
            StepName::CoBorrowerInfo2 => {
                StepPayload::CoBorrowerInfo2(decode_fields(step, value)?)
            }
            StepName::Loan => StepPayload::Loan(decode_fields(step, value)?),
            StepName::Navigation(_) => StepPayload::Empty,
        };
        Ok(payload)
    }
}

fn decode_fields<T: serde::de::DeserializeOwned>(
    step: &StepName,
    value: &Value,
) -> Result<T, AppError> {
    if !value.is_object() {
        return Err(AppError::ValidationError(format!(
            "step '{}' expects an object payload",
            step
        )));
    }
    serde_json::from_value(value.clone()).map_err(|e| {
        AppError::ValidationError(format!("invalid payload for step '{}': {}", step, e))
    })
}

// ============ Lenient scalar decoding ============
// The wizard sends numbers and booleans as strings on some screens.

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => contact::parse_amount(&n.to_string()),
        Some(Value::String(s)) => contact::parse_amount(&s),
        _ => None,
    })
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn request(value: Value) -> SaveStepRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_navigation_only_request() {
        let req = request(json!({"nextStep": "review"}));
        assert!(req.is_navigation_only());
        assert_eq!(req.next_step(), Some("review"));

        let req = request(json!({"nextFormStep": "  ", "unknown": 1}));
        assert!(req.is_navigation_only());
        assert_eq!(req.next_step(), None);
    }

    #[test]
    fn test_marital_status_step_drops_identity_fields() {
        let req = request(json!({
            "step": "marital-status",
            "borrower": {"firstName": "Mallory", "maritalStatus": "Married", "dependentCount": "2"}
        }));
        let payload = StepPayload::decode(&StepName::parse("marital-status"), &req).unwrap();
        match payload {
            StepPayload::MaritalStatus(fields) => {
                assert_eq!(fields.marital_status.as_deref(), Some("Married"));
                assert_eq!(fields.dependent_count, Some(2));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unowned_keys_are_ignored() {
        let req = request(json!({
            "borrower": {"firstName": "Ann"},
            "loan": {"loanAmount": 1}
        }));
        let payload = StepPayload::decode(&StepName::Loan, &req).unwrap();
        assert!(matches!(payload, StepPayload::Loan(_)));

        let payload = StepPayload::decode(&StepName::parse("review"), &req).unwrap();
        assert!(matches!(payload, StepPayload::Empty));
    }

    #[test]
    fn test_loan_amounts_accept_currency_strings() {
        let req = request(json!({
            "loan": {
                "purchasePrice": "$400,000",
                "downPayment": 80000,
                "isDownPaymentPartGift": "yes"
            }
        }));
        match StepPayload::decode(&StepName::Loan, &req).unwrap() {
            StepPayload::Loan(fields) => {
                assert_eq!(fields.purchase_price, BigDecimal::from_str("400000").ok());
                assert_eq!(fields.down_payment, BigDecimal::from_str("80000").ok());
                assert_eq!(fields.is_down_payment_part_gift, Some(true));
                assert_eq!(fields.loan_amount, None);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_consent_aliases() {
        let req = request(json!({
            "borrower": {"militaryServiceStatus": true, "consentToCreditCheck": "false"}
        }));
        match StepPayload::decode(&StepName::BorrowerInfo2, &req).unwrap() {
            StepPayload::BorrowerInfo2(fields) => {
                assert_eq!(fields.consents.is_veteran, Some(true));
                assert_eq!(fields.consents.accept_terms, Some(false));
                assert_eq!(fields.consents.consent_to_contact, None);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_non_object_payload_is_validation_error() {
        let req = request(json!({"borrower": "Ann"}));
        assert!(matches!(
            StepPayload::decode(&StepName::BorrowerInfo1, &req),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_former_residence_free_text_fallback() {
        let fields = FormerResidenceFields {
            previous_address: Some("9 Elm Rd, Austin, TX 78701".into()),
            ..Default::default()
        };
        match fields.resolve() {
            AddressInput::Resolved(a) => assert_eq!(a.city, "Austin"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
