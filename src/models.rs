use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;
use crate::progress::SectionFlags;

/// Form step every new application starts on.
pub const INITIAL_FORM_STEP: &str = "borrower-info-1";

/// Form step a self-registered borrower resumes on (step 1 was captured at signup).
pub const REGISTERED_FORM_STEP: &str = "borrower-info-2";

// ============ Domain Enums ============

/// Whether the deal has one or two borrowers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationType {
    IndividualCredit,
    JointCredit,
}

impl ApplicationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationType::IndividualCredit => "IndividualCredit",
            ApplicationType::JointCredit => "JointCredit",
        }
    }

    pub fn total_borrowers(&self) -> i32 {
        match self {
            ApplicationType::IndividualCredit => 1,
            ApplicationType::JointCredit => 2,
        }
    }
}

impl FromStr for ApplicationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IndividualCredit" => Ok(ApplicationType::IndividualCredit),
            "JointCredit" => Ok(ApplicationType::JointCredit),
            other => Err(AppError::InternalError(format!(
                "unknown application type '{}'",
                other
            ))),
        }
    }
}

/// Loan purpose. Fixed at deal creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanPurpose {
    Purchase,
    Refinance,
}

impl LoanPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanPurpose::Purchase => "Purchase",
            LoanPurpose::Refinance => "Refinance",
        }
    }
}

impl FromStr for LoanPurpose {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "purchase" => Ok(LoanPurpose::Purchase),
            "refinance" => Ok(LoanPurpose::Refinance),
            other => Err(AppError::ValidationError(format!(
                "unsupported loan purpose '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaritalStatus {
    Married,
    Separated,
    Unmarried,
}

impl MaritalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaritalStatus::Married => "Married",
            MaritalStatus::Separated => "Separated",
            MaritalStatus::Unmarried => "Unmarried",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhoneType {
    Home,
    Mobile,
    Work,
}

impl PhoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneType::Home => "Home",
            PhoneType::Mobile => "Mobile",
            PhoneType::Work => "Work",
        }
    }

    /// Lenient parse of the wizard's phone type values ("mobile", "Cell", "HOME").
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "home" => Some(PhoneType::Home),
            "mobile" | "cell" => Some(PhoneType::Mobile),
            "work" => Some(PhoneType::Work),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResidenceKind {
    Current,
    Former,
}

impl ResidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResidenceKind::Current => "Current",
            ResidenceKind::Former => "Former",
        }
    }
}

/// Role discriminator supplied by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Borrower,
    Employee,
}

impl FromStr for ActorRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "borrower" => Ok(ActorRole::Borrower),
            "employee" => Ok(ActorRole::Employee),
            other => Err(AppError::Unauthorized(format!("unknown actor role '{}'", other))),
        }
    }
}

/// Authenticated caller of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.role, self.id)
    }
}

// ============ Database Models ============

/// A borrower or co-borrower identity record.
///
/// Tri-state flags (`military_service`, `consent_credit_check`, `consent_contact`)
/// keep `None` for "never answered".
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Party {
    pub id: Uuid,
    /// Stored lowercased; unique when present.
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub marital_status: Option<String>,
    pub dependent_count: Option<i32>,
    pub dependent_ages: Option<String>,
    pub citizenship_type: Option<String>,
    pub military_service: Option<bool>,
    pub consent_credit_check: Option<bool>,
    pub consent_contact: Option<bool>,
    /// Normalized digits of the lookup phone; unique when present.
    pub primary_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PartyPhone {
    pub party_id: Uuid,
    pub phone_type: String,
    pub number: String,
    pub extension: Option<String>,
    pub is_primary: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Current or former residence. One row per (party, kind), replaced in place.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Residence {
    pub party_id: Uuid,
    pub residence_type: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub years_at_address: Option<i32>,
    pub months_at_address: Option<i32>,
    pub housing_status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// The application envelope.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub application_type: String,
    pub total_borrowers: i32,
    pub primary_borrower_id: Option<Uuid>,
    pub managing_employee_id: Option<Uuid>,
    pub current_form_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Deal {
    pub fn is_joint(&self) -> bool {
        matches!(
            self.application_type.parse::<ApplicationType>(),
            Ok(ApplicationType::JointCredit)
        )
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Loan {
    pub deal_id: Uuid,
    pub purpose: String,
    pub amount: BigDecimal,
    pub term_months: Option<i32>,
    pub interest_rate: Option<BigDecimal>,
    pub property_type: Option<String>,
    pub purchase_price: Option<BigDecimal>,
    pub down_payment: Option<BigDecimal>,
    pub estimated_price: Option<BigDecimal>,
    pub outstanding_balance: Option<BigDecimal>,
    pub applying_for_other_loans: Option<bool>,
    pub down_payment_gift: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn purpose(&self) -> Result<LoanPurpose, AppError> {
        self.purpose.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubjectProperty {
    pub deal_id: Uuid,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub estimated_value: Option<BigDecimal>,
    pub usage: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Borrower x Deal join record for co-borrowers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CoBorrowerLink {
    pub deal_id: Uuid,
    pub party_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One-to-one progress record for a deal.
#[derive(Debug, Clone, FromRow)]
pub struct DealProgress {
    pub deal_id: Uuid,
    pub section_flags: Json<SectionFlags>,
    pub progress_percentage: i32,
    pub last_updated_section: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Listing row for `listApplications`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealSummary {
    pub deal_id: Uuid,
    pub application_type: String,
    pub loan_purpose: String,
    pub loan_amount: BigDecimal,
    pub current_form_step: Option<String>,
    pub borrower_first_name: Option<String>,
    pub borrower_last_name: Option<String>,
    pub progress_percentage: Option<i32>,
    pub last_updated_section: Option<String>,
    /// How the listing actor relates to the deal: `primary`, `co-borrower` or `managing`.
    pub relation: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_purpose_parse_is_case_insensitive() {
        assert_eq!("purchase".parse::<LoanPurpose>().unwrap(), LoanPurpose::Purchase);
        assert_eq!(" Refinance ".parse::<LoanPurpose>().unwrap(), LoanPurpose::Refinance);
        assert!(matches!(
            "HELOC".parse::<LoanPurpose>(),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_phone_type_aliases() {
        assert_eq!(PhoneType::parse("cell"), Some(PhoneType::Mobile));
        assert_eq!(PhoneType::parse("HOME"), Some(PhoneType::Home));
        assert_eq!(PhoneType::parse("fax"), None);
    }

    #[test]
    fn test_application_type_totals() {
        assert_eq!(ApplicationType::IndividualCredit.total_borrowers(), 1);
        assert_eq!(ApplicationType::JointCredit.total_borrowers(), 2);
        assert!("Joint".parse::<ApplicationType>().is_err());
    }

    #[test]
    fn test_deal_is_joint_reads_stored_type() {
        let mut deal = Deal {
            id: Uuid::new_v4(),
            application_type: "IndividualCredit".into(),
            total_borrowers: 1,
            primary_borrower_id: None,
            managing_employee_id: None,
            current_form_step: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        assert!(!deal.is_joint());
        deal.application_type = "JointCredit".into();
        assert!(deal.is_joint());
        deal.application_type = "Joint".into();
        assert!(!deal.is_joint());
    }

    #[test]
    fn test_actor_role_rejects_unknown() {
        assert_eq!("Employee".parse::<ActorRole>().unwrap(), ActorRole::Employee);
        assert!(matches!(
            "admin".parse::<ActorRole>(),
            Err(AppError::Unauthorized(_))
        ));
    }
}
