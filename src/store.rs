//! Storage port shared by the Postgres and in-memory backends.
//!
//! Components receive an `Arc<dyn ApplicationStore>` at construction; nothing
//! reaches for a global pool.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::address::Address;
use crate::errors::AppError;
use crate::models::{
    CoBorrowerLink, Deal, DealProgress, DealSummary, Employee, LoanPurpose, Loan, MaritalStatus,
    Party, PartyPhone, PhoneType, Residence, ResidenceKind, SubjectProperty,
};
use crate::progress::Section;

/// Usage recorded for subject properties created from the wizard.
pub const DEFAULT_PROPERTY_USAGE: &str = "PrimaryResidence";

/// Phone write. `number` is already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneWrite {
    pub phone_type: PhoneType,
    pub number: String,
    pub extension: Option<String>,
    /// Makes this the lookup phone for the party (unique across parties).
    pub primary: bool,
}

/// Fields for a brand-new party. The primary phone is required.
#[derive(Debug, Clone)]
pub struct NewParty {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub marital_status: Option<MaritalStatus>,
    pub phone: PhoneWrite,
}

/// Partial party update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartyChanges {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub marital_status: Option<MaritalStatus>,
    pub dependent_count: Option<i32>,
    pub dependent_ages: Option<String>,
    pub citizenship_type: Option<String>,
}

impl PartyChanges {
    pub fn is_empty(&self) -> bool {
        *self == PartyChanges::default()
    }
}

/// Tri-state flag update. `None` keeps the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentChanges {
    pub military_service: Option<bool>,
    pub consent_credit_check: Option<bool>,
    pub consent_contact: Option<bool>,
}

impl ConsentChanges {
    pub fn is_empty(&self) -> bool {
        *self == ConsentChanges::default()
    }
}

#[derive(Debug, Clone)]
pub struct ResidenceWrite {
    pub kind: ResidenceKind,
    pub address: Address,
    pub years_at_address: Option<i32>,
    pub months_at_address: Option<i32>,
    pub housing_status: Option<String>,
}

impl ResidenceWrite {
    pub fn current(address: Address) -> Self {
        Self {
            kind: ResidenceKind::Current,
            address,
            years_at_address: None,
            months_at_address: None,
            housing_status: None,
        }
    }
}

/// Subject property upsert. `None` fields keep what is stored.
#[derive(Debug, Clone, Default)]
pub struct SubjectPropertyWrite {
    pub address: Option<Address>,
    pub estimated_value: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub purpose: LoanPurpose,
    pub amount: BigDecimal,
    pub purchase_price: Option<BigDecimal>,
    pub down_payment: Option<BigDecimal>,
    pub estimated_price: Option<BigDecimal>,
    pub outstanding_balance: Option<BigDecimal>,
}

impl NewLoan {
    pub fn new(purpose: LoanPurpose, amount: BigDecimal) -> Self {
        Self {
            purpose,
            amount,
            purchase_price: None,
            down_payment: None,
            estimated_price: None,
            outstanding_balance: None,
        }
    }
}

/// Deal, loan, empty progress record and optional subject property, created together.
#[derive(Debug, Clone)]
pub struct NewDeal {
    pub primary_borrower_id: Option<Uuid>,
    pub managing_employee_id: Option<Uuid>,
    pub current_form_step: String,
    pub loan: NewLoan,
    pub subject_property: Option<SubjectPropertyWrite>,
}

/// Loan update from the loan step. Purpose is not updatable.
#[derive(Debug, Clone, Default)]
pub struct LoanChanges {
    pub amount: Option<BigDecimal>,
    pub term_months: Option<i32>,
    pub interest_rate: Option<BigDecimal>,
    pub property_type: Option<String>,
    pub purchase_price: Option<BigDecimal>,
    pub down_payment: Option<BigDecimal>,
    pub estimated_price: Option<BigDecimal>,
    pub outstanding_balance: Option<BigDecimal>,
    pub applying_for_other_loans: Option<bool>,
    pub down_payment_gift: Option<bool>,
}

impl LoanChanges {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.term_months.is_none()
            && self.interest_rate.is_none()
            && self.property_type.is_none()
            && self.purchase_price.is_none()
            && self.down_payment.is_none()
            && self.estimated_price.is_none()
            && self.outstanding_balance.is_none()
            && self.applying_for_other_loans.is_none()
            && self.down_payment_gift.is_none()
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    // ---- identity ----

    async fn get_employee(&self, id: Uuid) -> Result<Option<Employee>, AppError>;

    async fn get_party(&self, id: Uuid) -> Result<Option<Party>, AppError>;

    /// Case-insensitive email lookup.
    async fn find_party_by_email(&self, email: &str) -> Result<Option<Party>, AppError>;

    /// Lookup by normalized primary phone.
    async fn find_party_by_phone(&self, phone: &str) -> Result<Option<Party>, AppError>;

    /// Inserts the party and its primary phone. Duplicate email or phone is `Conflict`.
    async fn insert_party(&self, party: &NewParty) -> Result<Party, AppError>;

    async fn update_party(&self, id: Uuid, changes: &PartyChanges) -> Result<(), AppError>;

    /// Replaces the phone of that type. A primary phone also becomes the lookup phone.
    async fn upsert_phone(&self, party_id: Uuid, phone: &PhoneWrite) -> Result<(), AppError>;

    async fn get_phones(&self, party_id: Uuid) -> Result<Vec<PartyPhone>, AppError>;

    async fn update_consents(
        &self,
        party_id: Uuid,
        consents: &ConsentChanges,
    ) -> Result<(), AppError>;

    /// Replace-in-place write of the current or former residence.
    async fn upsert_residence(
        &self,
        party_id: Uuid,
        residence: &ResidenceWrite,
    ) -> Result<(), AppError>;

    async fn get_residence(
        &self,
        party_id: Uuid,
        kind: ResidenceKind,
    ) -> Result<Option<Residence>, AppError>;

    // ---- deal ----

    async fn create_deal(&self, deal: &NewDeal) -> Result<Deal, AppError>;

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, AppError>;

    async fn get_loan(&self, deal_id: Uuid) -> Result<Option<Loan>, AppError>;

    async fn get_subject_property(
        &self,
        deal_id: Uuid,
    ) -> Result<Option<SubjectProperty>, AppError>;

    /// Sets the primary borrower only if none is set. Returns whether it was set.
    async fn set_primary_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<bool, AppError>;

    /// Idempotent: re-linking the same party only refreshes the link timestamp.
    async fn link_co_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<(), AppError>;

    /// Co-borrower links, oldest first.
    async fn co_borrowers(&self, deal_id: Uuid) -> Result<Vec<CoBorrowerLink>, AppError>;

    /// Flips the deal to joint credit with two borrowers. There is no reverse operation.
    async fn mark_joint(&self, deal_id: Uuid) -> Result<(), AppError>;

    /// Loan and subject property, in one transaction.
    async fn apply_loan_update(
        &self,
        deal_id: Uuid,
        loan: &LoanChanges,
        property: Option<&SubjectPropertyWrite>,
    ) -> Result<(), AppError>;

    /// Moves the cursor. Returns `false` when it already had that value.
    async fn advance_form_step(&self, deal_id: Uuid, step: &str) -> Result<bool, AppError>;

    /// Bumps the deal's last-activity timestamp.
    async fn touch_deal(&self, deal_id: Uuid) -> Result<(), AppError>;

    /// Deals where the party is primary borrower or linked co-borrower, most recent activity first.
    async fn list_deals_for_borrower(&self, party_id: Uuid)
        -> Result<Vec<DealSummary>, AppError>;

    /// Deals managed by the employee, most recent activity first.
    async fn list_deals_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<DealSummary>, AppError>;

    // ---- progress ----

    async fn get_progress(&self, deal_id: Uuid) -> Result<Option<DealProgress>, AppError>;

    /// Flips one flag and recomputes the percentage under a row lock.
    async fn set_section(
        &self,
        deal_id: Uuid,
        section: Section,
        complete: bool,
    ) -> Result<DealProgress, AppError>;

    async fn set_progress_notes(
        &self,
        deal_id: Uuid,
        notes: &str,
    ) -> Result<DealProgress, AppError>;
}
