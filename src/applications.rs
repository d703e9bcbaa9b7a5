//! Application lifecycle: creation, snapshots, listing, progress and self-registration.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::address::{Address, AddressInput};
use crate::contact;
use crate::errors::{AppError, PartialWriteWarning};
use crate::models::{
    Actor, ActorRole, DealSummary, LoanPurpose, Party, PartyPhone, PhoneType, Residence,
    ResidenceKind, INITIAL_FORM_STEP, REGISTERED_FORM_STEP,
};
use crate::party_resolution::{IdentityInput, PartyResolver};
use crate::progress::{ProgressView, Section};
use crate::step_schema::{AddressFields, IdentityFields};
use crate::store::{ApplicationStore, NewDeal, NewLoan, ResidenceWrite, SubjectPropertyWrite};

// ============ Loan amount derivation ============

/// Money figures that feed the requested loan amount.
#[derive(Debug, Clone, Default)]
pub struct LoanFigures {
    pub loan_amount: Option<BigDecimal>,
    pub purchase_price: Option<BigDecimal>,
    pub down_payment: Option<BigDecimal>,
    pub estimated_price: Option<BigDecimal>,
    pub outstanding_balance: Option<BigDecimal>,
}

fn positive(value: &Option<BigDecimal>) -> Option<&BigDecimal> {
    value.as_ref().filter(|v| **v > BigDecimal::zero())
}

impl LoanFigures {
    /// Value recorded on the subject property: purchase price, else estimate.
    pub fn property_value(&self) -> Option<BigDecimal> {
        positive(&self.purchase_price)
            .or_else(|| positive(&self.estimated_price))
            .cloned()
    }
}

/// Requested loan amount.
///
/// Precedence: explicit amount, then (refinance only) outstanding balance,
/// then purchase price minus down payment, then estimated price minus down
/// payment. A non-positive difference falls back to the price itself.
pub fn derive_loan_amount(purpose: LoanPurpose, figures: &LoanFigures) -> Option<BigDecimal> {
    if let Some(amount) = positive(&figures.loan_amount) {
        return Some(amount.clone());
    }
    if purpose == LoanPurpose::Refinance {
        if let Some(balance) = positive(&figures.outstanding_balance) {
            return Some(balance.clone());
        }
    }
    let down = positive(&figures.down_payment)
        .cloned()
        .unwrap_or_else(BigDecimal::zero);
    let price = positive(&figures.purchase_price).or_else(|| positive(&figures.estimated_price))?;
    let financed = price - &down;
    if financed > BigDecimal::zero() {
        Some(financed)
    } else {
        Some(price.clone())
    }
}

// ============ Read models ============

/// Party as rendered to API consumers. Unanswered flags render as `false`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySnapshot {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub phone_type: Option<String>,
    pub home_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub work_phone_ext: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub marital_status: Option<String>,
    pub dependent_count: Option<i32>,
    pub citizenship_type: Option<String>,
    pub is_veteran: bool,
    pub accept_terms: bool,
    pub consent_to_contact: bool,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub current_address: Option<String>,
    pub previous_address: Option<String>,
    pub years_at_previous_address: Option<i32>,
    pub months_at_previous_address: Option<i32>,
    pub previous_housing_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_together: Option<bool>,
}

impl PartySnapshot {
    fn build(
        party: &Party,
        phones: &[PartyPhone],
        current: Option<&Residence>,
        former: Option<&Residence>,
    ) -> Self {
        let find = |t: PhoneType| phones.iter().find(|p| p.phone_type == t.as_str());
        // Display phone: the party's primary number, then mobile, home, work
        let primary = party
            .primary_phone
            .as_deref()
            .and_then(|number| phones.iter().find(|p| p.number == number));
        let display = primary.or_else(|| {
            [PhoneType::Mobile, PhoneType::Home, PhoneType::Work]
                .into_iter()
                .find_map(find)
        });
        let as_address = |r: &Residence| Address {
            street: r.street.clone(),
            city: r.city.clone(),
            state: r.state.clone(),
            zip_code: r.zip_code.clone(),
        };

        Self {
            id: party.id,
            first_name: party.first_name.clone(),
            middle_name: party.middle_name.clone(),
            last_name: party.last_name.clone(),
            suffix: party.suffix.clone(),
            email: party.email.clone(),
            phone: display.map(|p| p.number.clone()),
            phone_type: display.map(|p| p.phone_type.clone()),
            home_phone: find(PhoneType::Home).map(|p| p.number.clone()),
            mobile_phone: find(PhoneType::Mobile).map(|p| p.number.clone()),
            work_phone: find(PhoneType::Work).map(|p| p.number.clone()),
            work_phone_ext: find(PhoneType::Work).and_then(|p| p.extension.clone()),
            date_of_birth: party.birth_date,
            marital_status: party.marital_status.clone(),
            dependent_count: party.dependent_count,
            citizenship_type: party.citizenship_type.clone(),
            is_veteran: party.military_service.unwrap_or(false),
            accept_terms: party.consent_credit_check.unwrap_or(false),
            consent_to_contact: party.consent_contact.unwrap_or(false),
            address: current.map(|r| r.street.clone()),
            city: current.map(|r| r.city.clone()),
            state: current.map(|r| r.state.clone()),
            zip_code: current.map(|r| r.zip_code.clone()),
            current_address: current.map(|r| as_address(r).format()),
            previous_address: former.map(|r| as_address(r).format()),
            years_at_previous_address: former.and_then(|r| r.years_at_address),
            months_at_previous_address: former.and_then(|r| r.months_at_address),
            previous_housing_status: former.and_then(|r| r.housing_status.clone()),
            live_together: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    pub purpose: String,
    pub amount: BigDecimal,
    pub term_months: Option<i32>,
    pub interest_rate: Option<BigDecimal>,
    pub property_type: Option<String>,
    pub purchase_price: Option<BigDecimal>,
    pub down_payment: Option<BigDecimal>,
    pub estimated_price: Option<BigDecimal>,
    pub outstanding_balance: Option<BigDecimal>,
    pub is_applying_for_other_loans: bool,
    pub is_down_payment_part_gift: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPropertyView {
    pub address: Option<String>,
    pub estimated_value: Option<BigDecimal>,
    pub usage: String,
}

/// Full snapshot returned by `getApplication`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub deal_id: Uuid,
    pub application_type: String,
    pub total_borrowers: i32,
    pub current_form_step: Option<String>,
    pub managing_employee_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub loan: LoanView,
    pub subject_property: Option<SubjectPropertyView>,
    pub borrower: Option<PartySnapshot>,
    pub co_borrower: Option<PartySnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApplication {
    pub deal_id: Uuid,
    pub current_form_step: String,
}

// ============ Self-registration ============

/// Pre-application signup data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(flatten)]
    pub identity: IdentityFields,
    pub marital_status: Option<String>,
    #[serde(flatten)]
    pub address: AddressFields,
    pub loan_purpose: String,
    #[serde(flatten)]
    pub loan: crate::step_schema::LoanFields,
    /// Set by the verification flow once the one-time code was confirmed.
    #[serde(default)]
    pub contact_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    pub deal_id: Uuid,
    pub borrower_id: Uuid,
    pub current_form_step: String,
    pub warnings: Vec<PartialWriteWarning>,
}

// ============ Service ============

#[derive(Clone)]
pub struct ApplicationService {
    store: Arc<dyn ApplicationStore>,
    resolver: PartyResolver,
    require_verified_contact: bool,
}

impl ApplicationService {
    pub fn new(store: Arc<dyn ApplicationStore>, require_verified_contact: bool) -> Self {
        let resolver = PartyResolver::new(store.clone());
        Self {
            store,
            resolver,
            require_verified_contact,
        }
    }

    /// Starts a new application for an employee (who manages it) or a borrower
    /// (who becomes its primary borrower).
    pub async fn create_application(
        &self,
        actor: Actor,
        purpose: LoanPurpose,
        amount: BigDecimal,
    ) -> Result<CreatedApplication, AppError> {
        if amount <= BigDecimal::zero() {
            return Err(AppError::ValidationError(
                "loan amount must be greater than zero".to_string(),
            ));
        }

        let (primary_borrower_id, managing_employee_id) = match actor.role {
            ActorRole::Employee => {
                self.store
                    .get_employee(actor.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("employee {} not found", actor.id)))?;
                (None, Some(actor.id))
            }
            ActorRole::Borrower => {
                self.store
                    .get_party(actor.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("borrower {} not found", actor.id)))?;
                (Some(actor.id), None)
            }
        };

        let deal = self
            .store
            .create_deal(&NewDeal {
                primary_borrower_id,
                managing_employee_id,
                current_form_step: INITIAL_FORM_STEP.to_string(),
                loan: NewLoan::new(purpose, amount),
                subject_property: None,
            })
            .await?;

        tracing::info!(
            "Created application {} ({}) for {}",
            deal.id,
            purpose.as_str(),
            actor
        );
        Ok(CreatedApplication {
            deal_id: deal.id,
            current_form_step: INITIAL_FORM_STEP.to_string(),
        })
    }

    async fn snapshot(&self, party: &Party) -> Result<PartySnapshot, AppError> {
        let phones = self.store.get_phones(party.id).await?;
        let current = self
            .store
            .get_residence(party.id, ResidenceKind::Current)
            .await?;
        let former = self
            .store
            .get_residence(party.id, ResidenceKind::Former)
            .await?;
        Ok(PartySnapshot::build(
            party,
            &phones,
            current.as_ref(),
            former.as_ref(),
        ))
    }

    pub async fn get_application(&self, deal_id: Uuid) -> Result<ApplicationView, AppError> {
        let deal = self
            .store
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found", deal_id)))?;
        let loan = self
            .store
            .get_loan(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("loan for deal {} not found", deal_id)))?;
        let property = self.store.get_subject_property(deal_id).await?;

        let borrower = match deal.primary_borrower_id {
            Some(id) => match self.store.get_party(id).await? {
                Some(party) => Some(self.snapshot(&party).await?),
                None => {
                    tracing::warn!("Deal {} references missing borrower {}", deal_id, id);
                    None
                }
            },
            None => None,
        };

        let co_borrower = match self.store.co_borrowers(deal_id).await?.first() {
            Some(link) => match self.store.get_party(link.party_id).await? {
                Some(party) => {
                    let mut snapshot = self.snapshot(&party).await?;
                    snapshot.live_together = Some(snapshot.current_address.is_none());
                    Some(snapshot)
                }
                None => None,
            },
            None => None,
        };

        Ok(ApplicationView {
            deal_id: deal.id,
            application_type: deal.application_type.clone(),
            total_borrowers: deal.total_borrowers,
            current_form_step: deal.current_form_step.clone(),
            managing_employee_id: deal.managing_employee_id,
            created_at: deal.created_at,
            updated_at: deal.updated_at,
            loan: LoanView {
                purpose: loan.purpose,
                amount: loan.amount,
                term_months: loan.term_months,
                interest_rate: loan.interest_rate,
                property_type: loan.property_type,
                purchase_price: loan.purchase_price,
                down_payment: loan.down_payment,
                estimated_price: loan.estimated_price,
                outstanding_balance: loan.outstanding_balance,
                is_applying_for_other_loans: loan.applying_for_other_loans.unwrap_or(false),
                is_down_payment_part_gift: loan.down_payment_gift.unwrap_or(false),
            },
            subject_property: property.map(|p| SubjectPropertyView {
                address: match (p.street, p.city, p.state, p.zip_code) {
                    (Some(street), Some(city), Some(state), Some(zip_code)) => Some(
                        Address {
                            street,
                            city,
                            state,
                            zip_code,
                        }
                        .format(),
                    ),
                    _ => None,
                },
                estimated_value: p.estimated_value,
                usage: p.usage,
            }),
            borrower,
            co_borrower,
        })
    }

    /// Applications visible to the actor, most recently updated first.
    pub async fn list_applications(&self, actor: Actor) -> Result<Vec<DealSummary>, AppError> {
        match actor.role {
            ActorRole::Borrower => self.store.list_deals_for_borrower(actor.id).await,
            ActorRole::Employee => self.store.list_deals_for_employee(actor.id).await,
        }
    }

    pub async fn get_progress(&self, deal_id: Uuid) -> Result<ProgressView, AppError> {
        let progress = self.store.get_progress(deal_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("progress for deal {} not found", deal_id))
        })?;
        Ok(ProgressView::project(&progress))
    }

    /// Marks one named section complete or incomplete. Unknown names are rejected.
    pub async fn set_section_complete(
        &self,
        deal_id: Uuid,
        section: &str,
        complete: bool,
    ) -> Result<ProgressView, AppError> {
        let section: Section = section.parse()?;
        let progress = self.store.set_section(deal_id, section, complete).await?;
        tracing::info!(
            "Deal {} section {} complete={} ({}%)",
            deal_id,
            section,
            complete,
            progress.progress_percentage
        );
        Ok(ProgressView::project(&progress))
    }

    pub async fn set_progress_notes(
        &self,
        deal_id: Uuid,
        notes: &str,
    ) -> Result<ProgressView, AppError> {
        let progress = self.store.set_progress_notes(deal_id, notes).await?;
        Ok(ProgressView::project(&progress))
    }

    /// Self-service signup: creates the borrower and their application in one go.
    ///
    /// Any existing party with the same email or phone is a `Conflict` so the
    /// UI can send the user to login instead.
    pub async fn register_borrower(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResult, AppError> {
        if self.require_verified_contact && !request.contact_verified {
            return Err(AppError::Unauthorized(
                "contact verification required before registration".to_string(),
            ));
        }

        // Validate everything before the first write
        let mut identity = IdentityInput::from_fields(&request.identity)?;
        if identity.email.is_none() {
            return Err(AppError::ValidationError(
                "registration requires email".to_string(),
            ));
        }
        let mut warnings = Vec::new();
        if let Some(raw) = contact::non_blank(request.marital_status.as_deref()) {
            identity.marital_status = contact::normalize_marital_status(&raw);
            if identity.marital_status.is_none() {
                warnings.push(PartialWriteWarning::new(
                    "maritalStatus",
                    format!("unrecognized marital status '{}'", raw),
                ));
            }
        }
        let new_party = identity.to_new_party("registration")?;

        let purpose: LoanPurpose = request.loan_purpose.parse()?;
        let figures = LoanFigures {
            loan_amount: request.loan.loan_amount.clone(),
            purchase_price: request.loan.purchase_price.clone(),
            down_payment: request.loan.down_payment.clone(),
            estimated_price: request.loan.estimated_price.clone(),
            outstanding_balance: request.loan.outstanding_balance.clone(),
        };
        let amount = derive_loan_amount(purpose, &figures).ok_or_else(|| {
            AppError::ValidationError(
                "loan amount could not be determined from the figures provided".to_string(),
            )
        })?;

        let property_address = match contact::non_blank(request.loan.property_address.as_deref()) {
            None => None,
            Some(text) => {
                let parsed = crate::address::parse_free_text(&text);
                if parsed.is_none() {
                    warnings.push(PartialWriteWarning::new(
                        "propertyAddress",
                        format!("could not parse property address '{}'", text),
                    ));
                }
                parsed
            }
        };

        if let Some((_, field)) = self.resolver.find_existing(&identity).await? {
            return Err(AppError::conflict(
                field,
                format!("borrower with this {} already exists", field),
            ));
        }

        let party = self.store.insert_party(&new_party).await?;

        match request.address.resolve() {
            AddressInput::Absent => {}
            AddressInput::Unparseable(reason) => {
                warnings.push(PartialWriteWarning::new("currentAddress", reason))
            }
            AddressInput::Resolved(address) => {
                if let Err(e) = self
                    .store
                    .upsert_residence(party.id, &ResidenceWrite::current(address))
                    .await
                {
                    warnings.push(PartialWriteWarning::new(
                        "currentAddress",
                        format!("address not saved: {}", e),
                    ));
                }
            }
        }

        let estimated_value = figures.property_value();
        let subject_property = (property_address.is_some() || estimated_value.is_some()).then(|| {
            SubjectPropertyWrite {
                address: property_address,
                estimated_value,
            }
        });

        let deal = self
            .store
            .create_deal(&NewDeal {
                primary_borrower_id: Some(party.id),
                managing_employee_id: None,
                current_form_step: REGISTERED_FORM_STEP.to_string(),
                loan: NewLoan {
                    purpose,
                    amount,
                    purchase_price: figures.purchase_price.clone(),
                    down_payment: figures.down_payment.clone(),
                    estimated_price: figures.estimated_price.clone(),
                    outstanding_balance: figures.outstanding_balance.clone(),
                },
                subject_property,
            })
            .await?;

        tracing::info!("Registered borrower {} with application {}", party.id, deal.id);
        Ok(RegistrationResult {
            deal_id: deal.id,
            borrower_id: party.id,
            current_form_step: REGISTERED_FORM_STEP.to_string(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(v: &str) -> Option<BigDecimal> {
        BigDecimal::from_str(v).ok()
    }

    #[test]
    fn test_explicit_amount_wins() {
        let figures = LoanFigures {
            loan_amount: dec("250000"),
            purchase_price: dec("400000"),
            down_payment: dec("50000"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), dec("250000"));
    }

    #[test]
    fn test_purchase_price_minus_down_payment() {
        let figures = LoanFigures {
            purchase_price: dec("400000"),
            down_payment: dec("80000"),
            estimated_price: dec("999999"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), dec("320000"));
    }

    #[test]
    fn test_estimated_price_fallback() {
        let figures = LoanFigures {
            estimated_price: dec("300000"),
            down_payment: dec("60000"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), dec("240000"));
    }

    #[test]
    fn test_oversized_down_payment_falls_back_to_price() {
        let figures = LoanFigures {
            purchase_price: dec("100000"),
            down_payment: dec("150000"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), dec("100000"));
    }

    #[test]
    fn test_refinance_uses_outstanding_balance() {
        let figures = LoanFigures {
            outstanding_balance: dec("180000"),
            estimated_price: dec("500000"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Refinance, &figures), dec("180000"));
        // Balance is ignored for purchases
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), dec("500000"));
    }

    #[test]
    fn test_nothing_to_derive() {
        let figures = LoanFigures {
            loan_amount: dec("0"),
            ..Default::default()
        };
        assert_eq!(derive_loan_amount(LoanPurpose::Purchase, &figures), None);
    }

    #[test]
    fn test_snapshot_renders_unset_flags_false_and_prefers_primary_phone() {
        let now = Utc::now();
        let party = Party {
            id: Uuid::new_v4(),
            email: None,
            first_name: Some("Ann".into()),
            middle_name: None,
            last_name: Some("Lee".into()),
            suffix: None,
            birth_date: None,
            marital_status: None,
            dependent_count: None,
            dependent_ages: None,
            citizenship_type: None,
            military_service: None,
            consent_credit_check: Some(true),
            consent_contact: None,
            primary_phone: Some("5550000001".into()),
            created_at: now,
            updated_at: None,
        };
        let phone = |t: PhoneType, n: &str| PartyPhone {
            party_id: party.id,
            phone_type: t.as_str().into(),
            number: n.into(),
            extension: None,
            is_primary: false,
            updated_at: None,
        };
        let phones = vec![
            phone(PhoneType::Home, "5550000001"),
            phone(PhoneType::Mobile, "5550000002"),
        ];
        let current = Residence {
            party_id: party.id,
            residence_type: "Current".into(),
            street: "123 Main St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip_code: "62704".into(),
            years_at_address: None,
            months_at_address: None,
            housing_status: None,
            updated_at: None,
        };

        let snapshot = PartySnapshot::build(&party, &phones, Some(&current), None);
        assert!(!snapshot.is_veteran);
        assert!(snapshot.accept_terms);
        assert!(!snapshot.consent_to_contact);
        assert_eq!(snapshot.phone.as_deref(), Some("5550000001"));
        assert_eq!(snapshot.phone_type.as_deref(), Some("Home"));
        assert_eq!(snapshot.mobile_phone.as_deref(), Some("5550000002"));
        assert_eq!(
            snapshot.current_address.as_deref(),
            Some("123 Main St, Springfield, IL 62704")
        );

        // Without a primary number the mobile line is shown
        let unset = Party {
            primary_phone: None,
            ..party.clone()
        };
        let snapshot = PartySnapshot::build(&unset, &phones, None, None);
        assert_eq!(snapshot.phone.as_deref(), Some("5550000002"));
        assert_eq!(snapshot.phone_type.as_deref(), Some("Mobile"));
    }
}
