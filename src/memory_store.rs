//! In-process `ApplicationStore` used for `STORAGE_BACKEND=memory` and tests.
//!
//! Enforces the same email/phone uniqueness as the Postgres indexes, checked
//! and inserted under one lock so concurrent creators cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ApplicationType, CoBorrowerLink, Deal, DealProgress, DealSummary, Employee, Loan, Party,
    PartyPhone, Residence, ResidenceKind, SubjectProperty,
};
use crate::progress::{Section, SectionFlags};
use crate::store::{
    ApplicationStore, ConsentChanges, LoanChanges, NewDeal, NewParty, PartyChanges, PhoneWrite,
    ResidenceWrite, SubjectPropertyWrite, DEFAULT_PROPERTY_USAGE,
};
use sqlx::types::Json;

#[derive(Default)]
struct Tables {
    employees: HashMap<Uuid, Employee>,
    parties: HashMap<Uuid, Party>,
    phones: HashMap<Uuid, Vec<PartyPhone>>,
    residences: HashMap<(Uuid, ResidenceKind), Residence>,
    deals: HashMap<Uuid, Deal>,
    loans: HashMap<Uuid, Loan>,
    properties: HashMap<Uuid, SubjectProperty>,
    co_borrowers: Vec<CoBorrowerLink>,
    progress: HashMap<Uuid, DealProgress>,
    /// Party and loan writes, for asserting that navigation saves write nothing.
    data_writes: usize,
    cursor_moves: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::InternalError("memory store lock poisoned".to_string()))
    }

    /// Adds an employee record. Employee provisioning lives outside this service.
    pub fn seed_employee(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Employee, AppError> {
        let employee = Employee {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            created_at: Utc::now(),
        };
        self.lock()?.employees.insert(employee.id, employee.clone());
        Ok(employee)
    }

    pub fn data_writes(&self) -> usize {
        self.lock().map(|t| t.data_writes).unwrap_or(0)
    }

    pub fn cursor_moves(&self) -> usize {
        self.lock().map(|t| t.cursor_moves).unwrap_or(0)
    }

    pub fn party_count(&self) -> usize {
        self.lock().map(|t| t.parties.len()).unwrap_or(0)
    }
}

impl Tables {
    fn email_owner(&self, email: &str) -> Option<Uuid> {
        self.parties
            .values()
            .find(|p| p.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .map(|p| p.id)
    }

    fn phone_owner(&self, phone: &str) -> Option<Uuid> {
        self.parties
            .values()
            .find(|p| p.primary_phone.as_deref() == Some(phone))
            .map(|p| p.id)
    }

    fn party_mut(&mut self, id: Uuid) -> Result<&mut Party, AppError> {
        self.parties
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("party {} not found", id)))
    }

    fn deal_mut(&mut self, id: Uuid) -> Result<&mut Deal, AppError> {
        self.deals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found", id)))
    }

    fn set_phone(
        &mut self,
        party_id: Uuid,
        phone: &PhoneWrite,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if phone.primary {
            if let Some(owner) = self.phone_owner(&phone.number) {
                if owner != party_id {
                    return Err(AppError::conflict(
                        "phone",
                        "borrower with this phone already exists",
                    ));
                }
            }
        }
        let phones = self.phones.entry(party_id).or_default();
        if phone.primary {
            for existing in phones.iter_mut() {
                existing.is_primary = false;
            }
        }
        phones.retain(|p| p.phone_type != phone.phone_type.as_str());
        phones.push(PartyPhone {
            party_id,
            phone_type: phone.phone_type.as_str().to_string(),
            number: phone.number.clone(),
            extension: phone.extension.clone(),
            is_primary: phone.primary,
            updated_at: Some(now),
        });
        if phone.primary {
            let party = self.party_mut(party_id)?;
            party.primary_phone = Some(phone.number.clone());
            party.updated_at = Some(now);
        }
        Ok(())
    }

    fn summary(&self, deal: &Deal, relation: &str) -> Option<DealSummary> {
        let loan = self.loans.get(&deal.id)?;
        let borrower = deal
            .primary_borrower_id
            .and_then(|id| self.parties.get(&id));
        let progress = self.progress.get(&deal.id);
        let last_activity_at = [deal.updated_at, progress.and_then(|p| p.updated_at)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(deal.created_at);
        Some(DealSummary {
            deal_id: deal.id,
            application_type: deal.application_type.clone(),
            loan_purpose: loan.purpose.clone(),
            loan_amount: loan.amount.clone(),
            current_form_step: deal.current_form_step.clone(),
            borrower_first_name: borrower.and_then(|b| b.first_name.clone()),
            borrower_last_name: borrower.and_then(|b| b.last_name.clone()),
            progress_percentage: progress.map(|p| p.progress_percentage),
            last_updated_section: progress.and_then(|p| p.last_updated_section.clone()),
            relation: relation.to_string(),
            created_at: deal.created_at,
            last_activity_at,
        })
    }
}

fn sort_by_activity(mut summaries: Vec<DealSummary>) -> Vec<DealSummary> {
    summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
    summaries
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn get_employee(&self, id: Uuid) -> Result<Option<Employee>, AppError> {
        Ok(self.lock()?.employees.get(&id).cloned())
    }

    async fn get_party(&self, id: Uuid) -> Result<Option<Party>, AppError> {
        Ok(self.lock()?.parties.get(&id).cloned())
    }

    async fn find_party_by_email(&self, email: &str) -> Result<Option<Party>, AppError> {
        let tables = self.lock()?;
        Ok(tables
            .email_owner(email)
            .and_then(|id| tables.parties.get(&id).cloned()))
    }

    async fn find_party_by_phone(&self, phone: &str) -> Result<Option<Party>, AppError> {
        let tables = self.lock()?;
        Ok(tables
            .phone_owner(phone)
            .and_then(|id| tables.parties.get(&id).cloned()))
    }

    async fn insert_party(&self, new: &NewParty) -> Result<Party, AppError> {
        let mut tables = self.lock()?;
        if let Some(email) = &new.email {
            if tables.email_owner(email).is_some() {
                return Err(AppError::conflict(
                    "email",
                    "borrower with this email already exists",
                ));
            }
        }
        if tables.phone_owner(&new.phone.number).is_some() {
            return Err(AppError::conflict(
                "phone",
                "borrower with this phone already exists",
            ));
        }

        let now = Utc::now();
        let party = Party {
            id: Uuid::new_v4(),
            email: new.email.as_ref().map(|e| e.to_lowercase()),
            first_name: Some(new.first_name.clone()),
            middle_name: new.middle_name.clone(),
            last_name: Some(new.last_name.clone()),
            suffix: new.suffix.clone(),
            birth_date: new.birth_date,
            marital_status: new.marital_status.map(|m| m.as_str().to_string()),
            dependent_count: None,
            dependent_ages: None,
            citizenship_type: None,
            military_service: None,
            consent_credit_check: None,
            consent_contact: None,
            primary_phone: None,
            created_at: now,
            updated_at: None,
        };
        tables.parties.insert(party.id, party.clone());
        tables.set_phone(party.id, &new.phone, now)?;
        tables.data_writes += 1;
        let stored = tables.parties.get(&party.id).cloned().unwrap_or(party);
        Ok(stored)
    }

    async fn update_party(&self, id: Uuid, changes: &PartyChanges) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        if let Some(email) = &changes.email {
            if let Some(owner) = tables.email_owner(email) {
                if owner != id {
                    return Err(AppError::conflict(
                        "email",
                        "borrower with this email already exists",
                    ));
                }
            }
        }
        let party = tables.party_mut(id)?;
        if let Some(v) = &changes.first_name {
            party.first_name = Some(v.clone());
        }
        if let Some(v) = &changes.middle_name {
            party.middle_name = Some(v.clone());
        }
        if let Some(v) = &changes.last_name {
            party.last_name = Some(v.clone());
        }
        if let Some(v) = &changes.suffix {
            party.suffix = Some(v.clone());
        }
        if let Some(v) = &changes.email {
            party.email = Some(v.to_lowercase());
        }
        if let Some(v) = changes.birth_date {
            party.birth_date = Some(v);
        }
        if let Some(v) = changes.marital_status {
            party.marital_status = Some(v.as_str().to_string());
        }
        if let Some(v) = changes.dependent_count {
            party.dependent_count = Some(v);
        }
        if let Some(v) = &changes.dependent_ages {
            party.dependent_ages = Some(v.clone());
        }
        if let Some(v) = &changes.citizenship_type {
            party.citizenship_type = Some(v.clone());
        }
        party.updated_at = Some(Utc::now());
        tables.data_writes += 1;
        Ok(())
    }

    async fn upsert_phone(&self, party_id: Uuid, phone: &PhoneWrite) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        tables.party_mut(party_id)?;
        tables.set_phone(party_id, phone, Utc::now())?;
        tables.data_writes += 1;
        Ok(())
    }

    async fn get_phones(&self, party_id: Uuid) -> Result<Vec<PartyPhone>, AppError> {
        Ok(self
            .lock()?
            .phones
            .get(&party_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_consents(
        &self,
        party_id: Uuid,
        consents: &ConsentChanges,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let party = tables.party_mut(party_id)?;
        if consents.military_service.is_some() {
            party.military_service = consents.military_service;
        }
        if consents.consent_credit_check.is_some() {
            party.consent_credit_check = consents.consent_credit_check;
        }
        if consents.consent_contact.is_some() {
            party.consent_contact = consents.consent_contact;
        }
        party.updated_at = Some(Utc::now());
        tables.data_writes += 1;
        Ok(())
    }

    async fn upsert_residence(
        &self,
        party_id: Uuid,
        residence: &ResidenceWrite,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        tables.party_mut(party_id)?;
        tables.residences.insert(
            (party_id, residence.kind),
            Residence {
                party_id,
                residence_type: residence.kind.as_str().to_string(),
                street: residence.address.street.clone(),
                city: residence.address.city.clone(),
                state: residence.address.state.clone(),
                zip_code: residence.address.zip_code.clone(),
                years_at_address: residence.years_at_address,
                months_at_address: residence.months_at_address,
                housing_status: residence.housing_status.clone(),
                updated_at: Some(Utc::now()),
            },
        );
        tables.data_writes += 1;
        Ok(())
    }

    async fn get_residence(
        &self,
        party_id: Uuid,
        kind: ResidenceKind,
    ) -> Result<Option<Residence>, AppError> {
        Ok(self.lock()?.residences.get(&(party_id, kind)).cloned())
    }

    async fn create_deal(&self, new: &NewDeal) -> Result<Deal, AppError> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let deal = Deal {
            id: Uuid::new_v4(),
            application_type: ApplicationType::IndividualCredit.as_str().to_string(),
            total_borrowers: ApplicationType::IndividualCredit.total_borrowers(),
            primary_borrower_id: new.primary_borrower_id,
            managing_employee_id: new.managing_employee_id,
            current_form_step: Some(new.current_form_step.clone()),
            created_at: now,
            updated_at: None,
        };
        tables.loans.insert(
            deal.id,
            Loan {
                deal_id: deal.id,
                purpose: new.loan.purpose.as_str().to_string(),
                amount: new.loan.amount.clone(),
                term_months: None,
                interest_rate: None,
                property_type: None,
                purchase_price: new.loan.purchase_price.clone(),
                down_payment: new.loan.down_payment.clone(),
                estimated_price: new.loan.estimated_price.clone(),
                outstanding_balance: new.loan.outstanding_balance.clone(),
                applying_for_other_loans: None,
                down_payment_gift: None,
                updated_at: None,
            },
        );
        if let Some(property) = &new.subject_property {
            tables.properties.insert(
                deal.id,
                SubjectProperty {
                    deal_id: deal.id,
                    street: property.address.as_ref().map(|a| a.street.clone()),
                    city: property.address.as_ref().map(|a| a.city.clone()),
                    state: property.address.as_ref().map(|a| a.state.clone()),
                    zip_code: property.address.as_ref().map(|a| a.zip_code.clone()),
                    estimated_value: property.estimated_value.clone(),
                    usage: DEFAULT_PROPERTY_USAGE.to_string(),
                    updated_at: None,
                },
            );
        }
        tables.progress.insert(
            deal.id,
            DealProgress {
                deal_id: deal.id,
                section_flags: Json(SectionFlags::default()),
                progress_percentage: 0,
                last_updated_section: None,
                last_updated_at: None,
                notes: None,
                updated_at: None,
            },
        );
        tables.deals.insert(deal.id, deal.clone());
        Ok(deal)
    }

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, AppError> {
        Ok(self.lock()?.deals.get(&id).cloned())
    }

    async fn get_loan(&self, deal_id: Uuid) -> Result<Option<Loan>, AppError> {
        Ok(self.lock()?.loans.get(&deal_id).cloned())
    }

    async fn get_subject_property(
        &self,
        deal_id: Uuid,
    ) -> Result<Option<SubjectProperty>, AppError> {
        Ok(self.lock()?.properties.get(&deal_id).cloned())
    }

    async fn set_primary_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let deal = tables.deal_mut(deal_id)?;
        if deal.primary_borrower_id.is_some() {
            return Ok(false);
        }
        deal.primary_borrower_id = Some(party_id);
        deal.updated_at = Some(Utc::now());
        tables.data_writes += 1;
        Ok(true)
    }

    async fn link_co_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        tables.deal_mut(deal_id)?;
        let now = Utc::now();
        match tables
            .co_borrowers
            .iter_mut()
            .find(|l| l.deal_id == deal_id && l.party_id == party_id)
        {
            Some(link) => link.updated_at = Some(now),
            None => tables.co_borrowers.push(CoBorrowerLink {
                deal_id,
                party_id,
                created_at: now,
                updated_at: None,
            }),
        }
        tables.data_writes += 1;
        Ok(())
    }

    async fn co_borrowers(&self, deal_id: Uuid) -> Result<Vec<CoBorrowerLink>, AppError> {
        let mut links: Vec<CoBorrowerLink> = self
            .lock()?
            .co_borrowers
            .iter()
            .filter(|l| l.deal_id == deal_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }

    async fn mark_joint(&self, deal_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let deal = tables.deal_mut(deal_id)?;
        deal.application_type = ApplicationType::JointCredit.as_str().to_string();
        deal.total_borrowers = ApplicationType::JointCredit.total_borrowers();
        deal.updated_at = Some(Utc::now());
        tables.data_writes += 1;
        Ok(())
    }

    async fn apply_loan_update(
        &self,
        deal_id: Uuid,
        changes: &LoanChanges,
        property: Option<&SubjectPropertyWrite>,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let loan = tables
            .loans
            .get_mut(&deal_id)
            .ok_or_else(|| AppError::NotFound(format!("loan for deal {} not found", deal_id)))?;
        if let Some(v) = &changes.amount {
            loan.amount = v.clone();
        }
        if let Some(v) = changes.term_months {
            loan.term_months = Some(v);
        }
        if let Some(v) = &changes.interest_rate {
            loan.interest_rate = Some(v.clone());
        }
        if let Some(v) = &changes.property_type {
            loan.property_type = Some(v.clone());
        }
        if let Some(v) = &changes.purchase_price {
            loan.purchase_price = Some(v.clone());
        }
        if let Some(v) = &changes.down_payment {
            loan.down_payment = Some(v.clone());
        }
        if let Some(v) = &changes.estimated_price {
            loan.estimated_price = Some(v.clone());
        }
        if let Some(v) = &changes.outstanding_balance {
            loan.outstanding_balance = Some(v.clone());
        }
        if let Some(v) = changes.applying_for_other_loans {
            loan.applying_for_other_loans = Some(v);
        }
        if let Some(v) = changes.down_payment_gift {
            loan.down_payment_gift = Some(v);
        }
        loan.updated_at = Some(now);

        if let Some(write) = property {
            let entry = tables
                .properties
                .entry(deal_id)
                .or_insert_with(|| SubjectProperty {
                    deal_id,
                    street: None,
                    city: None,
                    state: None,
                    zip_code: None,
                    estimated_value: None,
                    usage: DEFAULT_PROPERTY_USAGE.to_string(),
                    updated_at: None,
                });
            if let Some(address) = &write.address {
                entry.street = Some(address.street.clone());
                entry.city = Some(address.city.clone());
                entry.state = Some(address.state.clone());
                entry.zip_code = Some(address.zip_code.clone());
            }
            if let Some(value) = &write.estimated_value {
                entry.estimated_value = Some(value.clone());
            }
            entry.updated_at = Some(now);
        }

        tables.deal_mut(deal_id)?.updated_at = Some(now);
        tables.data_writes += 1;
        Ok(())
    }

    async fn advance_form_step(&self, deal_id: Uuid, step: &str) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let deal = tables.deal_mut(deal_id)?;
        if deal.current_form_step.as_deref() == Some(step) {
            return Ok(false);
        }
        deal.current_form_step = Some(step.to_string());
        deal.updated_at = Some(Utc::now());
        tables.cursor_moves += 1;
        Ok(true)
    }

    async fn touch_deal(&self, deal_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        tables.deal_mut(deal_id)?.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn list_deals_for_borrower(
        &self,
        party_id: Uuid,
    ) -> Result<Vec<DealSummary>, AppError> {
        let tables = self.lock()?;
        let summaries = tables
            .deals
            .values()
            .filter_map(|deal| {
                if deal.primary_borrower_id == Some(party_id) {
                    tables.summary(deal, "primary")
                } else if tables
                    .co_borrowers
                    .iter()
                    .any(|l| l.deal_id == deal.id && l.party_id == party_id)
                {
                    tables.summary(deal, "co-borrower")
                } else {
                    None
                }
            })
            .collect();
        Ok(sort_by_activity(summaries))
    }

    async fn list_deals_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<DealSummary>, AppError> {
        let tables = self.lock()?;
        let summaries = tables
            .deals
            .values()
            .filter(|deal| deal.managing_employee_id == Some(employee_id))
            .filter_map(|deal| tables.summary(deal, "managing"))
            .collect();
        Ok(sort_by_activity(summaries))
    }

    async fn get_progress(&self, deal_id: Uuid) -> Result<Option<DealProgress>, AppError> {
        Ok(self.lock()?.progress.get(&deal_id).cloned())
    }

    async fn set_section(
        &self,
        deal_id: Uuid,
        section: Section,
        complete: bool,
    ) -> Result<DealProgress, AppError> {
        let mut tables = self.lock()?;
        let progress = tables.progress.get_mut(&deal_id).ok_or_else(|| {
            AppError::NotFound(format!("progress for deal {} not found", deal_id))
        })?;
        let now = Utc::now();
        progress.section_flags.0.set(section, complete);
        progress.progress_percentage = progress.section_flags.0.percentage();
        progress.last_updated_section = Some(section.name().to_string());
        progress.last_updated_at = Some(now);
        progress.updated_at = Some(now);
        Ok(progress.clone())
    }

    async fn set_progress_notes(
        &self,
        deal_id: Uuid,
        notes: &str,
    ) -> Result<DealProgress, AppError> {
        let mut tables = self.lock()?;
        let progress = tables.progress.get_mut(&deal_id).ok_or_else(|| {
            AppError::NotFound(format!("progress for deal {} not found", deal_id))
        })?;
        progress.notes = Some(notes.to_string());
        progress.updated_at = Some(Utc::now());
        Ok(progress.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoanPurpose, PhoneType};
    use crate::store::NewLoan;
    use bigdecimal::BigDecimal;

    fn new_party(phone: &str, email: Option<&str>) -> NewParty {
        NewParty {
            first_name: "Ann".into(),
            middle_name: None,
            last_name: "Lee".into(),
            suffix: None,
            email: email.map(str::to_string),
            birth_date: None,
            marital_status: None,
            phone: PhoneWrite {
                phone_type: PhoneType::Mobile,
                number: phone.into(),
                extension: None,
                primary: true,
            },
        }
    }

    #[tokio::test]
    async fn test_insert_party_enforces_uniqueness() {
        let store = MemoryStore::new();
        let party = store
            .insert_party(&new_party("5551234567", Some("ann@example.com")))
            .await
            .unwrap();
        assert_eq!(party.primary_phone.as_deref(), Some("5551234567"));

        let dup_phone = store.insert_party(&new_party("5551234567", None)).await;
        assert!(matches!(dup_phone, Err(AppError::Conflict { ref field, .. }) if field == "phone"));

        let dup_email = store
            .insert_party(&new_party("5559990000", Some("ANN@example.com")))
            .await;
        assert!(matches!(dup_email, Err(AppError::Conflict { ref field, .. }) if field == "email"));
        assert_eq!(store.party_count(), 1);
    }

    #[tokio::test]
    async fn test_advance_form_step_reports_change() {
        let store = MemoryStore::new();
        let deal = store
            .create_deal(&NewDeal {
                primary_borrower_id: None,
                managing_employee_id: None,
                current_form_step: "borrower-info-1".into(),
                loan: NewLoan::new(LoanPurpose::Purchase, BigDecimal::from(1000)),
                subject_property: None,
            })
            .await
            .unwrap();
        assert!(store.advance_form_step(deal.id, "review").await.unwrap());
        assert!(!store.advance_form_step(deal.id, "review").await.unwrap());
        assert_eq!(store.cursor_moves(), 1);
        assert_eq!(store.data_writes(), 0);
    }

    #[tokio::test]
    async fn test_set_section_unknown_deal_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .set_section(Uuid::new_v4(), Section::Assets, true)
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
