//! Incremental save of one wizard step.
//!
//! A save decodes the sub-payload owned by the step being left, writes it
//! through party resolution or the loan update, and only then moves the
//! deal's form-step cursor. Address, consent and former-residence writes are
//! best effort and surface as warnings; borrower resolution and co-borrower
//! linkage abort the save.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::address::AddressInput;
use crate::applications::{derive_loan_amount, LoanFigures};
use crate::contact;
use crate::errors::{AppError, PartialWriteWarning};
use crate::models::{ApplicationType, Deal, Party, PhoneType, ResidenceKind};
use crate::party_resolution::{IdentityInput, PartyResolver, Resolution};
use crate::step_schema::{
    CoBorrowerResidenceFields, IdentityFields, LoanFields, MaritalStatusFields, ProfileFields,
    ResidenceFields, SaveStepRequest, StepName, StepPayload,
};
use crate::store::{
    ApplicationStore, ConsentChanges, LoanChanges, PartyChanges, PhoneWrite, ResidenceWrite,
    SubjectPropertyWrite,
};

/// Outcome of a successful `saveStep`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub deal_id: Uuid,
    /// The step whose data was applied, when data was sent.
    pub step: Option<String>,
    pub current_form_step: Option<String>,
    pub cursor_advanced: bool,
    pub wrote_data: bool,
    pub application_type: String,
    pub borrower_id: Option<Uuid>,
    pub co_borrower_id: Option<Uuid>,
    pub warnings: Vec<PartialWriteWarning>,
}

impl SaveReport {
    fn new(deal: &Deal) -> Self {
        Self {
            deal_id: deal.id,
            step: None,
            current_form_step: deal.current_form_step.clone(),
            cursor_advanced: false,
            wrote_data: false,
            application_type: deal.application_type.clone(),
            borrower_id: deal.primary_borrower_id,
            co_borrower_id: None,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, field: &str, message: impl Into<String>) {
        self.warnings.push(PartialWriteWarning::new(field, message));
    }
}

#[derive(Clone)]
pub struct SaveOrchestrator {
    store: Arc<dyn ApplicationStore>,
    resolver: PartyResolver,
}

impl SaveOrchestrator {
    pub fn new(store: Arc<dyn ApplicationStore>) -> Self {
        let resolver = PartyResolver::new(store.clone());
        Self { store, resolver }
    }

    /// Applies one step save.
    ///
    /// The step being left is `request.step`, or the deal's current form step
    /// when the client does not name it. A request carrying only `nextStep`
    /// moves the cursor and writes nothing else.
    pub async fn save_step(
        &self,
        deal_id: Uuid,
        request: &SaveStepRequest,
    ) -> Result<SaveReport, AppError> {
        let deal = self
            .store
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found", deal_id)))?;

        let mut report = SaveReport::new(&deal);

        if !request.is_navigation_only() {
            let step_name = request
                .step
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or(deal.current_form_step.as_deref())
                .ok_or_else(|| {
                    AppError::ValidationError(
                        "step is required when the application has no current form step"
                            .to_string(),
                    )
                })?;
            let step = StepName::parse(step_name);
            report.step = Some(step.to_string());

            let payload = StepPayload::decode(&step, request)?;
            self.apply(&deal, payload, &mut report).await?;

            if report.wrote_data {
                if let Err(e) = self.store.touch_deal(deal.id).await {
                    tracing::warn!("Failed to bump activity on deal {}: {}", deal.id, e);
                }
            }
        }

        // Cursor moves last so it never runs ahead of persisted data
        if let Some(next) = request.next_step() {
            report.cursor_advanced = self.store.advance_form_step(deal.id, next).await?;
            report.current_form_step = Some(next.to_string());
        }

        tracing::info!(
            "Saved deal {} step={:?} wrote_data={} cursor={:?} advanced={} warnings={}",
            deal.id,
            report.step,
            report.wrote_data,
            report.current_form_step,
            report.cursor_advanced,
            report.warnings.len()
        );
        Ok(report)
    }

    async fn apply(
        &self,
        deal: &Deal,
        payload: StepPayload,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        match payload {
            StepPayload::BorrowerInfo1(fields) => {
                self.save_borrower_identity(deal, &fields, report).await
            }
            StepPayload::BorrowerInfo2(fields) => {
                let party = self.existing_borrower(deal, report).await?;
                self.save_residence(&party, &fields, true, report).await
            }
            StepPayload::MaritalStatus(fields) => {
                let party = self.existing_borrower(deal, report).await?;
                self.save_marital_status(&party, &fields, report).await
            }
            StepPayload::BorrowerEdit(profile) => self.save_profile(deal, &profile, report).await,
            StepPayload::CoBorrowerInfo1(fields) => {
                self.save_co_borrower_identity(deal, &fields, report).await
            }
            StepPayload::CoBorrowerInfo2(fields) => {
                self.save_co_borrower_residence(deal, &fields, report).await
            }
            StepPayload::Loan(fields) => self.save_loan(deal, &fields, report).await,
            StepPayload::Empty => Ok(()),
        }
    }

    async fn existing_borrower(
        &self,
        deal: &Deal,
        report: &mut SaveReport,
    ) -> Result<Party, AppError> {
        let resolution = self.resolver.resolve_primary_borrower(deal, None).await?;
        report.borrower_id = Some(resolution.id());
        Ok(resolution.party().clone())
    }

    // ---- borrower steps ----

    async fn save_borrower_identity(
        &self,
        deal: &Deal,
        fields: &IdentityFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let identity = IdentityInput::from_fields(fields)?;
        warn_on_unparsed_birth_date(fields, &identity, report);

        let resolution = self
            .resolver
            .resolve_primary_borrower(deal, Some(&identity))
            .await?;
        report.borrower_id = Some(resolution.id());

        match &resolution {
            Resolution::Existing(party) => self.update_identity(party, &identity, report).await,
            _ => {
                report.wrote_data = true;
                Ok(())
            }
        }
    }

    async fn save_marital_status(
        &self,
        party: &Party,
        fields: &MaritalStatusFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let mut changes = PartyChanges {
            dependent_count: fields.dependent_count,
            ..Default::default()
        };
        if let Some(raw) = contact::non_blank(fields.marital_status.as_deref()) {
            match contact::normalize_marital_status(&raw) {
                Some(status) => changes.marital_status = Some(status),
                None => report.warn(
                    "maritalStatus",
                    format!("unrecognized marital status '{}'", raw),
                ),
            }
        }
        if !changes.is_empty() {
            self.store.update_party(party.id, &changes).await?;
            report.wrote_data = true;
        }
        Ok(())
    }

    async fn save_profile(
        &self,
        deal: &Deal,
        profile: &ProfileFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let party = self.existing_borrower(deal, report).await?;

        let identity = IdentityInput::from_fields(&profile.identity)?;
        warn_on_unparsed_birth_date(&profile.identity, &identity, report);
        self.update_identity(&party, &identity, report).await?;

        let details = PartyChanges {
            dependent_count: profile.dependent_count,
            dependent_ages: contact::non_blank(profile.dependent_ages.as_deref()),
            citizenship_type: contact::non_blank(profile.citizenship_type.as_deref()),
            ..Default::default()
        };
        if !details.is_empty() {
            self.store.update_party(party.id, &details).await?;
            report.wrote_data = true;
        }

        self.save_additional_phones(&party, profile, report).await?;
        self.save_residence(&party, &profile.residence, true, report).await?;
        self.save_former_residence(&party, profile, report).await;
        Ok(())
    }

    /// Home, mobile and work numbers from the profile screen.
    ///
    /// A number sent for the type that currently holds the lookup phone replaces
    /// the lookup phone too.
    async fn save_additional_phones(
        &self,
        party: &Party,
        profile: &ProfileFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let candidates = [
            (PhoneType::Home, profile.home_phone.as_deref(), None),
            (PhoneType::Mobile, profile.mobile_phone.as_deref(), None),
            (
                PhoneType::Work,
                profile.work_phone.as_deref(),
                contact::non_blank(profile.work_phone_ext.as_deref()),
            ),
        ];
        if candidates.iter().all(|(_, raw, _)| raw.is_none()) {
            return Ok(());
        }

        let primary_type = self
            .store
            .get_phones(party.id)
            .await?
            .into_iter()
            .find(|p| p.is_primary)
            .and_then(|p| PhoneType::parse(&p.phone_type));

        for (phone_type, raw, extension) in candidates {
            let Some(raw) = raw else { continue };
            let number = contact::normalize_phone(raw).filter(|n| contact::is_plausible_phone(n));
            let Some(number) = number else {
                report.warn(
                    phone_type.as_str(),
                    format!("ignored invalid {} phone number", phone_type.as_str()),
                );
                continue;
            };
            let primary = primary_type == Some(phone_type);
            if primary {
                self.resolver
                    .check_identity_update(party.id, None, Some(&number))
                    .await?;
            }
            self.store
                .upsert_phone(
                    party.id,
                    &PhoneWrite {
                        phone_type,
                        number,
                        extension,
                        primary,
                    },
                )
                .await?;
            report.wrote_data = true;
        }
        Ok(())
    }

    async fn save_former_residence(
        &self,
        party: &Party,
        profile: &ProfileFields,
        report: &mut SaveReport,
    ) {
        let former = &profile.former;
        match former.resolve() {
            AddressInput::Absent => {}
            AddressInput::Unparseable(reason) => report.warn("previousAddress", reason),
            AddressInput::Resolved(address) => {
                let write = ResidenceWrite {
                    kind: ResidenceKind::Former,
                    address,
                    years_at_address: former.years_at_previous_address,
                    months_at_address: former.months_at_previous_address,
                    housing_status: contact::non_blank(former.previous_housing_status.as_deref()),
                };
                match self.store.upsert_residence(party.id, &write).await {
                    Ok(()) => report.wrote_data = true,
                    Err(e) => {
                        report.warn("previousAddress", format!("former residence not saved: {}", e))
                    }
                }
            }
        }
    }

    // ---- co-borrower steps ----

    async fn save_co_borrower_identity(
        &self,
        deal: &Deal,
        fields: &IdentityFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let identity = IdentityInput::from_fields(fields)?;
        warn_on_unparsed_birth_date(fields, &identity, report);

        let resolution = self
            .resolver
            .resolve_co_borrower(deal, Some(&identity))
            .await?;
        report.co_borrower_id = Some(resolution.id());

        match &resolution {
            Resolution::Existing(party) => {
                self.ensure_joint(deal, party.id, report).await?;
                self.update_identity(party, &identity, report).await
            }
            Resolution::Adopted(party) => {
                // Adopted parties keep their own identity; this deal only links to them
                tracing::debug!("Co-borrower {} adopted without identity changes", party.id);
                report.wrote_data = true;
                report.application_type = ApplicationType::JointCredit.as_str().to_string();
                Ok(())
            }
            Resolution::Created(_) => {
                report.wrote_data = true;
                report.application_type = ApplicationType::JointCredit.as_str().to_string();
                Ok(())
            }
        }
    }

    async fn save_co_borrower_residence(
        &self,
        deal: &Deal,
        fields: &CoBorrowerResidenceFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let lives_apart = fields.live_together == Some(false);
        if lives_apart {
            match fields.residence.address.resolve() {
                AddressInput::Resolved(_) => {}
                AddressInput::Absent => {
                    return Err(AppError::ValidationError(
                        "co-borrower address is required when not living with the borrower"
                            .to_string(),
                    ))
                }
                AddressInput::Unparseable(reason) => {
                    return Err(AppError::ValidationError(format!(
                        "co-borrower address is required when not living with the borrower: {}",
                        reason
                    )))
                }
            }
        }

        let resolution = self.resolver.resolve_co_borrower(deal, None).await?;
        report.co_borrower_id = Some(resolution.id());
        let party = resolution.party().clone();
        self.ensure_joint(deal, party.id, report).await?;

        // Living together means the borrower's residence applies; nothing to store
        let write_address = fields.live_together != Some(true);
        self.save_residence(&party, &fields.residence, write_address, report)
            .await
    }

    /// Repairs a link whose joint flip failed on an earlier save.
    async fn ensure_joint(
        &self,
        deal: &Deal,
        party_id: Uuid,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        if !deal.is_joint() {
            self.resolver.attach_co_borrower(deal.id, party_id).await?;
            report.wrote_data = true;
        }
        report.application_type = ApplicationType::JointCredit.as_str().to_string();
        Ok(())
    }

    // ---- shared party writes ----

    /// Identity updates for a party already attached to the deal.
    async fn update_identity(
        &self,
        party: &Party,
        identity: &IdentityInput,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let email_changed = identity
            .email
            .as_deref()
            .filter(|e| party.email.as_deref() != Some(*e));
        let phone_changed = identity
            .phone
            .as_deref()
            .filter(|p| party.primary_phone.as_deref() != Some(*p));

        if let Some(number) = phone_changed {
            if !contact::is_plausible_phone(number) {
                return Err(AppError::ValidationError("invalid phone number".to_string()));
            }
        }
        self.resolver
            .check_identity_update(party.id, email_changed, phone_changed)
            .await?;

        let changes = PartyChanges {
            first_name: identity.first_name.clone(),
            middle_name: identity.middle_name.clone(),
            last_name: identity.last_name.clone(),
            suffix: identity.suffix.clone(),
            email: email_changed.map(str::to_string),
            birth_date: identity.birth_date,
            ..Default::default()
        };
        if !changes.is_empty() {
            self.store.update_party(party.id, &changes).await?;
            report.wrote_data = true;
        }

        if let Some(number) = phone_changed {
            self.store
                .upsert_phone(
                    party.id,
                    &PhoneWrite {
                        phone_type: identity.phone_type,
                        number: number.to_string(),
                        extension: None,
                        primary: true,
                    },
                )
                .await?;
            report.wrote_data = true;
        }
        Ok(())
    }

    /// Marital status, current address and consent flags.
    async fn save_residence(
        &self,
        party: &Party,
        fields: &ResidenceFields,
        write_address: bool,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        if let Some(raw) = contact::non_blank(fields.marital_status.as_deref()) {
            match contact::normalize_marital_status(&raw) {
                Some(status) => {
                    let changes = PartyChanges {
                        marital_status: Some(status),
                        ..Default::default()
                    };
                    self.store.update_party(party.id, &changes).await?;
                    report.wrote_data = true;
                }
                None => report.warn(
                    "maritalStatus",
                    format!("unrecognized marital status '{}'", raw),
                ),
            }
        }

        if write_address {
            match fields.address.resolve() {
                AddressInput::Absent => {}
                AddressInput::Unparseable(reason) => report.warn("currentAddress", reason),
                AddressInput::Resolved(address) => {
                    match self
                        .store
                        .upsert_residence(party.id, &ResidenceWrite::current(address))
                        .await
                    {
                        Ok(()) => report.wrote_data = true,
                        Err(e) => {
                            report.warn("currentAddress", format!("address not saved: {}", e))
                        }
                    }
                }
            }
        }

        if !fields.consents.is_empty() {
            let consents = ConsentChanges {
                military_service: fields.consents.is_veteran,
                consent_credit_check: fields.consents.accept_terms,
                consent_contact: fields.consents.consent_to_contact,
            };
            match self.store.update_consents(party.id, &consents).await {
                Ok(()) => report.wrote_data = true,
                Err(e) => report.warn("consents", format!("consent flags not saved: {}", e)),
            }
        }
        Ok(())
    }

    // ---- loan step ----

    async fn save_loan(
        &self,
        deal: &Deal,
        fields: &LoanFields,
        report: &mut SaveReport,
    ) -> Result<(), AppError> {
        let loan = self
            .store
            .get_loan(deal.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("loan for deal {} not found", deal.id)))?;
        let purpose = loan.purpose()?;

        let touches_amount = fields.loan_amount.is_some()
            || fields.purchase_price.is_some()
            || fields.down_payment.is_some()
            || fields.estimated_price.is_some()
            || fields.outstanding_balance.is_some();

        // Figures the client did not resend keep their stored values
        let figures = LoanFigures {
            loan_amount: fields.loan_amount.clone(),
            purchase_price: fields.purchase_price.clone().or(loan.purchase_price.clone()),
            down_payment: fields.down_payment.clone().or(loan.down_payment.clone()),
            estimated_price: fields.estimated_price.clone().or(loan.estimated_price.clone()),
            outstanding_balance: fields
                .outstanding_balance
                .clone()
                .or(loan.outstanding_balance.clone()),
        };
        let amount = if touches_amount {
            derive_loan_amount(purpose, &figures)
        } else {
            None
        };

        let changes = LoanChanges {
            amount,
            term_months: fields.loan_term_months,
            interest_rate: fields.interest_rate.clone(),
            property_type: contact::non_blank(fields.property_type.as_deref()),
            purchase_price: fields.purchase_price.clone(),
            down_payment: fields.down_payment.clone(),
            estimated_price: fields.estimated_price.clone(),
            outstanding_balance: fields.outstanding_balance.clone(),
            applying_for_other_loans: fields.is_applying_for_other_loans,
            down_payment_gift: fields.is_down_payment_part_gift,
        };

        let address = match contact::non_blank(fields.property_address.as_deref()) {
            None => None,
            Some(text) => match crate::address::parse_free_text(&text) {
                Some(address) => Some(address),
                None => {
                    report.warn(
                        "propertyAddress",
                        format!("could not parse property address '{}'", text),
                    );
                    None
                }
            },
        };
        let property = SubjectPropertyWrite {
            address,
            estimated_value: touches_amount.then(|| figures.property_value()).flatten(),
        };
        let property = (property.address.is_some() || property.estimated_value.is_some())
            .then_some(property);
        if changes.is_empty() && property.is_none() {
            tracing::debug!("Loan step for deal {} carried no loan fields", deal.id);
            return Ok(());
        }

        self.store
            .apply_loan_update(deal.id, &changes, property.as_ref())
            .await?;
        report.wrote_data = true;
        Ok(())
    }
}

fn warn_on_unparsed_birth_date(
    fields: &IdentityFields,
    identity: &IdentityInput,
    report: &mut SaveReport,
) {
    if identity.birth_date.is_none() {
        if let Some(raw) = contact::non_blank(fields.date_of_birth.as_deref()) {
            report.warn("dateOfBirth", format!("unrecognized date of birth '{}'", raw));
        }
    }
}
