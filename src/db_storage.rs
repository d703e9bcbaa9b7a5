use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    CoBorrowerLink, Deal, DealProgress, DealSummary, Employee, Loan, Party, PartyPhone, Residence,
    ResidenceKind, SubjectProperty,
};
use crate::progress::Section;
use crate::store::{
    ApplicationStore, ConsentChanges, LoanChanges, NewDeal, NewParty, PartyChanges, PhoneWrite,
    ResidenceWrite, SubjectPropertyWrite, DEFAULT_PROPERTY_USAGE,
};

/// Summary projection shared by both listing queries. `$1` is the actor id.
const SUMMARY_SELECT: &str = r#"
    SELECT d.id AS deal_id,
           d.application_type,
           l.purpose AS loan_purpose,
           l.amount AS loan_amount,
           d.current_form_step,
           p.first_name AS borrower_first_name,
           p.last_name AS borrower_last_name,
           dp.progress_percentage,
           dp.last_updated_section,
           CASE
               WHEN d.managing_employee_id = $1 THEN 'managing'
               WHEN d.primary_borrower_id = $1 THEN 'primary'
               ELSE 'co-borrower'
           END AS relation,
           d.created_at,
           COALESCE(GREATEST(d.updated_at, dp.updated_at), d.created_at) AS last_activity_at
    FROM deals d
    JOIN loans l ON l.deal_id = d.id
    LEFT JOIN parties p ON p.id = d.primary_borrower_id
    LEFT JOIN deal_progress dp ON dp.deal_id = d.id
"#;

/// Postgres-backed application storage.
///
/// Deal-level writes that must land together (deal + loan + progress, loan +
/// subject property, progress flag + percentage) run in one transaction.
/// Party writes are single statements.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn not_found_if_zero(rows: u64, what: &str, id: Uuid) -> Result<(), AppError> {
    if rows == 0 {
        Err(AppError::NotFound(format!("{} {} not found", what, id)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for PgStore {
    async fn get_employee(&self, id: Uuid) -> Result<Option<Employee>, AppError> {
        sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("loading employee")
    }

    async fn get_party(&self, id: Uuid) -> Result<Option<Party>, AppError> {
        sqlx::query_as::<_, Party>("SELECT * FROM parties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("loading party")
    }

    async fn find_party_by_email(&self, email: &str) -> Result<Option<Party>, AppError> {
        sqlx::query_as::<_, Party>("SELECT * FROM parties WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("looking up party by email")
    }

    async fn find_party_by_phone(&self, phone: &str) -> Result<Option<Party>, AppError> {
        sqlx::query_as::<_, Party>("SELECT * FROM parties WHERE primary_phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .context("looking up party by phone")
    }

    async fn insert_party(&self, new: &NewParty) -> Result<Party, AppError> {
        let mut tx = self.pool.begin().await?;

        let party = sqlx::query_as::<_, Party>(
            r#"
            INSERT INTO parties (
                id, email, first_name, middle_name, last_name, suffix,
                birth_date, marital_status, primary_phone, created_at
            )
            VALUES ($1, lower($2), $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.email.as_deref())
        .bind(&new.first_name)
        .bind(new.middle_name.as_deref())
        .bind(&new.last_name)
        .bind(new.suffix.as_deref())
        .bind(new.birth_date)
        .bind(new.marital_status.map(|m| m.as_str()))
        .bind(&new.phone.number)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO party_phones
                (party_id, phone_type, number, extension, is_primary, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, NOW())
            "#,
        )
        .bind(party.id)
        .bind(new.phone.phone_type.as_str())
        .bind(&new.phone.number)
        .bind(new.phone.extension.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Created party {}", party.id);
        Ok(party)
    }

    async fn update_party(&self, id: Uuid, changes: &PartyChanges) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parties SET
                first_name       = COALESCE($2, first_name),
                middle_name      = COALESCE($3, middle_name),
                last_name        = COALESCE($4, last_name),
                suffix           = COALESCE($5, suffix),
                email            = COALESCE(lower($6), email),
                birth_date       = COALESCE($7, birth_date),
                marital_status   = COALESCE($8, marital_status),
                dependent_count  = COALESCE($9, dependent_count),
                dependent_ages   = COALESCE($10, dependent_ages),
                citizenship_type = COALESCE($11, citizenship_type),
                updated_at       = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(changes.first_name.as_deref())
        .bind(changes.middle_name.as_deref())
        .bind(changes.last_name.as_deref())
        .bind(changes.suffix.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.birth_date)
        .bind(changes.marital_status.map(|m| m.as_str()))
        .bind(changes.dependent_count)
        .bind(changes.dependent_ages.as_deref())
        .bind(changes.citizenship_type.as_deref())
        .execute(&self.pool)
        .await?;

        not_found_if_zero(result.rows_affected(), "party", id)
    }

    async fn upsert_phone(&self, party_id: Uuid, phone: &PhoneWrite) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        if phone.primary {
            sqlx::query("UPDATE party_phones SET is_primary = FALSE WHERE party_id = $1")
                .bind(party_id)
                .execute(&mut *tx)
                .await?;

            let result = sqlx::query(
                "UPDATE parties SET primary_phone = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(party_id)
            .bind(&phone.number)
            .execute(&mut *tx)
            .await?;
            not_found_if_zero(result.rows_affected(), "party", party_id)?;
        }

        sqlx::query(
            r#"
            INSERT INTO party_phones
                (party_id, phone_type, number, extension, is_primary, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (party_id, phone_type) DO UPDATE SET
                number     = EXCLUDED.number,
                extension  = EXCLUDED.extension,
                is_primary = EXCLUDED.is_primary,
                updated_at = NOW()
            "#,
        )
        .bind(party_id)
        .bind(phone.phone_type.as_str())
        .bind(&phone.number)
        .bind(phone.extension.as_deref())
        .bind(phone.primary)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_phones(&self, party_id: Uuid) -> Result<Vec<PartyPhone>, AppError> {
        sqlx::query_as::<_, PartyPhone>(
            r#"
            SELECT * FROM party_phones
            WHERE party_id = $1
            ORDER BY is_primary DESC, phone_type ASC
            "#,
        )
        .bind(party_id)
        .fetch_all(&self.pool)
        .await
        .context("loading party phones")
    }

    async fn update_consents(
        &self,
        party_id: Uuid,
        consents: &ConsentChanges,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE parties SET
                military_service     = COALESCE($2, military_service),
                consent_credit_check = COALESCE($3, consent_credit_check),
                consent_contact      = COALESCE($4, consent_contact),
                updated_at           = NOW()
            WHERE id = $1
            "#,
        )
        .bind(party_id)
        .bind(consents.military_service)
        .bind(consents.consent_credit_check)
        .bind(consents.consent_contact)
        .execute(&self.pool)
        .await?;

        not_found_if_zero(result.rows_affected(), "party", party_id)
    }

    async fn upsert_residence(
        &self,
        party_id: Uuid,
        residence: &ResidenceWrite,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO residences (
                party_id, residence_type, street, city, state, zip_code,
                years_at_address, months_at_address, housing_status, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (party_id, residence_type) DO UPDATE SET
                street            = EXCLUDED.street,
                city              = EXCLUDED.city,
                state             = EXCLUDED.state,
                zip_code          = EXCLUDED.zip_code,
                years_at_address  = EXCLUDED.years_at_address,
                months_at_address = EXCLUDED.months_at_address,
                housing_status    = EXCLUDED.housing_status,
                updated_at        = NOW()
            "#,
        )
        .bind(party_id)
        .bind(residence.kind.as_str())
        .bind(&residence.address.street)
        .bind(&residence.address.city)
        .bind(&residence.address.state)
        .bind(&residence.address.zip_code)
        .bind(residence.years_at_address)
        .bind(residence.months_at_address)
        .bind(residence.housing_status.as_deref())
        .execute(&self.pool)
        .await
        .context("writing residence")?;
        Ok(())
    }

    async fn get_residence(
        &self,
        party_id: Uuid,
        kind: ResidenceKind,
    ) -> Result<Option<Residence>, AppError> {
        sqlx::query_as::<_, Residence>(
            "SELECT * FROM residences WHERE party_id = $1 AND residence_type = $2",
        )
        .bind(party_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("loading residence")
    }

    async fn create_deal(&self, new: &NewDeal) -> Result<Deal, AppError> {
        let mut tx = self.pool.begin().await?;

        let deal = sqlx::query_as::<_, Deal>(
            r#"
            INSERT INTO deals
                (id, primary_borrower_id, managing_employee_id, current_form_step, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.primary_borrower_id)
        .bind(new.managing_employee_id)
        .bind(&new.current_form_step)
        .fetch_one(&mut *tx)
        .await
        .context("inserting deal")?;

        sqlx::query(
            r#"
            INSERT INTO loans (
                deal_id, purpose, amount, purchase_price, down_payment,
                estimated_price, outstanding_balance
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(deal.id)
        .bind(new.loan.purpose.as_str())
        .bind(&new.loan.amount)
        .bind(new.loan.purchase_price.as_ref())
        .bind(new.loan.down_payment.as_ref())
        .bind(new.loan.estimated_price.as_ref())
        .bind(new.loan.outstanding_balance.as_ref())
        .execute(&mut *tx)
        .await
        .context("inserting loan")?;

        sqlx::query("INSERT INTO deal_progress (deal_id) VALUES ($1)")
            .bind(deal.id)
            .execute(&mut *tx)
            .await
            .context("inserting deal progress")?;

        if let Some(property) = &new.subject_property {
            let address = property.address.as_ref();
            sqlx::query(
                r#"
                INSERT INTO subject_properties
                    (deal_id, street, city, state, zip_code, estimated_value, usage)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(deal.id)
            .bind(address.map(|a| a.street.as_str()))
            .bind(address.map(|a| a.city.as_str()))
            .bind(address.map(|a| a.state.as_str()))
            .bind(address.map(|a| a.zip_code.as_str()))
            .bind(property.estimated_value.as_ref())
            .bind(DEFAULT_PROPERTY_USAGE)
            .execute(&mut *tx)
            .await
            .context("inserting subject property")?;
        }

        tx.commit().await?;
        Ok(deal)
    }

    async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, AppError> {
        sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("loading deal")
    }

    async fn get_loan(&self, deal_id: Uuid) -> Result<Option<Loan>, AppError> {
        sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE deal_id = $1")
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await
            .context("loading loan")
    }

    async fn get_subject_property(
        &self,
        deal_id: Uuid,
    ) -> Result<Option<SubjectProperty>, AppError> {
        sqlx::query_as::<_, SubjectProperty>("SELECT * FROM subject_properties WHERE deal_id = $1")
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await
            .context("loading subject property")
    }

    async fn set_primary_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deals SET primary_borrower_id = $2, updated_at = NOW()
            WHERE id = $1 AND primary_borrower_id IS NULL
            "#,
        )
        .bind(deal_id)
        .bind(party_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn link_co_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO deal_co_borrowers (deal_id, party_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (deal_id, party_id) DO UPDATE SET updated_at = NOW()
            "#,
        )
        .bind(deal_id)
        .bind(party_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn co_borrowers(&self, deal_id: Uuid) -> Result<Vec<CoBorrowerLink>, AppError> {
        sqlx::query_as::<_, CoBorrowerLink>(
            "SELECT * FROM deal_co_borrowers WHERE deal_id = $1 ORDER BY created_at ASC",
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await
        .context("loading co-borrower links")
    }

    async fn mark_joint(&self, deal_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deals
            SET application_type = 'JointCredit', total_borrowers = 2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(deal_id)
        .execute(&self.pool)
        .await?;
        not_found_if_zero(result.rows_affected(), "deal", deal_id)
    }

    async fn apply_loan_update(
        &self,
        deal_id: Uuid,
        changes: &LoanChanges,
        property: Option<&SubjectPropertyWrite>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE loans SET
                amount                   = COALESCE($2, amount),
                term_months              = COALESCE($3, term_months),
                interest_rate            = COALESCE($4, interest_rate),
                property_type            = COALESCE($5, property_type),
                purchase_price           = COALESCE($6, purchase_price),
                down_payment             = COALESCE($7, down_payment),
                estimated_price          = COALESCE($8, estimated_price),
                outstanding_balance      = COALESCE($9, outstanding_balance),
                applying_for_other_loans = COALESCE($10, applying_for_other_loans),
                down_payment_gift        = COALESCE($11, down_payment_gift),
                updated_at               = NOW()
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .bind(changes.amount.as_ref())
        .bind(changes.term_months)
        .bind(changes.interest_rate.as_ref())
        .bind(changes.property_type.as_deref())
        .bind(changes.purchase_price.as_ref())
        .bind(changes.down_payment.as_ref())
        .bind(changes.estimated_price.as_ref())
        .bind(changes.outstanding_balance.as_ref())
        .bind(changes.applying_for_other_loans)
        .bind(changes.down_payment_gift)
        .execute(&mut *tx)
        .await
        .context("updating loan")?;
        not_found_if_zero(result.rows_affected(), "loan for deal", deal_id)?;

        if let Some(property) = property {
            let address = property.address.as_ref();
            sqlx::query(
                r#"
                INSERT INTO subject_properties
                    (deal_id, street, city, state, zip_code, estimated_value, usage, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (deal_id) DO UPDATE SET
                    street          = COALESCE(EXCLUDED.street, subject_properties.street),
                    city            = COALESCE(EXCLUDED.city, subject_properties.city),
                    state           = COALESCE(EXCLUDED.state, subject_properties.state),
                    zip_code        = COALESCE(EXCLUDED.zip_code, subject_properties.zip_code),
                    estimated_value = COALESCE(
                        EXCLUDED.estimated_value,
                        subject_properties.estimated_value
                    ),
                    updated_at      = NOW()
                "#,
            )
            .bind(deal_id)
            .bind(address.map(|a| a.street.as_str()))
            .bind(address.map(|a| a.city.as_str()))
            .bind(address.map(|a| a.state.as_str()))
            .bind(address.map(|a| a.zip_code.as_str()))
            .bind(property.estimated_value.as_ref())
            .bind(DEFAULT_PROPERTY_USAGE)
            .execute(&mut *tx)
            .await
            .context("upserting subject property")?;
        }

        sqlx::query("UPDATE deals SET updated_at = NOW() WHERE id = $1")
            .bind(deal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn advance_form_step(&self, deal_id: Uuid, step: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE deals SET current_form_step = $2, updated_at = NOW()
            WHERE id = $1 AND current_form_step IS DISTINCT FROM $2
            "#,
        )
        .bind(deal_id)
        .bind(step)
        .execute(&self.pool)
        .await
        .context("advancing form step")?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_deal(&self, deal_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE deals SET updated_at = NOW() WHERE id = $1")
            .bind(deal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_deals_for_borrower(
        &self,
        party_id: Uuid,
    ) -> Result<Vec<DealSummary>, AppError> {
        let sql = format!(
            r#"{}
            WHERE d.primary_borrower_id = $1
               OR EXISTS (
                   SELECT 1 FROM deal_co_borrowers cb
                   WHERE cb.deal_id = d.id AND cb.party_id = $1
               )
            ORDER BY last_activity_at DESC
            "#,
            SUMMARY_SELECT
        );
        sqlx::query_as::<_, DealSummary>(&sql)
            .bind(party_id)
            .fetch_all(&self.pool)
            .await
            .context("listing borrower deals")
    }

    async fn list_deals_for_employee(
        &self,
        employee_id: Uuid,
    ) -> Result<Vec<DealSummary>, AppError> {
        let sql = format!(
            r#"{}
            WHERE d.managing_employee_id = $1
            ORDER BY last_activity_at DESC
            "#,
            SUMMARY_SELECT
        );
        sqlx::query_as::<_, DealSummary>(&sql)
            .bind(employee_id)
            .fetch_all(&self.pool)
            .await
            .context("listing employee deals")
    }

    async fn get_progress(&self, deal_id: Uuid) -> Result<Option<DealProgress>, AppError> {
        sqlx::query_as::<_, DealProgress>("SELECT * FROM deal_progress WHERE deal_id = $1")
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await
            .context("loading deal progress")
    }

    async fn set_section(
        &self,
        deal_id: Uuid,
        section: Section,
        complete: bool,
    ) -> Result<DealProgress, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, DealProgress>(
            "SELECT * FROM deal_progress WHERE deal_id = $1 FOR UPDATE",
        )
        .bind(deal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("progress for deal {} not found", deal_id)))?;

        let mut flags = current.section_flags.0;
        flags.set(section, complete);
        let percentage = flags.percentage();

        let updated = sqlx::query_as::<_, DealProgress>(
            r#"
            UPDATE deal_progress SET
                section_flags        = $2,
                progress_percentage  = $3,
                last_updated_section = $4,
                last_updated_at      = NOW(),
                updated_at           = NOW()
            WHERE deal_id = $1
            RETURNING *
            "#,
        )
        .bind(deal_id)
        .bind(Json(&flags))
        .bind(percentage)
        .bind(section.name())
        .fetch_one(&mut *tx)
        .await
        .context("updating section flag")?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn set_progress_notes(
        &self,
        deal_id: Uuid,
        notes: &str,
    ) -> Result<DealProgress, AppError> {
        sqlx::query_as::<_, DealProgress>(
            r#"
            UPDATE deal_progress SET notes = $2, updated_at = NOW()
            WHERE deal_id = $1
            RETURNING *
            "#,
        )
        .bind(deal_id)
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .context("updating progress notes")?
        .ok_or_else(|| AppError::NotFound(format!("progress for deal {} not found", deal_id)))
    }
}
