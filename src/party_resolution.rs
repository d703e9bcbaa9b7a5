//! Find-or-create of the borrower and co-borrower parties for a deal.
//!
//! Precedence is fixed:
//! 1. the party already attached to the deal (primary borrower or oldest co-borrower link);
//! 2. a global email, then normalized-phone, match, only when nothing is attached yet;
//! 3. a new party, which needs first name, last name and phone.
//!
//! A global match is a `Conflict` for the primary borrower and is adopted for a
//! co-borrower (co-borrowers may appear on several deals).

use std::sync::Arc;
use uuid::Uuid;

use crate::contact;
use crate::errors::{AppError, ResultExt};
use crate::models::{Deal, MaritalStatus, Party, PhoneType};
use crate::step_schema::IdentityFields;
use crate::store::{ApplicationStore, NewParty, PhoneWrite};

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Already attached to the deal.
    Existing(Party),
    /// Found by global lookup and reused (co-borrower only).
    Adopted(Party),
    Created(Party),
}

impl Resolution {
    pub fn party(&self) -> &Party {
        match self {
            Resolution::Existing(p) | Resolution::Adopted(p) | Resolution::Created(p) => p,
        }
    }

    pub fn id(&self) -> Uuid {
        self.party().id
    }
}

/// Identity fields normalized for lookup and creation.
#[derive(Debug, Clone)]
pub struct IdentityInput {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub suffix: Option<String>,
    pub email: Option<String>,
    /// Normalized digits.
    pub phone: Option<String>,
    pub phone_type: PhoneType,
    pub marital_status: Option<MaritalStatus>,
    pub birth_date: Option<chrono::NaiveDate>,
}

impl IdentityInput {
    /// Normalizes raw step fields. An email that fails validation is a `ValidationError`.
    pub fn from_fields(fields: &IdentityFields) -> Result<Self, AppError> {
        let email = fields.email.as_deref().and_then(contact::normalize_email);
        if let Some(email) = &email {
            if !contact::is_valid_email(email) {
                return Err(AppError::ValidationError(format!(
                    "invalid email address '{}'",
                    email
                )));
            }
        }
        Ok(Self {
            first_name: contact::non_blank(fields.first_name.as_deref()),
            middle_name: contact::non_blank(fields.middle_name.as_deref()),
            last_name: contact::non_blank(fields.last_name.as_deref()),
            suffix: contact::non_blank(fields.suffix.as_deref()),
            email,
            phone: fields.phone.as_deref().and_then(contact::normalize_phone),
            phone_type: fields
                .phone_type
                .as_deref()
                .and_then(PhoneType::parse)
                .unwrap_or(PhoneType::Mobile),
            marital_status: None,
            birth_date: fields.date_of_birth.as_deref().and_then(contact::parse_birth_date),
        })
    }

    /// Builds the insert for a brand-new party, enforcing the creation minimum.
    pub fn to_new_party(&self, role: &str) -> Result<NewParty, AppError> {
        let mut missing = Vec::new();
        if self.first_name.is_none() {
            missing.push("firstName");
        }
        if self.last_name.is_none() {
            missing.push("lastName");
        }
        if self.phone.is_none() {
            missing.push("phone");
        }
        if !missing.is_empty() {
            return Err(AppError::ValidationError(format!(
                "{} requires {}",
                role,
                missing.join(", ")
            )));
        }

        let phone = self.phone.clone().unwrap_or_default();
        if !contact::is_plausible_phone(&phone) {
            return Err(AppError::ValidationError(format!(
                "invalid phone number for {}",
                role
            )));
        }

        Ok(NewParty {
            first_name: self.first_name.clone().unwrap_or_default(),
            middle_name: self.middle_name.clone(),
            last_name: self.last_name.clone().unwrap_or_default(),
            suffix: self.suffix.clone(),
            email: self.email.clone(),
            birth_date: self.birth_date,
            marital_status: self.marital_status,
            phone: PhoneWrite {
                phone_type: self.phone_type,
                number: phone,
                extension: None,
                primary: true,
            },
        })
    }
}

#[derive(Clone)]
pub struct PartyResolver {
    store: Arc<dyn ApplicationStore>,
}

impl PartyResolver {
    pub fn new(store: Arc<dyn ApplicationStore>) -> Self {
        Self { store }
    }

    /// Global lookup by email first, then normalized phone.
    pub async fn find_existing(
        &self,
        identity: &IdentityInput,
    ) -> Result<Option<(Party, &'static str)>, AppError> {
        if let Some(email) = &identity.email {
            if let Some(party) = self.store.find_party_by_email(email).await? {
                return Ok(Some((party, "email")));
            }
        }
        if let Some(phone) = &identity.phone {
            if let Some(party) = self.store.find_party_by_phone(phone).await? {
                return Ok(Some((party, "phone")));
            }
        }
        Ok(None)
    }

    /// Resolves the deal's primary borrower.
    ///
    /// `identity` is `Some` only for steps allowed to create the borrower.
    pub async fn resolve_primary_borrower(
        &self,
        deal: &Deal,
        identity: Option<&IdentityInput>,
    ) -> Result<Resolution, AppError> {
        if let Some(party_id) = deal.primary_borrower_id {
            let party = self
                .store
                .get_party(party_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("borrower {} not found", party_id)))?;
            return Ok(Resolution::Existing(party));
        }

        let Some(identity) = identity else {
            return Err(AppError::NotFound(
                "no borrower associated with this deal".to_string(),
            ));
        };

        if let Some((_, field)) = self.find_existing(identity).await? {
            return Err(AppError::conflict(
                field,
                format!("borrower with this {} already exists", field),
            ));
        }

        let new_party = identity.to_new_party("borrower")?;
        let party = self.store.insert_party(&new_party).await?;

        let attached = self
            .store
            .set_primary_borrower(deal.id, party.id)
            .await
            .context("attaching primary borrower")?;
        if !attached {
            // Another save attached a borrower between our read and write
            tracing::warn!(
                "Deal {} gained a primary borrower concurrently; party {} left unattached",
                deal.id,
                party.id
            );
            return Err(AppError::conflict(
                "borrower",
                "this application already has a primary borrower",
            ));
        }

        tracing::info!("Created primary borrower {} for deal {}", party.id, deal.id);
        Ok(Resolution::Created(party))
    }

    /// Resolves the deal's co-borrower and writes the link for new or adopted parties.
    ///
    /// `identity` is `Some` only for steps allowed to attach a co-borrower.
    pub async fn resolve_co_borrower(
        &self,
        deal: &Deal,
        identity: Option<&IdentityInput>,
    ) -> Result<Resolution, AppError> {
        // Oldest link wins if more than one exists
        if let Some(link) = self.store.co_borrowers(deal.id).await?.into_iter().next() {
            let party = self.store.get_party(link.party_id).await?.ok_or_else(|| {
                AppError::NotFound(format!("co-borrower {} not found", link.party_id))
            })?;
            return Ok(Resolution::Existing(party));
        }

        let Some(identity) = identity else {
            return Err(AppError::NotFound(
                "no co-borrower associated with this deal".to_string(),
            ));
        };

        let resolution = match self.find_existing(identity).await? {
            Some((party, field)) => {
                if Some(party.id) == deal.primary_borrower_id {
                    return Err(AppError::conflict(
                        field,
                        format!(
                            "co-borrower {} matches the primary borrower on this application",
                            field
                        ),
                    ));
                }
                tracing::info!(
                    "Adopting existing party {} as co-borrower on deal {} (matched by {})",
                    party.id,
                    deal.id,
                    field
                );
                Resolution::Adopted(party)
            }
            None => {
                let new_party = identity.to_new_party("co-borrower")?;
                let party = self.store.insert_party(&new_party).await?;
                tracing::info!("Created co-borrower {} for deal {}", party.id, deal.id);
                Resolution::Created(party)
            }
        };

        self.attach_co_borrower(deal.id, resolution.id()).await?;
        Ok(resolution)
    }

    /// Links the co-borrower and flips the deal to joint credit.
    ///
    /// Both writes are critical: any failure is a `LinkageFailure`.
    pub async fn attach_co_borrower(&self, deal_id: Uuid, party_id: Uuid) -> Result<(), AppError> {
        self.store
            .link_co_borrower(deal_id, party_id)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to link co-borrower {} to deal {}: {}",
                    party_id,
                    deal_id,
                    e
                );
                AppError::LinkageFailure(format!(
                    "could not link co-borrower {} to deal {}",
                    party_id, deal_id
                ))
            })?;

        self.store.mark_joint(deal_id).await.map_err(|e| {
            tracing::error!("Failed to mark deal {} as joint: {}", deal_id, e);
            AppError::LinkageFailure(format!(
                "co-borrower linked but deal {} could not be marked joint",
                deal_id
            ))
        })?;

        tracing::info!("Linked co-borrower {} to deal {} (JointCredit)", party_id, deal_id);
        Ok(())
    }

    /// Rejects an email or phone change that collides with a different party.
    pub async fn check_identity_update(
        &self,
        party_id: Uuid,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), AppError> {
        if let Some(email) = email {
            if let Some(other) = self.store.find_party_by_email(email).await? {
                if other.id != party_id {
                    return Err(AppError::conflict(
                        "email",
                        "party identity conflict: email belongs to another borrower",
                    ));
                }
            }
        }
        if let Some(phone) = phone {
            if let Some(other) = self.store.find_party_by_phone(phone).await? {
                if other.id != party_id {
                    return Err(AppError::conflict(
                        "phone",
                        "party identity conflict: phone belongs to another borrower",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(first: Option<&str>, last: Option<&str>, phone: Option<&str>) -> IdentityFields {
        IdentityFields {
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            phone: phone.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_creation_minimum() {
        let input = IdentityInput::from_fields(&fields(Some("Ann"), None, None)).unwrap();
        match input.to_new_party("co-borrower") {
            Err(AppError::ValidationError(msg)) => {
                assert!(msg.contains("lastName"));
                assert!(msg.contains("phone"));
                assert!(!msg.contains("firstName"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_party_uses_normalized_phone() {
        let input =
            IdentityInput::from_fields(&fields(Some("Ann"), Some("Lee"), Some("(555) 123-4567")))
                .unwrap();
        let party = input.to_new_party("borrower").unwrap();
        assert_eq!(party.phone.number, "5551234567");
        assert!(party.phone.primary);
        assert_eq!(party.phone.phone_type, PhoneType::Mobile);
    }

    #[test]
    fn test_short_phone_rejected() {
        let input =
            IdentityInput::from_fields(&fields(Some("Ann"), Some("Lee"), Some("12345"))).unwrap();
        assert!(matches!(
            input.to_new_party("borrower"),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_email_rejected() {
        let mut raw = fields(Some("Ann"), Some("Lee"), Some("5551234567"));
        raw.email = Some("not-an-email".into());
        assert!(matches!(
            IdentityInput::from_fields(&raw),
            Err(AppError::ValidationError(_))
        ));
    }
}
