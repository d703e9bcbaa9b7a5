use bigdecimal::BigDecimal;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use rust_urla_api::db::Database;
use rust_urla_api::db_storage::PgStore;
use rust_urla_api::models::{PhoneType, LoanPurpose};
use rust_urla_api::progress::Section;
use rust_urla_api::store::{ApplicationStore, NewDeal, NewLoan, NewParty, PhoneWrite};

/// Integration smoke test for the Postgres store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_store_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, 2).await?;
    let store: Arc<dyn ApplicationStore> = Arc::new(PgStore::new(db.pool.clone()));

    // Unique phone to avoid conflicts on repeated runs.
    let phone = format!("555{:07}", Uuid::new_v4().as_u128() % 10_000_000);
    let party = store
        .insert_party(&NewParty {
            first_name: "Smoke".to_string(),
            middle_name: None,
            last_name: "Test".to_string(),
            suffix: None,
            email: None,
            birth_date: None,
            marital_status: None,
            phone: PhoneWrite {
                phone_type: PhoneType::Mobile,
                number: phone.clone(),
                extension: None,
                primary: true,
            },
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let duplicate = store
        .insert_party(&NewParty {
            first_name: "Other".to_string(),
            middle_name: None,
            last_name: "Party".to_string(),
            suffix: None,
            email: None,
            birth_date: None,
            marital_status: None,
            phone: PhoneWrite {
                phone_type: PhoneType::Home,
                number: phone.clone(),
                extension: None,
                primary: true,
            },
        })
        .await;
    assert!(matches!(duplicate, Err(ref e) if e.is_conflict()));

    let deal = store
        .create_deal(&NewDeal {
            primary_borrower_id: Some(party.id),
            managing_employee_id: None,
            current_form_step: "borrower-info-1".to_string(),
            loan: NewLoan::new(LoanPurpose::Purchase, BigDecimal::from(300_000)),
            subject_property: None,
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert!(store
        .advance_form_step(deal.id, "borrower-info-2")
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?);

    let progress = store
        .set_section(deal.id, Section::PersonalInfo, true)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(progress.section_flags.0.completed_count(), 1);

    let listed = store
        .list_deals_for_borrower(party.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(listed.iter().any(|d| d.deal_id == deal.id));
    Ok(())
}
