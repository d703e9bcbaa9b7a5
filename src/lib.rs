//! URLA Application State & Progress Engine
//!
//! Incremental persistence of a multi-step mortgage application: party
//! resolution for borrowers and co-borrowers, step-scoped saves with a resume
//! cursor, and explicit per-section progress tracking.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Domain logic.
//! - `address`: Address parsing and formatting.
//! - `applications`: Create/get/list applications, registration, loan amount derivation.
//! - `config`: Configuration management.
//! - `contact`: Email, phone and marital status normalization.
//! - `db`: Database connection and migrations.
//! - `db_storage`: Postgres implementation of the store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `memory_store`: In-process implementation of the store.
//! - `models`: Persisted records and domain enums.
//! - `orchestrator`: Step save pipeline.
//! - `party_resolution`: Find-or-create of borrower parties.
//! - `progress`: Section catalogue and progress projection.
//! - `step_schema`: Typed per-step payloads.
//! - `store`: The storage port.

pub mod api;
pub mod core;

pub mod address;
pub mod applications;
pub mod config;
pub mod contact;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod memory_store;
pub mod models;
pub mod orchestrator;
pub mod party_resolution;
pub mod progress;
pub mod step_schema;
pub mod store;
