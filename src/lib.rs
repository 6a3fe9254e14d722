//! Loan Orchestrator Library
//!
//! Lead-origination backend: validates leads, drives them through the signed
//! upstream application API, records them per tenant environment, delivers OTP
//! and WhatsApp notifications, and ingests disbursement records found by the live
//! email monitor.
//!
//! # Modules
//!
//! - `api`: HTTP handlers and the OpenAPI document.
//! - `core`: Lead lifecycle, disbursement ingestion, monitoring and OTP logic.
//! - `data`: Store seams, Postgres and in-memory backends.
//! - `integrations`: Upstream API client, request signing and WhatsApp delivery.
//! - `circuit_breaker`: Circuit breaker for outbound messaging.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod basic_client;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod disbursement_models;
pub mod disbursement_pipeline;
pub mod errors;
pub mod handlers;
pub mod lead_lifecycle;
pub mod lead_status;
pub mod memory_store;
pub mod models;
pub mod monitor;
pub mod normalizer;
pub mod notifier;
pub mod openapi;
pub mod otp;
pub mod pg_store;
pub mod signing;
pub mod store;
pub mod validation;
