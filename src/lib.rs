//! Schema-driven LM enrichment of tabular records.
//!
//! A [`Schema`](schema::Schema) names the input columns a prompt reads and the
//! output columns the model must fill. The [`JobRunner`](job::JobRunner) takes
//! an ordered record set, dispatches prompts through an
//! [`AiClient`](client::AiClient) with one of three strategies, parses the
//! free-text answers back into typed fields, and returns exactly one
//! [`Outcome`](record::Outcome) per record in input order.
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod lm_log;
pub mod prompt;
pub mod record;
pub mod response;
pub mod rows;
pub mod schema;
pub mod util;
pub mod value;
