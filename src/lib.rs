// SPDX-License-Identifier: Apache-2.0

// Qwery Catalog - datasource federation for conversational SQL
// Core library

pub mod attach;
pub mod cache;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod naming;
pub mod observability;
pub mod orchestrator;
pub mod providers;
pub mod sql_refs;
pub mod store;
pub mod toon;

pub use config::CatalogConfig;
pub use engine::{CatalogSession, DuckDbEngine, DuckDbEngineFactory, EngineFactory, SqlEngine};
pub use orchestrator::{OrchestrationRequest, OrchestrationResult, Orchestrator, QueryHandle};
pub use providers::ProviderRegistry;
pub use qwery_core::{Conversation, Datasource, EngineError, EngineResult};
