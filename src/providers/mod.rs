// SPDX-License-Identifier: Apache-2.0

//! Datasource providers: how each source type is attached to the catalog.

pub mod connection;
pub mod registry;
pub mod sheets;

pub use registry::{
    information_schema_columns, information_schema_tables, IngestFormat, PathStyle, ProviderKind,
    ProviderRegistry, ProviderSpec,
};
