// Engine Drivers

pub mod duckdb;
