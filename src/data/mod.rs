//! Data layer for the DataTable/DataView architecture
//!
//! This module separates data storage (`DataTable`, the dataset index) from
//! its projections (`DataView`, produced by the query pipeline).

// Core data modules
pub mod column;
pub mod data_view;
pub mod datatable;
pub mod datavalue_compare;

// Query pipeline
pub mod filter;
pub mod grouping;
pub mod pagination;
pub mod query_engine;
pub mod sort;

// Loading and export
pub mod data_exporter;
pub mod datatable_loaders;
