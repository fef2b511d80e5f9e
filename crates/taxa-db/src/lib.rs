//! Taxa DB - SQLite storage for taxa datasets
//!
//! This crate provides:
//!
//! - [`schema`] - table and index creation
//! - [`staging`] - the write side used while a sync builds `<db>.new`
//! - [`dataset`] - read-only access to a published dataset
//! - [`publish`] - atomic swap of the staging file into place

pub mod dataset;
pub mod publish;
pub mod schema;
pub mod staging;

pub use dataset::{DatasetReader, QueryResults};
pub use publish::{backup_path, publish_dataset, remove_staging, staging_path};
pub use schema::create_schema;
pub use staging::{insert_region, open_staging, record_last_sync, StagingWriter};
