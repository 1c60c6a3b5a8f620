//! Core library for the device management service.
//!
//! Contains configuration resolution, the enrollment workflow, provisioning
//! state, the connection audit trail, binary delivery and dependency health
//! checks. This crate depends on `dm-storage` for object storage and knows
//! nothing about HTTP.

pub mod audit;
pub mod audit_file;
pub mod device;
pub mod enrollment;
pub mod error;
pub mod gateway;
pub mod health;
#[cfg(feature = "postgres-backend")]
pub mod postgres;
pub mod provisioning;
pub mod resolver;
pub mod template;
