//! Namespace Configuration Operator
//!
//! Keeps namespaces, OpenShift users and groups configured from templates
//! declared in NamespaceConfig, UserConfig and GroupConfig resources.
//! Controllers for optional APIs are only started when the cluster serves
//! them.

pub mod adapters;
pub mod bootstrap;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod scheme;

pub use error::{Error, Result};
