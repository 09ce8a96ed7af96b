//! # Store Provisioner Library
//!
//! Provisions isolated per-tenant store environments in a shared Kubernetes
//! cluster, tracks their lifecycle in a relational store, and reconciles the
//! records against live cluster state.

pub mod app;
pub mod cluster;
pub mod config;
pub mod db;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod models;
pub mod provisioner;
pub mod reconciler;
pub mod repositories;
pub mod service;
pub mod status;
pub mod telemetry;
pub use migration;
