//! Periodic discovery agent bridging a Rancher cluster API and Prometheus
//! file-based service discovery.
//!
//! On a fixed cadence the agent walks the cluster's projects and services,
//! keeps the services exposing the monitored role, and atomically rewrites a
//! JSON discovery file that a concurrently running Prometheus consumes via
//! `file_sd_config`.

pub mod config_writer;
pub mod discovery_loop;
pub mod fs;
pub mod prometheus_config;
pub mod rancher;
