//! Mapping from discovered services to Prometheus `file_sd_config` target
//! groups.
//!
//! The serialized shape of [`TargetGroup`] is a public contract with the
//! Prometheus instance reading the discovery file; do not change it without
//! coordinating with the scrape configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rancher::DiscoveredService;

/// Name a service must carry to be picked up as a federation target.
pub const MONITORED_SERVICE_NAME: &str = "prometheus";

/// Label attached to every group so operators can trace a target back to the
/// project it came from.
pub const PROJECT_LABEL: &str = "project";

/// One entry of the file-sd document: a set of `host:port` targets sharing
/// the same labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    // BTreeMap keeps label order deterministic, so identical input always
    // serializes to identical bytes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Projects the discovered services onto the discovery document. Pure; a
/// service qualifies when it carries the monitored name and exposes at least
/// one public endpoint, and each qualifying service yields exactly one group.
pub fn target_groups(services: &[DiscoveredService]) -> Vec<TargetGroup> {
    services
        .iter()
        .filter_map(|discovered| {
            if discovered.service.name != MONITORED_SERVICE_NAME {
                return None;
            }
            let endpoints = discovered.service.public_endpoints.as_deref()?;
            if endpoints.is_empty() {
                return None;
            }
            Some(TargetGroup {
                targets: endpoints
                    .iter()
                    .map(|endpoint| format!("{}:{}", endpoint.ip_address, endpoint.port))
                    .collect(),
                labels: BTreeMap::from([(
                    PROJECT_LABEL.to_string(),
                    discovered.project.name.clone(),
                )]),
            })
        })
        .collect()
}
