use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;
use crate::types::{LabelMetrics, MetricType};

/// Terminal outcome a device reports after applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

impl DeploymentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DeploymentSucceeded" => Some(DeploymentStatus::Succeeded),
            "DeploymentFailed" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }
}

/// Install/active/failure counters, one logical counter per
/// (deployment key, label, type). All writes are collapsing upserts.
pub struct MetricsCounter {
    store: Arc<dyn Store>,
}

impl MetricsCounter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn record_download(&self, deployment_key: &str, label: &str) -> Result<()> {
        self.store
            .increment_metric(deployment_key, label, MetricType::Downloaded)
    }

    pub fn record_deployment_status(
        &self,
        deployment_key: &str,
        label: &str,
        status: DeploymentStatus,
        client_id: &str,
    ) -> Result<()> {
        match status {
            DeploymentStatus::Succeeded => {
                self.store.set_client_label(deployment_key, client_id, label)?;
                self.store.increment_metric(
                    deployment_key,
                    label,
                    MetricType::DeploymentSucceeded,
                )?;
                self.store
                    .increment_metric(deployment_key, label, MetricType::Active)
            }
            DeploymentStatus::Failed => self.store.increment_metric(
                deployment_key,
                label,
                MetricType::DeploymentFailed,
            ),
        }
    }

    /// Marks a fresh install transition: the previous label's active count
    /// goes down (never below zero), the new one goes up.
    pub fn record_deployment(
        &self,
        deployment_key: &str,
        label: &str,
        client_id: &str,
        previous: Option<(&str, &str)>,
    ) -> Result<()> {
        if let Some((previous_key, previous_label)) = previous {
            self.store
                .decrement_metric(previous_key, previous_label, MetricType::Active)?;
        }

        self.store.set_client_label(deployment_key, client_id, label)?;
        self.store
            .increment_metric(deployment_key, label, MetricType::Active)
    }

    pub fn metrics(&self, deployment_key: &str) -> Result<BTreeMap<String, LabelMetrics>> {
        self.store.deployment_metrics(deployment_key)
    }
}
