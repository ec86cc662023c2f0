//! Diffing known bundles against a fresh snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::bundle::{Bundle, BundleContext, BundleId};
use crate::snapshot::Snapshot;

/// What a cycle has to undeploy and deploy.
#[derive(Debug, Default)]
pub struct DeployPlan {
    pub undeploy: Vec<Arc<Bundle>>,
    pub deploy: Vec<Arc<Bundle>>,
}

impl DeployPlan {
    /// Compare `known` with `snapshot`.
    ///
    /// A known bundle whose file is gone is undeployed. One whose identity
    /// changed is undeployed and its replacement deployed if still accepted.
    /// Files no known bundle accounts for are deployed if accepted.
    pub fn compute(
        known: &[Arc<Bundle>],
        snapshot: &Snapshot,
        extension: &str,
        context: &BundleContext,
    ) -> Self {
        let mut plan = Self::default();
        let mut accounted: HashSet<&str> = HashSet::new();

        for bundle in known {
            let Some(record) = snapshot.get(bundle.name()) else {
                debug!(bundle = %bundle.name(), "Bundle file removed");
                plan.undeploy.push(bundle.clone());
                continue;
            };
            accounted.insert(record.name.as_str());
            if bundle.id().matches(record) {
                continue;
            }

            debug!(bundle = %bundle.name(), "Bundle file changed");
            plan.undeploy.push(bundle.clone());
            let path = snapshot.path_of(record);
            if Bundle::accepted(&path, extension, &context.capability) {
                plan.deploy.push(Arc::new(Bundle::with_id(
                    BundleId::from_record(record),
                    path,
                    context.clone(),
                )));
            }
        }

        for record in snapshot.records() {
            if accounted.contains(record.name.as_str()) {
                continue;
            }
            let path = snapshot.path_of(record);
            if Bundle::accepted(&path, extension, &context.capability) {
                debug!(bundle = %record.name, "New bundle");
                plan.deploy.push(Arc::new(Bundle::with_id(
                    BundleId::from_record(record),
                    path,
                    context.clone(),
                )));
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.undeploy.is_empty() && self.deploy.is_empty()
    }
}
