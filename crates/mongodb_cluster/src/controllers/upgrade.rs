//! Gating of version changes.
//!
//! While the running version differs from the requested one the StatefulSet uses the
//! OnDelete strategy, so the agents restart members one at a time. The pass that sees
//! the set converged again must first have seen it leave the ready state, otherwise a
//! status read before the controller picked up the new template would end the upgrade.

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use tracing::info;

use super::annotations::set_annotations;
use crate::api::v1::mongodb::{
    FALSE_ANNOTATION, HAS_LEFT_READY_STATE_ANNOTATION, LAST_VERSION_ANNOTATION, TRUE_ANNOTATION,
    VERSION_CHANGE_IN_PROGRESS_ANNOTATION,
};
use crate::api::v1::MongoDB;
use crate::client::ResourceClient;
use crate::util::errors::Result;
use crate::workload::statefulset::{is_ready, set_update_strategy};
use crate::workload::UpdateStrategyType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Stable,
    Upgrading { has_left_ready_state: bool },
}

impl UpgradeState {
    /// A version change is in progress when a version was recorded and differs from
    /// the requested one. A resource that never converged has nothing to upgrade from.
    pub fn of(mdb: &MongoDB) -> UpgradeState {
        match mdb.annotation(LAST_VERSION_ANNOTATION) {
            Some(last) if !last.is_empty() && last != mdb.spec.version => UpgradeState::Upgrading {
                has_left_ready_state: mdb.annotation(HAS_LEFT_READY_STATE_ANNOTATION) == Some(TRUE_ANNOTATION),
            },
            _ => UpgradeState::Stable,
        }
    }

    pub fn is_upgrading(&self) -> bool {
        matches!(self, UpgradeState::Upgrading { .. })
    }

    pub fn has_left_ready_state(&self) -> bool {
        matches!(self, UpgradeState::Upgrading { has_left_ready_state: true })
    }

    pub fn update_strategy(&self) -> UpdateStrategyType {
        if self.is_upgrading() {
            UpdateStrategyType::OnDelete
        } else {
            UpdateStrategyType::RollingUpdate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// The set was seen not ready under OnDelete during this pass.
    pub left_ready_state: bool,
}

/// Decides whether the live StatefulSet counts as converged.
///
/// `state` is the upgrade state read at the start of the pass, so a set that leaves
/// the ready state and converges again is only seen converged on a later pass.
pub fn evaluate(state: &UpgradeState, live: &StatefulSet, members: i32, spec_current: bool) -> Readiness {
    let members_ready = is_ready(live, members);
    let on_delete = UpdateStrategyType::of(live) == Some(UpdateStrategyType::OnDelete);
    let converged = spec_current && members_ready;

    let ready = if on_delete {
        converged && state.has_left_ready_state()
    } else {
        converged
    };
    Readiness {
        ready,
        left_ready_state: on_delete && !members_ready,
    }
}

/// Records that the set left the ready state, if not recorded yet.
pub async fn mark_left_ready_state<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<()> {
    let namespace = mdb.namespace_or_err()?;
    set_annotations(
        client,
        &namespace,
        &mdb.name_any(),
        &[(HAS_LEFT_READY_STATE_ANNOTATION, TRUE_ANNOTATION)],
    )
    .await
}

/// Marks a version change as started so the gating applies from the next pass on.
pub async fn mark_in_progress<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<()> {
    let namespace = mdb.namespace_or_err()?;
    set_annotations(
        client,
        &namespace,
        &mdb.name_any(),
        &[(VERSION_CHANGE_IN_PROGRESS_ANNOTATION, TRUE_ANNOTATION)],
    )
    .await
}

/// Closes the upgrade cycle once the set converged: restores the rolling strategy and
/// records the current version.
pub async fn reset<C: ResourceClient>(client: &C, mdb: &MongoDB, state: &UpgradeState) -> Result<()> {
    let namespace = mdb.namespace_or_err()?;
    let name = mdb.name_any();
    if state.is_upgrading() {
        info!(mongodb = %name, version = %mdb.spec.version, "version change completed");
        set_update_strategy(client, &namespace, &name, UpdateStrategyType::RollingUpdate).await?;
    }
    set_annotations(
        client,
        &namespace,
        &name,
        &[
            (LAST_VERSION_ANNOTATION, mdb.spec.version.as_str()),
            (HAS_LEFT_READY_STATE_ANNOTATION, FALSE_ANNOTATION),
            (VERSION_CHANGE_IN_PROGRESS_ANNOTATION, FALSE_ANNOTATION),
        ],
    )
    .await
}
