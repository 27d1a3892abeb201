//! ---
//! cvl_section: "01-model-graph"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Instance lifecycle status enumeration."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deployed instance.
///
/// `NotDeployed` is the initial state and the only state an instance can be
/// removed from. `Problem` marks a failure that requires operator
/// intervention. The four transitional states are never observable across a
/// completed operation: every operation either reaches a stable state or
/// reverts to the pre-operation stable state before returning.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    NotDeployed,
    Deploying,
    DeployedStopped,
    Starting,
    DeployedStarted,
    Stopping,
    Undeploying,
    Unresolved,
    WaitingForAncestor,
    Problem,
}

impl InstanceStatus {
    /// True for the in-flight states an instance must never be left in.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            InstanceStatus::Deploying
                | InstanceStatus::Starting
                | InstanceStatus::Stopping
                | InstanceStatus::Undeploying
        )
    }

    /// True for states an operation is allowed to finish in.
    pub fn is_stable(self) -> bool {
        !self.is_transitional()
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus::NotDeployed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn transitional_states_are_not_stable() {
        for status in [
            InstanceStatus::Deploying,
            InstanceStatus::Starting,
            InstanceStatus::Stopping,
            InstanceStatus::Undeploying,
        ] {
            assert!(status.is_transitional());
            assert!(!status.is_stable());
        }
        assert!(InstanceStatus::NotDeployed.is_stable());
        assert!(InstanceStatus::Problem.is_stable());
    }

    #[test]
    fn display_uses_screaming_snake_case() {
        assert_eq!(
            InstanceStatus::WaitingForAncestor.to_string(),
            "WAITING_FOR_ANCESTOR"
        );
        assert_eq!(
            InstanceStatus::from_str("DEPLOYED_STARTED").unwrap(),
            InstanceStatus::DeployedStarted
        );
    }
}
