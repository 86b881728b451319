//! ObjectDeployment status aggregation
//!
//! Derives the `Available`, `Progressing` and `Paused` conditions of an
//! ObjectDeployment from its revisions, copies mapped conditions of the
//! current revision and sets the phase. Pure: nothing here talks to the
//! cluster.

use std::collections::HashSet;

use pko_core::conditions::{self, Condition, new_condition, status};
use pko_core::deployment::{condition_types, reasons};
use pko_core::objectset::condition_types as set_conditions;
use pko_core::{ControlledObjectReference, ObjectDeployment, ObjectDeploymentPhase, ObjectSet, Resource};

use crate::revision::Revisions;

/// Recompute the status of `deployment` from `revisions`.
pub fn aggregate(deployment: &mut ObjectDeployment, revisions: &Revisions) {
    let generation = deployment.generation();
    let state = &mut deployment.status;

    map_conditions(&mut state.conditions, revisions.current.as_ref(), generation);

    let previous_available = revisions.previous.iter().any(ObjectSet::is_available);
    let fallback_available = || available_from_previous(previous_available, generation);

    let (available, progressing) = match &revisions.current {
        None => (
            fallback_available(),
            new_condition(
                condition_types::PROGRESSING,
                status::TRUE,
                reasons::PROGRESSING,
                "Progressing to a new ObjectSet.",
                generation,
            ),
        ),
        Some(current) if !current.is_succeeded() => (
            fallback_available(),
            new_condition(
                condition_types::PROGRESSING,
                status::TRUE,
                reasons::LATEST_REVISION_PENDING_SUCCESS,
                pending_success_message(current),
                generation,
            ),
        ),
        Some(current) if current.is_available() => {
            state.controller_of = controlled_objects(revisions);
            (
                new_condition(
                    condition_types::AVAILABLE,
                    status::TRUE,
                    reasons::AVAILABLE,
                    "Latest Revision is Available.",
                    generation,
                ),
                idle(generation),
            )
        }
        Some(_) => (fallback_available(), idle(generation)),
    };
    conditions::set(&mut state.conditions, available);
    conditions::set(&mut state.conditions, progressing);

    let paused = revisions
        .current
        .as_ref()
        .and_then(|current| conditions::find(&current.status.conditions, set_conditions::PAUSED));
    match paused {
        Some(paused) => {
            let mut mirrored = paused.clone();
            mirrored.observed_generation = Some(generation);
            conditions::set(&mut state.conditions, mirrored);
        }
        None => {
            conditions::remove(&mut state.conditions, condition_types::PAUSED);
        }
    }

    state.phase = Some(phase(&state.conditions));
    state.revision = revisions.current.as_ref().map(|current| current.spec.revision);
}

fn available_from_previous(previous_available: bool, generation: i64) -> Condition {
    if previous_available {
        new_condition(
            condition_types::AVAILABLE,
            status::TRUE,
            reasons::AVAILABLE,
            "At least one previous revision is Available.",
            generation,
        )
    } else {
        new_condition(
            condition_types::AVAILABLE,
            status::FALSE,
            reasons::OBJECT_SET_UNREADY,
            "No ObjectSet is available.",
            generation,
        )
    }
}

fn idle(generation: i64) -> Condition {
    new_condition(
        condition_types::PROGRESSING,
        status::FALSE,
        reasons::IDLE,
        "Update concluded.",
        generation,
    )
}

fn pending_success_message(current: &ObjectSet) -> String {
    match conditions::find(&current.status.conditions, set_conditions::AVAILABLE) {
        Some(c) if c.status == status::FALSE => format!("Latest Revision is Unavailable: {}", c.message),
        Some(c) if c.status == status::TRUE => {
            "Latest Revision is Available: pending success delay period".to_string()
        }
        _ => "Latest Revision Status Unknown".to_string(),
    }
}

/// Replace mapped conditions with the ones the current revision reports
/// for its own generation.
fn map_conditions(target: &mut Vec<Condition>, current: Option<&ObjectSet>, generation: i64) {
    target.retain(|c| !conditions::is_mapped(c));
    let Some(current) = current else {
        return;
    };
    let revision_generation = current.generation();
    for condition in &current.status.conditions {
        if conditions::is_mapped(condition) && condition.observed_generation == Some(revision_generation) {
            let mut mapped = condition.clone();
            mapped.observed_generation = Some(generation);
            target.push(mapped);
        }
    }
}

/// Deduplicated union of the objects controlled by every revision.
fn controlled_objects(revisions: &Revisions) -> Vec<ControlledObjectReference> {
    let mut seen = HashSet::new();
    revisions
        .all()
        .flat_map(|r| r.status.controller_of.iter().flatten())
        .filter(|reference| seen.insert(*reference))
        .cloned()
        .collect()
}

fn phase(conditions_list: &[Condition]) -> ObjectDeploymentPhase {
    if conditions::is_true(conditions_list, condition_types::AVAILABLE) {
        ObjectDeploymentPhase::Available
    } else if conditions::is_false(conditions_list, condition_types::AVAILABLE) {
        ObjectDeploymentPhase::NotReady
    } else {
        ObjectDeploymentPhase::Progressing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pko_core::ObjectMeta;

    fn revision(name: &str, revision: i64, conditions_list: &[(&str, &str, &str)]) -> ObjectSet {
        let mut set = ObjectSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                generation: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        set.spec.revision = revision;
        for (type_, value, message) in conditions_list {
            conditions::set(&mut set.status.conditions, new_condition(type_, value, "Test", *message, 1));
        }
        set
    }

    fn deployment() -> ObjectDeployment {
        ObjectDeployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn condition<'a>(deployment: &'a ObjectDeployment, type_: &str) -> &'a Condition {
        conditions::find(&deployment.status.conditions, type_).unwrap()
    }

    #[test]
    fn test_current_available_and_succeeded() {
        let mut current = revision("web-2", 2, &[("Available", "True", ""), ("Succeeded", "True", "")]);
        current.status.controller_of = Some(vec![ControlledObjectReference {
            kind: "ConfigMap".to_string(),
            name: "a".to_string(),
            ..Default::default()
        }]);
        let mut previous = revision("web-1", 1, &[]);
        previous.status.controller_of = current.status.controller_of.clone();

        let mut deploy = deployment();
        aggregate(&mut deploy, &Revisions { previous: vec![previous], current: Some(current) });

        let available = condition(&deploy, "Available");
        assert_eq!(available.status, "True");
        assert_eq!(available.message, "Latest Revision is Available.");
        assert_eq!(available.observed_generation, Some(3));
        let progressing = condition(&deploy, "Progressing");
        assert_eq!((progressing.status.as_str(), progressing.reason.as_str()), ("False", "Idle"));
        assert!(conditions::find(&deploy.status.conditions, "Paused").is_none());

        assert_eq!(deploy.status.controller_of.len(), 1);
        assert_eq!(deploy.status.phase, Some(ObjectDeploymentPhase::Available));
        assert_eq!(deploy.status.revision, Some(2));
    }

    #[test]
    fn test_unavailable_current_with_available_previous() {
        let previous = revision("web-1", 1, &[("Available", "True", "")]);
        let current = revision("web-2", 2, &[("Available", "False", "probe failed")]);

        let mut deploy = deployment();
        aggregate(&mut deploy, &Revisions { previous: vec![previous], current: Some(current) });

        let available = condition(&deploy, "Available");
        assert_eq!(available.status, "True");
        assert_eq!(available.message, "At least one previous revision is Available.");
        let progressing = condition(&deploy, "Progressing");
        assert_eq!(progressing.status, "True");
        assert_eq!(progressing.reason, "LatestRevisionPendingSuccess");
        assert_eq!(progressing.message, "Latest Revision is Unavailable: probe failed");
    }

    #[test]
    fn test_pending_success_messages() {
        let pending = revision("web-1", 1, &[("Available", "True", "")]);
        assert_eq!(
            pending_success_message(&pending),
            "Latest Revision is Available: pending success delay period"
        );
        assert_eq!(pending_success_message(&revision("web-1", 1, &[])), "Latest Revision Status Unknown");
    }

    #[test]
    fn test_no_revisions() {
        let mut deploy = deployment();
        aggregate(&mut deploy, &Revisions::default());

        let available = condition(&deploy, "Available");
        assert_eq!((available.status.as_str(), available.reason.as_str()), ("False", "ObjectSetUnready"));
        assert_eq!(condition(&deploy, "Progressing").message, "Progressing to a new ObjectSet.");
        assert_eq!(deploy.status.phase, Some(ObjectDeploymentPhase::NotReady));
        assert_eq!(deploy.status.revision, None);
    }

    #[test]
    fn test_paused_and_mapped_conditions_are_mirrored() {
        let mut current = revision(
            "web-1",
            1,
            &[("Paused", "True", "paused by parent"), ("acme.io/DatabaseReady", "True", "")],
        );
        let mut stale = new_condition("acme.io/Stale", "True", "Test", "", 0);
        stale.observed_generation = Some(0);
        current.status.conditions.push(stale);

        let mut deploy = deployment();
        deploy
            .status
            .conditions
            .push(new_condition("acme.io/Old", "True", "Test", "", 3));
        aggregate(&mut deploy, &Revisions { previous: Vec::new(), current: Some(current.clone()) });

        assert_eq!(condition(&deploy, "Paused").message, "paused by parent");
        assert_eq!(condition(&deploy, "acme.io/DatabaseReady").observed_generation, Some(3));
        assert!(conditions::find(&deploy.status.conditions, "acme.io/Old").is_none());
        assert!(conditions::find(&deploy.status.conditions, "acme.io/Stale").is_none());

        current.status.conditions.retain(|c| c.type_ != "Paused");
        aggregate(&mut deploy, &Revisions { previous: Vec::new(), current: Some(current) });
        assert!(conditions::find(&deploy.status.conditions, "Paused").is_none());
    }
}
