//! Status condition helpers
//!
//! Conditions use the upstream `metav1.Condition` shape. [`set`] mirrors the
//! API machinery semantics: the transition time only moves when the status
//! actually flips.

use chrono::Utc;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Condition status values
pub mod status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Build a condition stamped with the current time.
pub fn new_condition(
    type_: &str,
    status: &str,
    reason: &str,
    message: impl Into<String>,
    observed_generation: i64,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: Some(observed_generation),
        last_transition_time: Time(Utc::now()),
    }
}

/// Find a condition by type.
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    has_status(conditions, type_, status::TRUE)
}

pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    has_status(conditions, type_, status::FALSE)
}

fn has_status(conditions: &[Condition], type_: &str, status: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == status)
}

/// True when the condition is `True` and was observed at `generation`.
pub fn is_true_at_generation(conditions: &[Condition], type_: &str, generation: i64) -> bool {
    find(conditions, type_)
        .is_some_and(|c| c.status == status::TRUE && c.observed_generation == Some(generation))
}

/// Insert or update a condition, keyed by type.
///
/// Returns true when anything changed.
pub fn set(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    let mut changed = false;
    if existing.status != condition.status {
        existing.status = condition.status;
        existing.last_transition_time = condition.last_transition_time;
        changed = true;
    }
    if existing.reason != condition.reason {
        existing.reason = condition.reason;
        changed = true;
    }
    if existing.message != condition.message {
        existing.message = condition.message;
        changed = true;
    }
    if existing.observed_generation != condition.observed_generation {
        existing.observed_generation = condition.observed_generation;
        changed = true;
    }
    changed
}

/// Remove a condition by type. Returns true when one was removed.
pub fn remove(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    before != conditions.len()
}

/// Mapped conditions carry a domain prefix, e.g. `my-org.io/DatabaseReady`.
pub fn is_mapped(condition: &Condition) -> bool {
    condition.type_.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_appends_new_condition() {
        let mut conditions = Vec::new();
        assert!(set(
            &mut conditions,
            new_condition("Available", status::TRUE, "Available", "ok", 1)
        ));
        assert_eq!(conditions.len(), 1);
        assert!(is_true(&conditions, "Available"));
    }

    #[test]
    fn test_set_keeps_transition_time_when_status_unchanged() {
        let mut conditions = vec![new_condition("Available", status::TRUE, "A", "first", 1)];
        let original_time = conditions[0].last_transition_time.clone();

        let mut update = new_condition("Available", status::TRUE, "B", "second", 2);
        update.last_transition_time = Time(Utc::now() + chrono::Duration::seconds(60));
        assert!(set(&mut conditions, update));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "B");
        assert_eq!(conditions[0].observed_generation, Some(2));
        assert_eq!(conditions[0].last_transition_time, original_time);
    }

    #[test]
    fn test_set_moves_transition_time_on_flip() {
        let mut conditions = vec![new_condition("Available", status::TRUE, "A", "", 1)];
        let mut update = new_condition("Available", status::FALSE, "A", "", 1);
        let later = Time(Utc::now() + chrono::Duration::seconds(60));
        update.last_transition_time = later.clone();
        set(&mut conditions, update);
        assert_eq!(conditions[0].last_transition_time, later);
        assert!(is_false(&conditions, "Available"));
    }

    #[test]
    fn test_set_reports_no_change() {
        let condition = new_condition("Paused", status::TRUE, "Paused", "", 3);
        let mut conditions = vec![condition.clone()];
        assert!(!set(&mut conditions, condition));
    }

    #[test]
    fn test_is_true_at_generation() {
        let conditions = vec![new_condition("Available", status::TRUE, "Available", "", 4)];
        assert!(is_true_at_generation(&conditions, "Available", 4));
        assert!(!is_true_at_generation(&conditions, "Available", 5));
        assert!(!is_true_at_generation(&conditions, "Succeeded", 4));
    }

    #[test]
    fn test_remove() {
        let mut conditions = vec![
            new_condition("Available", status::TRUE, "Available", "", 1),
            new_condition("Paused", status::TRUE, "Paused", "", 1),
        ];
        assert!(remove(&mut conditions, "Paused"));
        assert!(!remove(&mut conditions, "Paused"));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_is_mapped() {
        assert!(is_mapped(&new_condition("acme.io/Ready", status::TRUE, "R", "", 1)));
        assert!(!is_mapped(&new_condition("Available", status::TRUE, "R", "", 1)));
    }
}
