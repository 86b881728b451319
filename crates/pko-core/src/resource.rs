//! Scope-generic access to orchestrator resources
//!
//! Every entity exists in a namespaced and a cluster-scoped flavour
//! (`Package` / `ClusterPackage`, `ObjectSet` / `ClusterObjectSet`, ...).
//! A single Rust type backs both; the [`Scope`] of an instance is derived
//! from whether it carries a namespace, and only the cluster adapter turns a
//! scope into a concrete kind.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// API group of all orchestrator resources
pub const API_GROUP: &str = "package-operator.run";
/// API version of all orchestrator resources
pub const API_VERSION: &str = "v1alpha1";

/// `group/version` string
pub fn api_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}

/// Namespaced or cluster-scoped flavour of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl Scope {
    pub fn of_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Scope::Namespaced,
            _ => Scope::Cluster,
        }
    }

    pub fn of(meta: &ObjectMeta) -> Self {
        Self::of_namespace(meta.namespace.as_deref())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Namespaced => write!(f, "Namespaced"),
            Scope::Cluster => write!(f, "Cluster"),
        }
    }
}

/// Namespace (when namespaced) and name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::of_namespace(self.namespace.as_deref())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An orchestrator resource with a namespaced and a cluster-scoped kind.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Kind of the namespaced flavour
    const NAMESPACED_KIND: &'static str;
    /// Kind of the cluster-scoped flavour
    const CLUSTER_KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn kind(scope: Scope) -> &'static str {
        match scope {
            Scope::Namespaced => Self::NAMESPACED_KIND,
            Scope::Cluster => Self::CLUSTER_KIND,
        }
    }

    /// Lower-case plural used in API paths
    fn plural(scope: Scope) -> String {
        format!("{}s", Self::kind(scope).to_lowercase())
    }

    fn scope(&self) -> Scope {
        Scope::of(self.meta())
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or(0)
    }

    fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }
}

/// Build a controller owner reference pointing at `owner`.
pub fn controller_reference<R: Resource>(owner: &R) -> OwnerReference {
    OwnerReference {
        api_version: api_version(),
        kind: R::kind(owner.scope()).to_string(),
        name: owner.name().to_string(),
        uid: owner.uid().unwrap_or_default().to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Set `owner` as the controller of `meta`, replacing any previous controller.
pub fn set_controller_reference<R: Resource>(meta: &mut ObjectMeta, owner: &R) {
    let reference = controller_reference(owner);
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true) && r.uid != reference.uid);
    refs.push(reference);
}

/// The controller owner reference of `meta`, if any.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// True when `owner` is the controller of `meta`.
pub fn is_controlled_by<R: Resource>(meta: &ObjectMeta, owner: &R) -> bool {
    let Some(controller) = controller_of(meta) else {
        return false;
    };
    if controller.kind != R::kind(owner.scope()) || controller.name != owner.name() {
        return false;
    }
    match owner.uid() {
        Some(uid) if !controller.uid.is_empty() => controller.uid == uid,
        _ => true,
    }
}

/// Label value lookup that tolerates absent label maps.
pub fn label<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.labels.as_ref()?.get(key).map(String::as_str)
}

/// Annotation value lookup that tolerates absent annotation maps.
pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations.as_ref()?.get(key).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        metadata: ObjectMeta,
    }

    impl Resource for Widget {
        const NAMESPACED_KIND: &'static str = "Widget";
        const CLUSTER_KIND: &'static str = "ClusterWidget";

        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    fn widget(namespace: Option<&str>, name: &str, uid: &str) -> Widget {
        Widget {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(str::to_string),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_scope_from_namespace() {
        assert_eq!(Scope::of_namespace(Some("default")), Scope::Namespaced);
        assert_eq!(Scope::of_namespace(Some("")), Scope::Cluster);
        assert_eq!(Scope::of_namespace(None), Scope::Cluster);
    }

    #[test]
    fn test_kind_and_plural_per_scope() {
        assert_eq!(Widget::kind(Scope::Namespaced), "Widget");
        assert_eq!(Widget::kind(Scope::Cluster), "ClusterWidget");
        assert_eq!(Widget::plural(Scope::Cluster), "clusterwidgets");
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new(Some("ns"), "a").to_string(), "ns/a");
        assert_eq!(ObjectKey::new(None, "a").to_string(), "a");
        assert_eq!(ObjectKey::new(Some(""), "a").scope(), Scope::Cluster);
    }

    #[test]
    fn test_controller_reference_roundtrip() {
        let owner = widget(Some("ns"), "owner", "uid-1");
        let mut meta = ObjectMeta::default();
        set_controller_reference(&mut meta, &owner);

        let controller = controller_of(&meta).unwrap();
        assert_eq!(controller.kind, "Widget");
        assert_eq!(controller.api_version, "package-operator.run/v1alpha1");
        assert!(is_controlled_by(&meta, &owner));

        let other = widget(Some("ns"), "owner", "uid-2");
        assert!(!is_controlled_by(&meta, &other));
    }

    #[test]
    fn test_set_controller_reference_replaces_previous_controller() {
        let first = widget(None, "first", "uid-1");
        let second = widget(None, "second", "uid-2");
        let mut meta = ObjectMeta::default();
        set_controller_reference(&mut meta, &first);
        set_controller_reference(&mut meta, &second);

        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);
        assert!(is_controlled_by(&meta, &second));
        assert!(!is_controlled_by(&meta, &first));
    }
}
