use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("owner {kind} {name:?} has no uid yet")]
    MissingOwnerUid { kind: String, name: String },
    #[error("object {object:?} is already controlled by {kind} {name:?}")]
    AlreadyOwned {
        object: String,
        kind: String,
        name: String,
    },
    #[error("cross-namespace owner references are disallowed: owner is in {owner_namespace:?}, object is in {object_namespace:?}")]
    CrossNamespace {
        owner_namespace: String,
        object_namespace: String,
    },
}

/// Marks `owner` as the managing controller of the object described by `object`.
///
/// An existing reference to the same owner is refreshed in place. Any other
/// owner references are kept as they are.
pub fn set_controller_reference<K>(owner: &K, object: &mut ObjectMeta) -> Result<(), OwnershipError>
where
    K: Resource<DynamicType = ()>,
{
    let owner_meta = owner.meta();
    let owner_ref = OwnerReference {
        // deleting the owner waits for the object in foreground deletion
        block_owner_deletion: Some(true),
        ..owner
            .controller_owner_ref(&())
            .ok_or_else(|| OwnershipError::MissingOwnerUid {
                kind: K::kind(&()).into_owned(),
                name: owner_meta.name.clone().unwrap_or_default(),
            })?
    };

    // a namespaced owner can only control objects in its own namespace
    if let Some(owner_namespace) = owner_meta.namespace.as_deref() {
        let object_namespace = object.namespace.as_deref().unwrap_or_default();
        if owner_namespace != object_namespace {
            return Err(OwnershipError::CrossNamespace {
                owner_namespace: owner_namespace.into(),
                object_namespace: object_namespace.into(),
            });
        }
    }

    let owner_references = object.owner_references.get_or_insert_with(Default::default);
    if let Some(controller) = owner_references
        .iter()
        .find(|reference| reference.controller == Some(true) && !refers_same(reference, &owner_ref))
    {
        return Err(OwnershipError::AlreadyOwned {
            object: object.name.clone().unwrap_or_default(),
            kind: controller.kind.clone(),
            name: controller.name.clone(),
        });
    }

    match owner_references
        .iter_mut()
        .find(|reference| refers_same(reference, &owner_ref))
    {
        Some(reference) => *reference = owner_ref,
        None => owner_references.push(owner_ref),
    }
    Ok(())
}

fn refers_same(a: &OwnerReference, b: &OwnerReference) -> bool {
    fn group(api_version: &str) -> &str {
        api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default()
    }

    group(&a.api_version) == group(&b.api_version) && a.kind == b.kind && a.name == b.name
}
