//! Reading volume requests out of PersistentVolumeClaims.

use std::collections::BTreeSet;

use hostpath::{AccessMode, Capacity, ValidationError, VolumeRequest};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

/// Pre-`storageClassName` way of selecting a class, still honoured by the
/// API server and taking precedence over the spec field.
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// The StorageClass a claim asks for, if any.
pub fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .annotations()
        .get(BETA_STORAGE_CLASS_ANNOTATION)
        .map(String::as_str)
        .or_else(|| {
            claim
                .spec
                .as_ref()
                .and_then(|spec| spec.storage_class_name.as_deref())
        })
        .filter(|name| !name.is_empty())
}

/// Whether the claim is still waiting for a volume
pub fn needs_volume(claim: &PersistentVolumeClaim) -> bool {
    if claim.metadata.deletion_timestamp.is_some() {
        return false;
    }

    let bound = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .is_some_and(|name| !name.is_empty());

    let pending = claim
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map_or(true, |phase| phase == "Pending");

    !bound && pending
}

/// Translate a claim into a [VolumeRequest].
///
/// Only the syntax of the claim is checked here; the request invariants
/// are enforced by the provisioner itself.
pub fn volume_request(claim: &PersistentVolumeClaim) -> Result<VolumeRequest, ValidationError> {
    let spec = claim.spec.as_ref();

    let capacity = spec
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .map(|quantity| quantity.0.parse::<Capacity>())
        .transpose()?;

    let access_modes = spec
        .and_then(|spec| spec.access_modes.as_ref())
        .into_iter()
        .flatten()
        .map(|mode| mode.parse::<AccessMode>())
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(VolumeRequest {
        namespace: claim.namespace().unwrap_or_default(),
        name: claim.name_any(),
        capacity,
        access_modes,
    })
}
