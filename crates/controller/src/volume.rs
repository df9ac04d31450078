//! Mapping between [VolumeRecord]s and PersistentVolume objects.

use std::collections::{BTreeMap, BTreeSet};

use hostpath::{AccessMode, Capacity, ReclaimPolicy, VolumeRecord, VolumeSource};
use k8s_openapi::{
    api::core::v1::{
        HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use kube::{Resource, ResourceExt};

use crate::error::Error;

/// Records which provisioner is responsible for deleting a volume
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Ties a volume to the claim it was provisioned for, surviving claim deletion
pub const CLAIM_UID_LABEL: &str = "hostpath.provisioner/claim-uid";

/// Render a provisioned volume as a PersistentVolume pre-bound to its claim.
pub fn persistent_volume(
    record: &VolumeRecord,
    claim: &PersistentVolumeClaim,
    storage_class: &str,
    provisioner_name: &str,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(record.name.to_string()),
            annotations: Some(BTreeMap::from([(
                PROVISIONED_BY_ANNOTATION.to_string(),
                provisioner_name.to_string(),
            )])),
            labels: claim
                .uid()
                .map(|uid| BTreeMap::from([(CLAIM_UID_LABEL.to_string(), uid)])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(record.capacity.to_string()),
            )])),
            access_modes: Some(
                record
                    .access_modes
                    .iter()
                    .map(|mode| mode.as_str().to_string())
                    .collect(),
            ),
            persistent_volume_reclaim_policy: Some(record.reclaim_policy.as_str().to_string()),
            storage_class_name: Some(storage_class.to_string()),
            claim_ref: Some(claim.object_ref(&())),
            host_path: record
                .source
                .host_path()
                .map(|path| HostPathVolumeSource {
                    path: path.to_string_lossy().into_owned(),
                    type_: Some("Directory".into()),
                }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read a PersistentVolume back into a [VolumeRecord].
///
/// Access modes this crate does not know about are dropped rather than
/// failing, since deletion never looks at them.
pub fn volume_record(volume: &PersistentVolume) -> Result<VolumeRecord, Error> {
    let name = volume.name_any();
    let malformed = |reason: String| Error::MalformedVolume {
        name: name.clone(),
        reason,
    };

    let spec = volume
        .spec
        .as_ref()
        .ok_or_else(|| malformed("missing spec".into()))?;

    let capacity = spec
        .capacity
        .as_ref()
        .and_then(|capacity| capacity.get("storage"))
        .ok_or_else(|| malformed("missing storage capacity".into()))?
        .0
        .parse::<Capacity>()
        .map_err(|err| malformed(err.to_string()))?;

    let access_modes: BTreeSet<AccessMode> = spec
        .access_modes
        .iter()
        .flatten()
        .filter_map(|mode| match mode.parse::<AccessMode>() {
            Ok(mode) => Some(mode),
            Err(err) => {
                log::warn!("ignoring access mode of volume `{}`: {}", name, err);
                None
            }
        })
        .collect();

    // Anything but an explicit `Delete` keeps the data around
    let reclaim_policy = match spec.persistent_volume_reclaim_policy.as_deref() {
        Some("Delete") => ReclaimPolicy::Delete,
        _ => ReclaimPolicy::Retain,
    };

    let source = match &spec.host_path {
        Some(host_path) => VolumeSource::HostPath {
            path: host_path.path.clone().into(),
        },
        None => VolumeSource::Other {
            kind: source_kind(spec).into(),
        },
    };

    Ok(VolumeRecord {
        name: name.into(),
        capacity,
        access_modes,
        reclaim_policy,
        source,
    })
}

/// Name of the volume source set on a non host path volume
fn source_kind(spec: &PersistentVolumeSpec) -> &'static str {
    if spec.csi.is_some() {
        "csi"
    } else if spec.local.is_some() {
        "local"
    } else if spec.nfs.is_some() {
        "nfs"
    } else if spec.iscsi.is_some() {
        "iscsi"
    } else {
        "unknown"
    }
}

/// Whether `provisioner_name` created this volume
pub fn provisioned_by(volume: &PersistentVolume, provisioner_name: &str) -> bool {
    volume
        .annotations()
        .get(PROVISIONED_BY_ANNOTATION)
        .is_some_and(|name| name == provisioner_name)
}

/// Whether the volume's claim is gone and its reclaim policy asks for deletion
pub fn is_released_for_deletion(volume: &PersistentVolume) -> bool {
    let released = volume
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Released");

    let delete = volume
        .spec
        .as_ref()
        .and_then(|spec| spec.persistent_volume_reclaim_policy.as_deref())
        == Some("Delete");

    released && delete
}
