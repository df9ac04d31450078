use std::{collections::BTreeSet, fmt, path::PathBuf, str::FromStr};

use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ValidationError, quantity::Capacity};

/// Namespace for the v5 UUIDs used by [NamingScheme::Hashed]
const VOLUME_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_6361_6c2d_7061_7468_2d76_6f6c_756d);

/// Permitted mount semantics for a volume.
///
/// See [K8s access mode docs](https://kubernetes.io/docs/concepts/storage/persistent-volumes/#access-modes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWriteOnce => "ReadWriteOnce",
            Self::ReadOnlyMany => "ReadOnlyMany",
            Self::ReadWriteMany => "ReadWriteMany",
            Self::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

impl FromStr for AccessMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReadWriteOnce" => Ok(Self::ReadWriteOnce),
            "ReadOnlyMany" => Ok(Self::ReadOnlyMany),
            "ReadWriteMany" => Ok(Self::ReadWriteMany),
            "ReadWriteOncePod" => Ok(Self::ReadWriteOncePod),
            other => Err(ValidationError::UnknownAccessMode(other.to_owned())),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a claim's namespace and name are turned into a volume name.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NamingScheme {
    /// `pv-<namespace>-<name>`. Readable, but `("a-b", "c")` and `("a", "b-c")`
    /// map to the same volume.
    #[default]
    Concatenate,

    /// `pv-<uuid>`, a v5 UUID of `<namespace>/<name>`.
    Hashed,
}

/// Unique name of a provisioned volume, also used as its directory name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VolumeId(String);

impl VolumeId {
    /// Deterministically derive the volume name for a claim
    pub fn for_claim(namespace: &str, name: &str, scheme: NamingScheme) -> Self {
        match scheme {
            NamingScheme::Concatenate => Self(format!("pv-{}-{}", namespace, name)),
            NamingScheme::Hashed => {
                // Neither half may contain a `/`, so the joined key is unambiguous
                let key = format!("{}/{}", namespace, name);
                Self(format!("pv-{}", Uuid::new_v5(&VOLUME_NAMESPACE, key.as_bytes())))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for VolumeId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// A claim asking for a volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeRequest {
    pub namespace: String,
    pub name: String,

    /// Requested size, `None` when the claim did not ask for storage at all
    pub capacity: Option<Capacity>,

    pub access_modes: BTreeSet<AccessMode>,
}

impl VolumeRequest {
    /// Check the request invariants, returning the validated capacity.
    pub fn validate(&self) -> Result<&Capacity, ValidationError> {
        ensure_path_component("namespace", &self.namespace)?;
        ensure_path_component("name", &self.name)?;

        let capacity = self
            .capacity
            .as_ref()
            .ok_or(ValidationError::MissingCapacity)?;
        if capacity.is_zero() {
            return Err(ValidationError::ZeroCapacity);
        }

        if self.access_modes.is_empty() {
            return Err(ValidationError::NoAccessModes);
        }

        Ok(capacity)
    }
}

/// Claim names end up inside a directory name, so they must not be able to
/// escape the base directory.
fn ensure_path_component(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let unusable = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(|c| c == '/' || c == '\0');

    if unusable {
        return Err(ValidationError::InvalidClaimName {
            field,
            value: value.to_owned(),
        });
    }

    Ok(())
}

/// Rule governing what happens to a volume once its claim is released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "Delete",
            Self::Retain => "Retain",
        }
    }
}

/// What backs a volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VolumeSource {
    /// A directory on the local filesystem, the only kind this crate manages
    HostPath { path: PathBuf },

    /// Anything else (`nfs`, `csi`, ...), identified by its kind only
    Other { kind: String },
}

impl VolumeSource {
    pub fn host_path(&self) -> Option<&PathBuf> {
        match self {
            Self::HostPath { path } => Some(path),
            Self::Other { .. } => None,
        }
    }
}

/// A provisioned volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: VolumeId,
    pub capacity: Capacity,
    pub access_modes: BTreeSet<AccessMode>,
    pub reclaim_policy: ReclaimPolicy,
    pub source: VolumeSource,
}

/// Tells the caller whether a provision call is done or has to be repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningState {
    Finished,
    InBackground,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(namespace: &str, name: &str) -> VolumeRequest {
        VolumeRequest {
            namespace: namespace.into(),
            name: name.into(),
            capacity: Some("1Gi".parse().unwrap()),
            access_modes: BTreeSet::from([AccessMode::ReadWriteOnce]),
        }
    }

    #[test]
    fn access_modes_parse_and_print() {
        for mode in [
            AccessMode::ReadWriteOnce,
            AccessMode::ReadOnlyMany,
            AccessMode::ReadWriteMany,
            AccessMode::ReadWriteOncePod,
        ] {
            assert_eq!(mode.as_str().parse::<AccessMode>(), Ok(mode));
        }

        assert_eq!(
            "WriteSometimes".parse::<AccessMode>(),
            Err(ValidationError::UnknownAccessMode("WriteSometimes".into()))
        );
    }

    #[test]
    fn concatenated_names() {
        let id = VolumeId::for_claim("system", "custom-pvc", NamingScheme::Concatenate);
        assert_eq!(id.as_str(), "pv-system-custom-pvc");

        // The ambiguity the hashed scheme exists for
        assert_eq!(
            VolumeId::for_claim("a-b", "c", NamingScheme::Concatenate),
            VolumeId::for_claim("a", "b-c", NamingScheme::Concatenate),
        );
    }

    #[test]
    fn hashed_names_are_stable_and_distinct() {
        let first = VolumeId::for_claim("a-b", "c", NamingScheme::Hashed);
        let second = VolumeId::for_claim("a", "b-c", NamingScheme::Hashed);

        assert_ne!(first, second);
        assert_eq!(first, VolumeId::for_claim("a-b", "c", NamingScheme::Hashed));
        assert!(first.as_str().starts_with("pv-"));
        assert_eq!(first.as_str().len(), "pv-".len() + 36);
    }

    #[test]
    fn validate_checks_every_invariant() {
        assert!(request("system", "custom-pvc").validate().is_ok());

        let mut missing = request("system", "custom-pvc");
        missing.capacity = None;
        assert_eq!(missing.validate(), Err(ValidationError::MissingCapacity));

        let mut zero = request("system", "custom-pvc");
        zero.capacity = Some("0".parse().unwrap());
        assert_eq!(zero.validate(), Err(ValidationError::ZeroCapacity));

        let mut no_modes = request("system", "custom-pvc");
        no_modes.access_modes.clear();
        assert_eq!(no_modes.validate(), Err(ValidationError::NoAccessModes));
    }

    #[test]
    fn validate_rejects_path_like_names() {
        for (namespace, name) in [("", "x"), ("system", ".."), ("a/b", "x"), ("system", "x/../../etc")] {
            assert!(
                matches!(
                    request(namespace, name).validate(),
                    Err(ValidationError::InvalidClaimName { .. })
                ),
                "{namespace}/{name}"
            );
        }
    }
}
