//! The provision / delete lifecycle of a single volume.

use std::io;

use crate::{
    error::Error,
    store::LocalPathStore,
    types::{
        NamingScheme, ProvisioningState, ReclaimPolicy, VolumeId, VolumeRecord, VolumeRequest,
        VolumeSource,
    },
    Config,
};

/// Creates and destroys the storage behind volumes.
///
/// Callers are expected to serialize calls per volume; implementations hold
/// no locks. Both operations block on I/O.
pub trait Provisioner: Send + Sync {
    /// Create the storage for a claim.
    ///
    /// Calling this twice for the same claim fails with
    /// [Error::Conflict] instead of handing out the existing storage.
    fn provision(
        &self,
        request: &VolumeRequest,
    ) -> Result<(VolumeRecord, ProvisioningState), Error>;

    /// Destroy the storage behind a volume.
    ///
    /// Volumes this provisioner does not manage, or whose storage is already
    /// gone, are left alone and reported as deleted.
    fn delete(&self, record: &VolumeRecord) -> Result<(), Error>;
}

/// Backs every volume with a directory below a base path.
#[derive(Clone, Debug)]
pub struct HostPathProvisioner {
    store: LocalPathStore,
    naming: NamingScheme,
}

impl HostPathProvisioner {
    pub fn new(store: LocalPathStore, naming: NamingScheme) -> Self {
        Self { store, naming }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LocalPathStore::new(&config.base_path, config.dir_mode, config.owner.clone()),
            config.naming,
        )
    }

    pub fn store(&self) -> &LocalPathStore {
        &self.store
    }
}

impl Provisioner for HostPathProvisioner {
    fn provision(
        &self,
        request: &VolumeRequest,
    ) -> Result<(VolumeRecord, ProvisioningState), Error> {
        let capacity = request.validate()?;

        let name = VolumeId::for_claim(&request.namespace, &request.name, self.naming);
        let path = self.store.path_for(&name);

        let conflict = || Error::Conflict {
            name: name.to_string(),
            path: path.clone(),
        };

        // Never adopt a directory left over from an earlier volume
        if self
            .store
            .exists(&path)
            .map_err(|err| Error::io("inspect", &path, err))?
        {
            return Err(conflict());
        }

        self.store.create(&path).map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => conflict(),
            _ => Error::io("create", &path, err),
        })?;

        log::info!(
            "successfully provisioned volume {} for claim {}/{} at `{}`",
            name,
            request.namespace,
            request.name,
            path.to_string_lossy(),
        );

        let record = VolumeRecord {
            name,
            capacity: capacity.clone(),
            access_modes: request.access_modes.clone(),
            reclaim_policy: ReclaimPolicy::Delete,
            source: VolumeSource::HostPath { path },
        };

        Ok((record, ProvisioningState::Finished))
    }

    fn delete(&self, record: &VolumeRecord) -> Result<(), Error> {
        let path = match &record.source {
            VolumeSource::HostPath { path } => path,
            VolumeSource::Other { kind } => {
                log::info!(
                    "volume {} is a {} volume, not a host path volume, skipping deletion",
                    record.name,
                    kind,
                );
                return Ok(());
            }
        };

        if !self
            .store
            .exists(path)
            .map_err(|err| Error::io("inspect", path, err))?
        {
            log::info!(
                "volume path `{}` does not exist, nothing to delete",
                path.to_string_lossy()
            );
            return Ok(());
        }

        log::info!(
            "deleting volume {} at `{}`",
            record.name,
            path.to_string_lossy()
        );

        if let Err(err) = self.store.remove(path) {
            log::error!(
                "failed to delete volume {} at `{}`: {}",
                record.name,
                path.to_string_lossy(),
                err
            );
            return Err(Error::io("remove", path, err));
        }

        log::info!(
            "successfully deleted volume {} at `{}`",
            record.name,
            path.to_string_lossy()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, fs};

    use tempfile::TempDir;

    use super::*;
    use crate::{types::AccessMode, ErrorKind, ValidationError};

    fn provisioner(dir: &TempDir) -> HostPathProvisioner {
        HostPathProvisioner::new(
            LocalPathStore::new(dir.path(), 0o755, None),
            NamingScheme::Concatenate,
        )
    }

    fn request(capacity: Option<&str>, modes: &[AccessMode]) -> VolumeRequest {
        VolumeRequest {
            namespace: "system".into(),
            name: "custom-pvc".into(),
            capacity: capacity.map(|quantity| quantity.parse().unwrap()),
            access_modes: modes.iter().copied().collect(),
        }
    }

    fn entries(dir: &TempDir) -> usize {
        fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn zero_or_missing_capacity_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);

        for capacity in [None, Some("0"), Some("0Gi")] {
            let err = provisioner
                .provision(&request(capacity, &[AccessMode::ReadWriteOnce]))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{capacity:?}");
        }

        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn empty_access_modes_are_rejected() {
        let dir = TempDir::new().unwrap();

        let err = provisioner(&dir)
            .provision(&request(Some("1Gi"), &[]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoAccessModes)
        ));
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn second_provision_for_the_same_claim_conflicts() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);
        let request = request(Some("1Gi"), &[AccessMode::ReadWriteOnce]);

        let (record, _) = provisioner.provision(&request).unwrap();
        fs::write(dir.path().join("pv-system-custom-pvc/data"), b"keep me").unwrap();

        let err = provisioner.provision(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // The existing volume was not touched
        let path = record.source.host_path().unwrap();
        assert_eq!(fs::read(path.join("data")).unwrap(), b"keep me");
    }

    #[test]
    fn records_copy_the_request() {
        let dir = TempDir::new().unwrap();
        let modes = [AccessMode::ReadOnlyMany, AccessMode::ReadWriteOnce];

        let (record, state) = provisioner(&dir)
            .provision(&request(Some("5Gi"), &modes))
            .unwrap();

        assert_eq!(state, ProvisioningState::Finished);
        assert_eq!(record.capacity.as_str(), "5Gi");
        assert_eq!(record.access_modes, BTreeSet::from(modes));
        assert_eq!(record.reclaim_policy, ReclaimPolicy::Delete);
    }

    #[test]
    fn hashed_names_land_in_the_base_directory() {
        let dir = TempDir::new().unwrap();
        let provisioner = HostPathProvisioner::new(
            LocalPathStore::new(dir.path(), 0o755, None),
            NamingScheme::Hashed,
        );

        let (record, _) = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap();

        let path = record.source.host_path().unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.file_name().unwrap(), record.name.as_str());
        assert!(path.is_dir());
    }

    #[test]
    fn delete_ignores_foreign_volumes() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);

        let (mut record, _) = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap();
        let path = record.source.host_path().unwrap().clone();

        record.source = VolumeSource::Other { kind: "nfs".into() };
        provisioner.delete(&record).unwrap();

        assert!(path.is_dir());
    }

    #[test]
    fn delete_of_a_missing_path_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);

        let (record, _) = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap();

        provisioner.delete(&record).unwrap();
        provisioner.delete(&record).unwrap();
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn provisioning_below_a_regular_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("volumes");
        fs::write(&blocker, b"").unwrap();

        let provisioner = HostPathProvisioner::new(
            LocalPathStore::new(&blocker, 0o755, None),
            NamingScheme::Concatenate,
        );
        let err = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.is_permanent());
        assert!(blocker.is_file());
    }

    #[test]
    fn delete_failures_keep_the_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let (mut record, _) = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap();
        let path = blocker.join("pv-system-custom-pvc");
        record.source = VolumeSource::HostPath { path: path.clone() };

        let err = provisioner.delete(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);

        let Error::Io {
            path: failed,
            source,
            ..
        } = err
        else {
            panic!("expected an io error");
        };
        assert_eq!(failed, path);
        assert_eq!(
            source.raw_os_error(),
            Some(nix::errno::Errno::ENOTDIR as i32)
        );
    }

    #[test]
    fn delete_removes_file_backed_volumes() {
        let dir = TempDir::new().unwrap();
        let provisioner = provisioner(&dir);

        let (record, _) = provisioner
            .provision(&request(Some("1Gi"), &[AccessMode::ReadWriteOnce]))
            .unwrap();
        let path = record.source.host_path().unwrap();
        fs::remove_dir(path).unwrap();
        fs::write(path, b"replaced by a file").unwrap();

        provisioner.delete(&record).unwrap();
        assert_eq!(entries(&dir), 0);
    }
}
