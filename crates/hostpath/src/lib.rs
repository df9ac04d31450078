use std::{marker::PhantomData, path::PathBuf};

use nix::unistd::{Gid, Group, Uid, User};
use serde::Deserialize;

pub mod error;
pub mod provisioner;
pub mod quantity;
pub mod store;
pub mod types;

pub use error::{Error, ErrorKind, ValidationError};
pub use provisioner::{HostPathProvisioner, Provisioner};
pub use quantity::Capacity;
pub use store::LocalPathStore;
pub use types::{
    AccessMode, NamingScheme, ProvisioningState, ReclaimPolicy, VolumeId, VolumeRecord,
    VolumeRequest, VolumeSource,
};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Name that `StorageClass.provisioner` has to match for a claim to be handled
    #[serde(default = "default_provisioner_name")]
    pub provisioner_name: String,

    /// Directory under which every volume directory is created
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Permissions of created volume directories, e.g. `"0755"`
    #[serde(
        default = "default_dir_mode",
        deserialize_with = "deserialize_mode_from_octal"
    )]
    pub dir_mode: u32,

    #[serde(default)]
    pub naming: NamingScheme,

    /// The optional user / group pair that should own volume directories
    #[serde(default)]
    pub owner: Option<Owner>,

    /// Delay before a failed, retryable request is attempted again
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provisioner_name: default_provisioner_name(),
            base_path: default_base_path(),
            dir_mode: default_dir_mode(),
            naming: NamingScheme::default(),
            owner: None,
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

fn default_provisioner_name() -> String {
    "custom-provisioner".into()
}

fn default_base_path() -> PathBuf {
    "/tmp/dynamic-volumes".into()
}

fn default_dir_mode() -> u32 {
    0o755
}

fn default_retry_interval_secs() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Owner {
    #[serde(deserialize_with = "deserialize_account")]
    user: User,

    #[serde(deserialize_with = "deserialize_account")]
    group: Group,
}

impl Owner {
    pub fn get_owner_pair(&self) -> (Uid, Gid) {
        (self.user.uid, self.group.gid)
    }
}

fn deserialize_mode_from_octal<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    struct ModeVisitor;

    impl<'de> serde::de::Visitor<'de> for ModeVisitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an octal permission string such as \"0755\"")
        }

        fn visit_str<E>(self, mode: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let digits = mode.strip_prefix("0o").unwrap_or(mode);
            let parsed = u32::from_str_radix(digits, 8)
                .map_err(|err| E::custom(format!("invalid mode `{}`: {}", mode, err)))?;

            self.visit_u64(parsed.into())
        }

        fn visit_u64<E>(self, mode: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u32::try_from(mode)
                .ok()
                .filter(|mode| *mode <= 0o7777)
                .ok_or(E::custom(format!("mode {:o} is out of range", mode)))
        }

        fn visit_i64<E>(self, mode: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            u64::try_from(mode)
                .map_err(|_| E::custom("mode cannot be negative"))
                .and_then(|mode| self.visit_u64(mode))
        }
    }

    deserializer.deserialize_any(ModeVisitor)
}

/// A host account that volume directories can be handed to
trait Account: Sized {
    const KIND: &'static str;

    fn lookup(name: &str) -> nix::Result<Option<Self>>;
}

impl Account for User {
    const KIND: &'static str = "user";

    fn lookup(name: &str) -> nix::Result<Option<Self>> {
        User::from_name(name)
    }
}

impl Account for Group {
    const KIND: &'static str = "group";

    fn lookup(name: &str) -> nix::Result<Option<Self>> {
        Group::from_name(name)
    }
}

fn deserialize_account<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::de::Deserializer<'de>,
    T: Account,
{
    struct AccountVisitor<T>(PhantomData<T>);

    impl<'de, T: Account> serde::de::Visitor<'de> for AccountVisitor<T> {
        type Value = T;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "the name of a {} on this host", T::KIND)
        }

        fn visit_str<E>(self, name: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            T::lookup(name)
                .map_err(|err| {
                    E::custom(format!(
                        "could not look up volume owner {} `{}`: {}",
                        T::KIND,
                        name,
                        err
                    ))
                })?
                .ok_or_else(|| {
                    E::custom(format!(
                        "volume owner {} `{}` does not exist on this host",
                        T::KIND,
                        name
                    ))
                })
        }
    }

    deserializer.deserialize_str(AccountVisitor(PhantomData))
}
