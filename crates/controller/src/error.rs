use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Provision(#[from] hostpath::Error),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("provisioner task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("malformed PersistentVolume `{name}`: {reason}")]
    MalformedVolume { name: String, reason: String },
}

impl Error {
    /// Whether the object has to change before another attempt can succeed
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Provision(err) => err.is_permanent(),
            Self::MalformedVolume { .. } => true,
            Self::Kube(_) | Self::Join(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_and_api_failures_are_retried() {
        let validation: Error =
            hostpath::Error::from(hostpath::ValidationError::NoAccessModes).into();
        assert!(validation.is_permanent());

        let conflict: Error = hostpath::Error::Conflict {
            name: "pv-system-custom-pvc".into(),
            path: "/tmp/dynamic-volumes/pv-system-custom-pvc".into(),
        }
        .into();
        assert!(conflict.is_permanent());

        let malformed = Error::MalformedVolume {
            name: "pv-x".into(),
            reason: "missing spec".into(),
        };
        assert!(malformed.is_permanent());

        let api: Error = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "etcdserver: request timed out".into(),
            reason: "InternalError".into(),
            code: 500,
        })
        .into();
        assert!(!api.is_permanent());
    }
}
