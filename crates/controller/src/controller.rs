//! Drives the [Provisioner] from PersistentVolumeClaim and PersistentVolume
//! events.
//!
//! Watching, queueing and backoff are handled by [kube::runtime::Controller],
//! which also guarantees that a single object is never reconciled twice at
//! the same time.

use std::{future::Future, sync::Arc, time::Duration};

use futures_util::{future, StreamExt};
use hostpath::{Config, Provisioner, ProvisioningState};
use k8s_openapi::api::{
    core::v1::{PersistentVolume, PersistentVolumeClaim},
    storage::v1::StorageClass,
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, Resource, ResourceExt,
};
use tokio::sync::watch;

use crate::{
    claim,
    error::Error,
    volume::{self, CLAIM_UID_LABEL},
};

/// Everything the reconcilers need, handed to them on every call
pub struct Context {
    client: Client,
    provisioner: Arc<dyn Provisioner>,
    config: Config,
}

impl Context {
    pub fn new(client: Client, provisioner: Arc<dyn Provisioner>, config: Config) -> Self {
        Self {
            client,
            provisioner,
            config,
        }
    }

    fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.config.retry_interval_secs)
    }

    async fn provision(
        &self,
        request: hostpath::VolumeRequest,
    ) -> Result<(hostpath::VolumeRecord, ProvisioningState), Error> {
        let provisioner = self.provisioner.clone();
        Ok(tokio::task::spawn_blocking(move || provisioner.provision(&request)).await??)
    }

    async fn delete(&self, record: hostpath::VolumeRecord) -> Result<(), Error> {
        let provisioner = self.provisioner.clone();
        Ok(tokio::task::spawn_blocking(move || provisioner.delete(&record)).await??)
    }
}

/// Provision a volume for a claim of one of our StorageClasses.
pub async fn reconcile_claim(
    pvc: Arc<PersistentVolumeClaim>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if !claim::needs_volume(&pvc) {
        return Ok(Action::await_change());
    }

    let Some(class_name) = claim::storage_class_name(&pvc) else {
        return Ok(Action::await_change());
    };

    // The class may simply not have been created yet
    let classes: Api<StorageClass> = Api::all(ctx.client.clone());
    let Some(class) = classes.get_opt(class_name).await? else {
        log::debug!(
            "storage class `{}` of claim {}/{} not found",
            class_name,
            pvc.namespace().unwrap_or_default(),
            pvc.name_any(),
        );
        return Ok(Action::requeue(ctx.retry_interval()));
    };

    if class.provisioner != ctx.config.provisioner_name {
        return Ok(Action::await_change());
    }

    // A volume created on an earlier pass may not be bound yet
    let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());
    if let Some(uid) = pvc.uid() {
        let selector = format!("{}={}", CLAIM_UID_LABEL, uid);
        let existing = volumes
            .list(&ListParams::default().labels(&selector))
            .await?;

        if !existing.items.is_empty() {
            log::debug!(
                "claim {}/{} already has a volume, waiting for it to bind",
                pvc.namespace().unwrap_or_default(),
                pvc.name_any(),
            );
            return Ok(Action::await_change());
        }
    }

    let request = claim::volume_request(&pvc).map_err(hostpath::Error::from)?;
    log::info!(
        "provisioning volume for claim {}/{} ({:?})",
        request.namespace,
        request.name,
        request.capacity.as_ref().map(ToString::to_string),
    );

    let (record, state) = ctx.provision(request).await?;
    let pv = volume::persistent_volume(&record, &pvc, class_name, &ctx.config.provisioner_name);

    if let Err(err) = volumes.create(&PostParams::default(), &pv).await {
        // Without the PersistentVolume nobody would ever delete the directory
        log::warn!(
            "could not create PersistentVolume {}, removing its storage again: {}",
            record.name,
            err
        );
        ctx.delete(record).await?;

        return Err(err.into());
    }

    log::info!(
        "created PersistentVolume {} for claim {}/{}",
        record.name,
        pvc.namespace().unwrap_or_default(),
        pvc.name_any(),
    );

    Ok(match state {
        ProvisioningState::Finished => Action::await_change(),
        ProvisioningState::InBackground => Action::requeue(ctx.retry_interval()),
    })
}

/// Remove the storage of a released volume that we provisioned, then the
/// PersistentVolume itself.
pub async fn reconcile_volume(
    pv: Arc<PersistentVolume>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if !volume::provisioned_by(&pv, &ctx.config.provisioner_name)
        || !volume::is_released_for_deletion(&pv)
    {
        return Ok(Action::await_change());
    }

    let record = volume::volume_record(&pv)?;
    ctx.delete(record).await?;

    let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());
    match volumes.delete(&pv.name_any(), &DeleteParams::default()).await {
        Ok(_) => log::info!("deleted PersistentVolume {}", pv.name_any()),
        Err(kube::Error::Api(response)) if response.code == 404 => {}
        Err(err) => return Err(err.into()),
    }

    Ok(Action::await_change())
}

/// Permanent failures wait for the object to change, everything else is retried
pub fn error_policy<K>(object: Arc<K>, err: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource,
    K::DynamicType: Default,
{
    log::warn!(
        "reconciling {} `{}` failed: {}",
        K::kind(&Default::default()),
        object.name_any(),
        err
    );

    if err.is_permanent() {
        Action::await_change()
    } else {
        Action::requeue(ctx.retry_interval())
    }
}

/// Resolves once `true` has been sent on the channel, or the sender is gone
fn shutdown_signal(
    mut shutdown: watch::Receiver<bool>,
) -> impl Future<Output = ()> + Send + Sync + 'static {
    async move {
        loop {
            let stopped = *shutdown.borrow_and_update();
            if stopped || shutdown.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Run the claim and volume controllers until `shutdown` fires.
///
/// In-flight reconciliations are allowed to finish before this returns.
pub async fn run(context: Arc<Context>, shutdown: watch::Receiver<bool>) {
    let claims: Api<PersistentVolumeClaim> = Api::all(context.client.clone());
    let volumes: Api<PersistentVolume> = Api::all(context.client.clone());

    let claim_controller = Controller::new(claims, watcher::Config::default())
        .graceful_shutdown_on(shutdown_signal(shutdown.clone()))
        .run(reconcile_claim, error_policy, context.clone())
        .for_each(|result| {
            if let Err(err) = result {
                log::debug!("claim controller: {}", err);
            }
            future::ready(())
        });

    let volume_controller = Controller::new(volumes, watcher::Config::default())
        .graceful_shutdown_on(shutdown_signal(shutdown))
        .run(reconcile_volume, error_policy, context)
        .for_each(|result| {
            if let Err(err) = result {
                log::debug!("volume controller: {}", err);
            }
            future::ready(())
        });

    future::join(claim_controller, volume_controller).await;
}
