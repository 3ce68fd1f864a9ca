//! IPAllocation reconciliation driver
//!
//! Level-triggered control loop moving one allocation request toward its
//! desired state per invocation. Retry cadence is split into two classes:
//! user-fixable states requeue after a fixed 5 seconds, unexpected faults
//! surface as errors and escalate through the scheduler's backoff curve.

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::crd::{Condition, IPAllocation, NetworkInstance};
use crate::error::{Error, Result};

use super::context::Context;
use super::finalizer::{ensure_finalizer, remove_finalizer};
use super::retry::backoff_for;

/// Fixed requeue delay for user/environment-caused non-ready states
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(5);

fn retry_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Reconcile one IPAllocation
#[instrument(skip_all, fields(
    namespace = %allocation.namespace().unwrap_or_else(|| "default".into()),
    name = %allocation.name_any(),
))]
pub async fn reconcile(allocation: Arc<IPAllocation>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
    let name = allocation.name_any();

    let result = reconcile_inner(&namespace, &name, &ctx).await;
    if result.is_ok() {
        ctx.retry.reset(&retry_key(&namespace, &name));
    }
    result
}

async fn reconcile_inner(namespace: &str, name: &str, ctx: &Context) -> Result<Action> {
    // Read the live resource; absence means it was already finalized
    let Some(mut cr) = ctx.allocations.get(namespace, name).await? else {
        debug!("resource gone, nothing to do");
        return Ok(Action::await_change());
    };

    if cr.was_deleted() {
        return finalize(&mut cr, ctx).await;
    }

    // The finalizer must be in place before anything is allocated, or the
    // resource could vanish with live state left in the engine.
    if let Err(err) = ensure_finalizer(ctx.allocations.as_ref(), &mut cr).await {
        warn!(error = %err, "cannot add finalizer");
        cr.set_conditions([
            Condition::reconcile_error(err.to_string()),
            Condition::failed("cannot add finalizer"),
        ]);
        ctx.allocations.update_status(&cr).await?;
        return Err(err);
    }

    let Some(instance_name) = cr.network_instance().map(str::to_owned) else {
        info!("cannot allocate prefix, selector names no network instance");
        cr.set_conditions([
            Condition::reconcile_success(),
            Condition::failed("network instance not named in selector"),
        ]);
        ctx.allocations.update_status(&cr).await?;
        return Ok(Action::requeue(NOT_READY_REQUEUE));
    };

    // Resolve the instance so a deleted one flips the allocation unready
    match ctx.instances.get(namespace, &instance_name).await {
        Ok(Some(instance)) if !instance.was_deleted() => {}
        Ok(Some(_)) => {
            info!(instance = %instance_name, "network instance is being deleted");
            cr.set_conditions([
                Condition::reconcile_success(),
                Condition::failed("network instance not ready"),
            ]);
            ctx.allocations.update_status(&cr).await?;
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
        Ok(None) => {
            info!(instance = %instance_name, "network instance not found");
            cr.set_conditions([
                Condition::reconcile_success(),
                Condition::failed("network instance not found"),
            ]);
            ctx.allocations.update_status(&cr).await?;
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
        Err(err) => {
            warn!(instance = %instance_name, error = %err, "cannot resolve network instance");
            cr.set_conditions([
                Condition::reconcile_error(err.to_string()),
                Condition::failed("cannot resolve network instance"),
            ]);
            ctx.allocations.update_status(&cr).await?;
            return Err(err);
        }
    }

    cr.stamp_origin_label();

    let allocated = match ctx.engine.allocate(&cr).await {
        Ok(allocated) => allocated,
        Err(err) => {
            info!(error = %err, "cannot allocate prefix");
            cr.set_conditions([
                Condition::reconcile_success(),
                Condition::failed(err.to_string()),
            ]);
            ctx.allocations.update_status(&cr).await?;
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
    };

    if let Some(requested) = cr.requested_prefix() {
        // A pre-set prefix is never overwritten, only verified. A differing
        // engine result is an ambiguous state, not a plain failure.
        if allocated.prefix != requested {
            warn!(
                requested = %requested,
                allocated = %allocated.prefix,
                "engine returned a different prefix than requested"
            );
            cr.set_conditions([Condition::reconcile_success(), Condition::unknown()]);
            ctx.allocations.update_status(&cr).await?;
            return Ok(Action::requeue(NOT_READY_REQUEUE));
        }
    } else {
        // First allocation: the result must be persisted before Ready is set
        cr.spec.parent_prefix = Some(allocated.parent_prefix);
        cr.spec.prefix = Some(allocated.prefix);
        match ctx.allocations.update(&cr).await {
            Ok(updated) => cr = updated,
            Err(err) => {
                warn!(error = %err, "cannot persist allocation result");
                cr.set_conditions([Condition::reconcile_success(), Condition::unknown()]);
                ctx.allocations.update_status(&cr).await?;
                return Ok(Action::requeue(NOT_READY_REQUEUE));
            }
        }
    }

    info!("successfully reconciled");
    cr.set_conditions([Condition::reconcile_success(), Condition::ready()]);
    ctx.allocations.update_status(&cr).await?;
    Ok(Action::await_change())
}

/// Deletion path: release the engine allocation, then drop the finalizer
async fn finalize(cr: &mut IPAllocation, ctx: &Context) -> Result<Action> {
    if let Err(err) = ctx.engine.deallocate(cr).await {
        if err.is_already_clean() {
            debug!(error = %err, "engine has no record of allocation, treating as clean");
        } else {
            warn!(error = %err, "cannot release allocation");
            cr.set_conditions([
                Condition::reconcile_error(err.to_string()),
                Condition::failed("cannot release allocation"),
            ]);
            ctx.allocations.update_status(cr).await?;
            return Err(Error::Engine(err));
        }
    }

    if let Err(err) = remove_finalizer(ctx.allocations.as_ref(), cr).await {
        warn!(error = %err, "cannot remove finalizer");
        cr.set_conditions([
            Condition::reconcile_error(err.to_string()),
            Condition::failed("cannot remove finalizer"),
        ]);
        ctx.allocations.update_status(cr).await?;
        return Err(err);
    }

    info!("successfully finalized");
    Ok(Action::await_change())
}

/// Error policy: conflicts retry promptly without escalation, non-retryable
/// errors wait for the resource to change, everything else walks the
/// per-object backoff curve
pub fn error_policy(allocation: Arc<IPAllocation>, error: &Error, ctx: Arc<Context>) -> Action {
    let namespace = allocation.namespace().unwrap_or_else(|| "default".into());
    let name = allocation.name_any();

    if error.is_conflict() {
        debug!(namespace = %namespace, name = %name, "write conflict, retrying");
        return Action::requeue(Duration::from_secs(1));
    }

    if !error.is_retryable() {
        warn!(
            namespace = %namespace,
            name = %name,
            error = %error,
            "non-retryable error, waiting for resource change"
        );
        return Action::await_change();
    }

    let attempt = ctx.retry.increment(&retry_key(&namespace, &name));
    warn!(
        namespace = %namespace,
        name = %name,
        error = %error,
        attempt,
        "reconcile failed"
    );
    Action::requeue(backoff_for(attempt))
}

/// Map a NetworkInstance change onto every allocation that references it.
///
/// Fan-out order is unspecified; each target reconcile is independently
/// idempotent.
pub fn affected_allocations(
    allocations: Vec<Arc<IPAllocation>>,
    instance: &NetworkInstance,
) -> Vec<ObjectRef<IPAllocation>> {
    let name = instance.name_any();
    let namespace = instance.namespace();
    allocations
        .into_iter()
        .filter(|alloc| {
            alloc.namespace() == namespace && alloc.network_instance() == Some(name.as_str())
        })
        .map(|alloc| ObjectRef::from_obj(&*alloc))
        .collect()
}

/// Run the controller until shutdown
pub async fn run(client: Client, ctx: Arc<Context>) {
    let allocations: Api<IPAllocation> = Api::all(client.clone());
    let instances: Api<NetworkInstance> = Api::all(client);

    info!("starting IPAllocation controller");

    let controller = Controller::new(allocations, watcher::Config::default());
    let store = controller.store();

    controller
        .watches(instances, watcher::Config::default(), move |instance| {
            affected_allocations(store.state(), &instance)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(name = %obj.name, "reconciled"),
                Err(err) => warn!(error = %err, "controller error"),
            }
        })
        .await;
}
