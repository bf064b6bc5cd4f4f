//! External surface glue (C9).
//!
//! Wraps the reconciliation engine (C8) with one watch loop per workload
//! kind. `kube`'s watch stream does not natively distinguish Create from
//! Update -- both surface as `watcher::Event::Apply` -- so this module
//! keeps a small per-key snapshot cache and treats a cache miss as the
//! Create case the event filter (C4) must never admit. Nothing else
//! lives here: no reconciliation logic, only dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::{WatchStreamExt, watcher};
use tokio::sync::Mutex;

use crate::engine::Engine;
use crate::error::Error;
use crate::filter::{self, Snapshot, WorkloadKind};
use crate::workload::Workload;

/// Per-key single-flight guard. The specification's scheduler guarantees
/// at-most-one concurrent `Reconcile` per object key within a kind; the
/// core "assumes but does not enforce" it (spec.md S5). Since C9 here
/// drives its own watch loop instead of delegating to a host scheduler,
/// it provides that guarantee itself.
type InFlight = Arc<Mutex<HashSet<String>>>;
type SnapshotCache = Arc<Mutex<HashMap<String, Snapshot>>>;

/// Fixed retry backoff for a reconcile that returned `Err`, standing in
/// for the scheduler's "retry with backoff" guarantee (spec.md S4.8 step
/// 1, S7's marker-patch-failure rule). Matches the fixed 5-minute backoff
/// `kaniop`'s `error_policy` uses for reconcile failures.
const RECONCILE_ERROR_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Runs the watch-and-reconcile loop for one workload kind until the
/// watch stream ends (normally: never, except on unrecoverable client
/// shutdown). Watch errors are logged and the stream's own backoff
/// (`default_backoff`) handles retry/reconnect.
pub async fn run<W>(engine: Engine, kind: WorkloadKind) -> Result<(), Error>
where
    W: Workload,
{
    let api: Api<W> = match &engine.config.watch_namespace {
        Some(ns) => Api::namespaced(engine.client.clone(), ns),
        None => Api::all(engine.client.clone()),
    };

    let cache: SnapshotCache = Arc::new(Mutex::new(HashMap::new()));
    let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));
    let edge_keys: Vec<String> = engine
        .config
        .edge_annotations()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut stream = watcher(api.clone(), watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                tracing::error!(kind = %filter_kind_name(kind), %error, "watch stream error");
                continue;
            }
        };

        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                handle_observed(&engine, &api, &cache, &in_flight, &edge_keys, kind, obj).await;
            }
            watcher::Event::Delete(obj) => {
                handle_deleted(&engine, &api, &cache, &in_flight, &edge_keys, kind, obj).await;
            }
            watcher::Event::Init | watcher::Event::InitDone => {}
        }
    }

    Ok(())
}

fn filter_kind_name(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Deployment => "Deployment",
        WorkloadKind::StatefulSet => "StatefulSet",
        WorkloadKind::DaemonSet => "DaemonSet",
    }
}

/// Handles an `Apply`/`InitApply` event: a cache miss is Create (never
/// admitted); a cache hit is Update, admitted per the triggers in
/// spec.md S4.4.
async fn handle_observed<W>(
    engine: &Engine,
    api: &Api<W>,
    cache: &SnapshotCache,
    in_flight: &InFlight,
    edge_keys: &[String],
    kind: WorkloadKind,
    obj: W,
) where
    W: Workload,
{
    let edge_key_refs: Vec<&str> = edge_keys.iter().map(String::as_str).collect();
    let new_snapshot = Snapshot::from_workload(&obj, &edge_key_refs);
    let id = obj.id();

    let admitted = {
        let mut cache = cache.lock().await;
        let old_snapshot = cache.insert(id.clone(), new_snapshot.clone());
        match old_snapshot {
            None => filter::admit_create(&new_snapshot),
            Some(old) => filter::admit_update(kind, &old, &new_snapshot),
        }
    };

    if admitted {
        let namespace = obj.namespace();
        let name = obj.name();
        dispatch(engine.clone(), api.clone(), in_flight.clone(), namespace, name, id).await;
    }
}

/// Handles a `Delete` event: admitted unconditionally when the
/// just-deleted object still carried an edge annotation, so a deleted
/// source no longer pins its downstreams. The reconcile it triggers
/// will simply observe `NotFound` on its own `Get` (C8 step 1) and
/// return success -- the point of admitting the event is so the key
/// passes once more through the pipeline, not to act on stale data.
async fn handle_deleted<W>(
    engine: &Engine,
    api: &Api<W>,
    cache: &SnapshotCache,
    in_flight: &InFlight,
    edge_keys: &[String],
    _kind: WorkloadKind,
    obj: W,
) where
    W: Workload,
{
    let edge_key_refs: Vec<&str> = edge_keys.iter().map(String::as_str).collect();
    let snapshot = Snapshot::from_workload(&obj, &edge_key_refs);
    let id = obj.id();

    cache.lock().await.remove(&id);

    if filter::admit_delete(&snapshot) {
        let namespace = obj.namespace();
        let name = obj.name();
        dispatch(engine.clone(), api.clone(), in_flight.clone(), namespace, name, id).await;
    }
}

/// Spawns a reconcile for `id`, skipping it if one is already in flight
/// for the same key. A returned `RequeueAfter` reschedules itself after
/// the given duration, mirroring the scheduler's `Result`-driven requeue
/// (spec.md S6).
async fn dispatch<W>(
    engine: Engine,
    api: Api<W>,
    in_flight: InFlight,
    namespace: String,
    name: String,
    id: String,
) where
    W: Workload,
{
    {
        let mut guard = in_flight.lock().await;
        if !guard.insert(id.clone()) {
            return;
        }
    }

    tokio::spawn(async move {
        run_one(engine, api, in_flight, namespace, name, id).await;
    });
}

/// Runs one reconcile and, on `Ok(Some(requeue_after))`, reschedules
/// itself after that duration; on `Err`, reschedules itself after
/// [`RECONCILE_ERROR_BACKOFF`] instead of dropping the failure, since C9
/// stands in for the scheduler's retry-with-backoff guarantee. Returns a
/// boxed future so it can recurse into itself from within `tokio::spawn`.
fn run_one<W>(
    engine: Engine,
    api: Api<W>,
    in_flight: InFlight,
    namespace: String,
    name: String,
    id: String,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
where
    W: Workload,
{
    Box::pin(async move {
        let outcome = reconcile_one(&engine, &api, &namespace, &name).await;
        in_flight.lock().await.remove(&id);

        match outcome {
            Ok(Some(requeue_after)) => {
                tokio::spawn(async move {
                    tokio::time::sleep(requeue_after).await;
                    run_one(engine, api, in_flight, namespace, name, id).await;
                });
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(%namespace, %name, %error, "reconcile failed; retrying after backoff");
                tokio::spawn(async move {
                    tokio::time::sleep(RECONCILE_ERROR_BACKOFF).await;
                    run_one(engine, api, in_flight, namespace, name, id).await;
                });
            }
        }
    })
}

/// C9's own `Get` (step 1 of spec.md S4.8): `NotFound` is success with no
/// further action; other errors are logged and surfaced so the caller
/// can decide whether the scheduler-equivalent retry logic applies.
async fn reconcile_one<W>(
    engine: &Engine,
    api: &Api<W>,
    namespace: &str,
    name: &str,
) -> Result<Option<Duration>, Error>
where
    W: Workload,
{
    let workload = match api.get(name).await {
        Ok(workload) => workload,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            tracing::info!(%namespace, %name, "object gone before reconcile; nothing to do");
            return Ok(None);
        }
        Err(e) => return Err(Error::Kube(e)),
    };

    let outcome = engine.reconcile(workload).await?;
    Ok(outcome.requeue_after)
}
