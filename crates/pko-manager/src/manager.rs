//! Controller wiring
//!
//! Each reconciler runs under a `kube::runtime::Controller` per scope,
//! which deduplicates work per object and bounds the number of objects
//! reconciled at once. Changes to owned objects requeue the owner.

use futures::future::{BoxFuture, FutureExt, join_all};
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

use pko_core::{Environment, ObjectDeployment, ObjectKey, ObjectSet, Package, Scope};
use pko_kube::client::api_resource;
use pko_kube::{KubeCluster, KubeError, ObjectDeploymentController, PackageController};

use crate::Args;
use crate::environment;
use crate::error::{ManagerError, Result};
use crate::images::DirectoryImageSource;

const ERROR_REQUEUE: Duration = Duration::from_secs(10);
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Shared by every controller task
pub struct Context {
    packages: PackageController<KubeCluster, DirectoryImageSource, Environment>,
    deployments: ObjectDeploymentController<KubeCluster>,
}

pub async fn run(args: &Args) -> Result<()> {
    let client = kube::Client::try_default().await.map_err(ManagerError::Connect)?;
    let environment = environment::probe(&client, args.openshift_version.clone()).await?;
    let images = DirectoryImageSource::open(&args.package_dir)?;

    let cluster = KubeCluster::new(client.clone());
    let requeue_after = Duration::from_secs(args.requeue_seconds);
    let context = Arc::new(Context {
        packages: PackageController::new(cluster.clone(), images, environment, requeue_after)
            .with_registry_override(args.registry_override.clone()),
        deployments: ObjectDeploymentController::new(cluster, requeue_after),
    });

    let config = controller::Config::default().concurrency(args.concurrency);
    let scopes: &[Scope] = match args.namespace {
        Some(_) => &[Scope::Namespaced],
        None => &[Scope::Namespaced, Scope::Cluster],
    };

    let mut tasks: Vec<BoxFuture<'static, ()>> = Vec::new();
    for &scope in scopes {
        let watch = Watch {
            client: client.clone(),
            scope,
            namespace: args.namespace.clone(),
        };
        tasks.push(run_packages(watch.clone(), context.clone(), config.clone()).boxed());
        tasks.push(run_deployments(watch, context.clone(), config.clone()).boxed());
    }
    tracing::info!(controllers = tasks.len(), concurrency = args.concurrency, "controllers started");
    join_all(tasks).await;
    tracing::info!("controllers stopped");
    Ok(())
}

/// Where one controller watches
#[derive(Clone)]
struct Watch {
    client: kube::Client,
    scope: Scope,
    namespace: Option<String>,
}

impl Watch {
    fn api(&self, resource: &ApiResource) -> Api<DynamicObject> {
        match (self.scope, self.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, resource),
            _ => Api::all_with(self.client.clone(), resource),
        }
    }
}

async fn run_packages(watch: Watch, context: Arc<Context>, config: controller::Config) {
    let packages = api_resource::<Package>(watch.scope);
    let deployments = api_resource::<ObjectDeployment>(watch.scope);
    let kind = packages.kind.clone();

    Controller::new_with(watch.api(&packages), watcher::Config::default(), packages)
        .owns_with(watch.api(&deployments), deployments, watcher::Config::default())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile_package, error_policy, context)
        .for_each(|result| log_result(&kind, result))
        .await;
}

async fn run_deployments(watch: Watch, context: Arc<Context>, config: controller::Config) {
    let deployments = api_resource::<ObjectDeployment>(watch.scope);
    let sets = api_resource::<ObjectSet>(watch.scope);
    let kind = deployments.kind.clone();

    Controller::new_with(watch.api(&deployments), watcher::Config::default(), deployments)
        .owns_with(watch.api(&sets), sets, watcher::Config::default())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile_deployment, error_policy, context)
        .for_each(|result| log_result(&kind, result))
        .await;
}

fn key_of(object: &DynamicObject) -> ObjectKey {
    ObjectKey::new(object.namespace().as_deref(), object.name_any())
}

async fn reconcile_package(object: Arc<DynamicObject>, context: Arc<Context>) -> pko_kube::Result<Action> {
    context.packages.reconcile(&key_of(&object)).await
}

async fn reconcile_deployment(object: Arc<DynamicObject>, context: Arc<Context>) -> pko_kube::Result<Action> {
    context.deployments.reconcile(&key_of(&object)).await
}

fn error_policy(object: Arc<DynamicObject>, err: &KubeError, _context: Arc<Context>) -> Action {
    let key = key_of(&object);
    if err.is_conflict() {
        tracing::debug!(object = %key, "conflict, retrying");
        return Action::requeue(CONFLICT_REQUEUE);
    }
    tracing::warn!(object = %key, error = %err, "reconcile failed");
    Action::requeue(ERROR_REQUEUE)
}

async fn log_result<T, E: std::fmt::Display>(kind: &str, result: std::result::Result<T, E>) {
    if let Err(err) = result {
        tracing::debug!(kind, error = %err, "controller event");
    }
}
