//! Cloud gateway controller - materializes Gateway API resources from templates

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cgc_common::crd::{Gateway, GatewayClass, GatewayClassParameters, HTTPRoute};
use cgc_operator::controller::{gateway, gatewayclass, httproute, Context};
use cgc_operator::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }

    if config.crd {
        let crd = serde_yaml::to_string(&GatewayClassParameters::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controllers(config).await
}

async fn run_controllers(config: Config) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, cancelling in-flight materializations");
            signal.cancel();
        }
    });

    tracing::info!(
        controller_name = %config.controller_name,
        max_passes = config.max_passes,
        "Starting cloud gateway controllers"
    );
    let ctx = Arc::new(Context::new(client.clone(), config, shutdown));

    let classes: Api<GatewayClass> = Api::all(client.clone());
    let gateways: Api<Gateway> = Api::all(client.clone());
    let routes: Api<HTTPRoute> = Api::all(client);

    let class_controller = Controller::new(classes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(gatewayclass::reconcile, gatewayclass::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "GatewayClass reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "GatewayClass reconciliation error"),
            }
        });

    // Attached routes feed the gateway's hostname sets
    let gateway_controller = Controller::new(gateways, WatcherConfig::default())
        .watches(routes.clone(), WatcherConfig::default(), route_parents)
        .shutdown_on_signal()
        .run(gateway::reconcile, gateway::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Gateway reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Gateway reconciliation error"),
            }
        });

    let route_controller = Controller::new(routes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(httproute::reconcile, httproute::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "HTTPRoute reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "HTTPRoute reconciliation error"),
            }
        });

    tokio::select! {
        _ = class_controller => {
            tracing::info!("GatewayClass controller completed");
        }
        _ = gateway_controller => {
            tracing::info!("Gateway controller completed");
        }
        _ = route_controller => {
            tracing::info!("HTTPRoute controller completed");
        }
    }

    tracing::info!("Cloud gateway controller shutting down");
    Ok(())
}

/// Gateways an HTTPRoute attaches to
fn route_parents(route: HTTPRoute) -> Vec<ObjectRef<Gateway>> {
    let namespace = route.namespace().unwrap_or_default();
    route
        .spec
        .parent_refs
        .iter()
        .filter(|p| p.is_gateway())
        .map(|p| ObjectRef::new(&p.name).within(p.namespace_or(&namespace)))
        .collect()
}
