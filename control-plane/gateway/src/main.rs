//! Entry point: wires the hub cluster client, the three background loops
//! (autoscaler, authenticator, and the HTTP request server), and a shared
//! cancellation token for graceful shutdown.

mod admin;
mod assignment;
mod authenticator;
mod autoscaler;
mod config;
mod credentials;
mod error;
mod http;
mod recaptcha;

use actix_web::{web, App, HttpServer};
use admin::AdminSessions;
use assignment::AssignmentService;
use autoscaler::Autoscaler;
use common::resource_store::ResourceStore;
use config::CliArgs;
use http::AppState;
use kube::{config::Kubeconfig, Client, Config};
use tokio_util::sync::CancellationToken;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::load();
    common::tracing_telemetry::init_tracing("cluster-gateway");

    let client = hub_client(&args).await?;
    let store = ResourceStore::new(client, args.pool_namespace.clone());

    let autoscaler = Autoscaler::new(store.clone(), &args);
    let authenticator = authenticator::Authenticator::new(store.clone(), &args);
    let assignment = AssignmentService::new(store.clone(), &args)?;
    let admin_sessions = AdminSessions::new(&args);

    let state = web::Data::new(AppState {
        assignment,
        admin_sessions,
        store,
        pool_name: args.pool_name.clone(),
        recaptcha_site_key: args.recaptcha_site_key.clone(),
    });

    let cancel = CancellationToken::new();

    let autoscaler_handle = tokio::spawn(autoscaler.run(cancel.child_token()));
    let authenticator_handle = tokio::spawn(authenticator.run(cancel.child_token()));

    let listen_addr = args.listen_addr.clone();
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(http::configure))
        .bind(&listen_addr)?
        .run();

    // actix-web installs its own SIGINT/SIGTERM handler and shuts the HTTP
    // server down gracefully on either; once it returns we cancel the two
    // background loops so the process exits cleanly instead of being killed.
    server.await?;
    cancel.cancel();
    let _ = tokio::join!(autoscaler_handle, authenticator_handle);
    Ok(())
}

/// Resolves the hub cluster client per §6: an explicit `--kubeconfig` path
/// first, then `$HOME/.kube/config`, then in-cluster service account config.
async fn hub_client(args: &CliArgs) -> anyhow::Result<Client> {
    let config = if let Some(path) = &args.kubeconfig {
        let kubeconfig = Kubeconfig::read_from(path)?;
        Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default()).await?
    } else {
        Config::infer().await?
    };
    Ok(Client::try_from(config)?)
}
