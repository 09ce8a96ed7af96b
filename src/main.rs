//! # Store Provisioner Entry Point
//!
//! Operator command line over the provisioning library: run the
//! reconciliation loop, or create, inspect and delete stores directly.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use provisioner::{
    app::App,
    cluster::{ClusterGateway, HelmCli, KubeGateway},
    config::ConfigLoader,
    db,
    deadline::with_deadline,
    service::CreateStoreRequest,
    telemetry,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "store-provisioner", about = "Per-tenant store provisioner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the reconciliation loop until interrupted
    Serve,
    /// Create a store and wait for its provisioning task
    Create(CreateArgs),
    /// Tear down a store and remove its record
    Delete(StoreArgs),
    /// List stores, newest first
    List(ListArgs),
    /// Show one store
    Show(StoreArgs),
    /// Show a store's events, newest first
    Events(EventsArgs),
    /// Run a single reconciliation sweep
    Reconcile,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Store display name
    #[arg(long)]
    name: String,

    /// Engine slug (woocommerce or medusa)
    #[arg(long, default_value = "woocommerce")]
    engine: String,

    /// Owning user
    #[arg(long)]
    owner: Option<Uuid>,
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// Store id
    id: String,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Only stores of this owner
    #[arg(long)]
    owner: Option<Uuid>,
}

#[derive(Debug, Args)]
struct EventsArgs {
    /// Store id
    id: String,

    /// Maximum number of events
    #[arg(long)]
    limit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Loaded configuration");
    }

    let db = db::connect_and_migrate(&config)
        .await
        .context("initializing database")?;

    let gateway = KubeGateway::try_default(HelmCli::new(config.cluster.helm_bin.clone()))
        .await
        .context("initializing kubernetes client")?;
    let cluster: Arc<dyn ClusterGateway> = Arc::new(gateway);

    let app = App::new(config, db, cluster);

    match cli.command {
        Commands::Serve => serve(&app).await,
        Commands::Create(args) => create(&app, args).await,
        Commands::Delete(args) => {
            app.service()
                .delete_store(&args.id)
                .await
                .with_context(|| format!("deleting store {}", args.id))?;
            println!("deleted {}", args.id);
            Ok(())
        }
        Commands::List(args) => print_json(&app.service().list(args.owner).await?),
        Commands::Show(args) => print_json(&app.service().get(&args.id).await?),
        Commands::Events(args) => print_json(&app.service().events(&args.id, args.limit).await?),
        Commands::Reconcile => {
            let stats = app
                .reconciler()
                .sweep()
                .await
                .context("running reconcile sweep")?;
            println!(
                "polled={} promoted={} unknown={} repairs={} errors={}",
                stats.polled, stats.promoted, stats.unknown, stats.repairs, stats.errors
            );
            Ok(())
        }
    }
}

async fn serve(app: &App) -> Result<()> {
    match with_deadline(
        "cluster connectivity check",
        CONNECTIVITY_TIMEOUT,
        app.cluster().check_connectivity(),
    )
    .await
    {
        Ok(version) => tracing::info!(version = %version, "Connected to cluster"),
        Err(err) => tracing::warn!(error = %err, "Cluster not reachable, continuing"),
    }

    let shutdown = CancellationToken::new();
    let reconciler = app.reconciler();
    let loop_token = shutdown.clone();
    let handle = tokio::spawn(async move { reconciler.run(loop_token).await });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    handle.await.context("reconciler task panicked")?;
    Ok(())
}

async fn create(app: &App, args: CreateArgs) -> Result<()> {
    let created = app
        .service()
        .create_store(CreateStoreRequest {
            name: args.name,
            engine: args.engine,
            owner_id: args.owner,
        })
        .await
        .context("creating store")?;

    let store_id = created.store.id.clone();
    if created.submission.is_accepted() {
        println!("store {store_id} accepted, provisioning...");
        // The worker task dies with the process, so the CLI waits for it.
        created.submission.wait().await;
    } else {
        println!("store {store_id} rejected");
    }

    print_json(&app.service().get(&store_id).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
