//! edge-lifecycle - custom-resource lifecycle controller

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edge_lifecycle::config::ControllerConfig;
use edge_lifecycle::dispatcher::LifecycleDispatcher;
use edge_lifecycle::greengrass::GreengrassControlPlane;
use edge_lifecycle::handler::{DeploymentResetHandler, DeviceIdentityHandler};
use edge_lifecycle::iot::IotControlPlane;
use edge_lifecycle::response::HttpResponseSender;
use edge_lifecycle::secrets::SsmSecretStore;
use edge_lifecycle::server::invocation_router;

/// edge-lifecycle - provisions device identities and resets deployments for an orchestrator
#[derive(Parser, Debug)]
#[command(name = "edge-lifecycle", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve lifecycle requests over HTTP (default mode)
    ///
    /// Each `POST /invocations` body is one request envelope; the reply is the
    /// response envelope that was delivered to the orchestrator.
    Serve,

    /// Handle a single request envelope and exit
    Invoke {
        /// Path to the envelope JSON, or `-` for stdin
        #[arg(long, default_value = "-")]
        event: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    cli.config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let dispatcher = Arc::new(build_dispatcher(&cli.config).await?);
    info!(
        resource_types = ?dispatcher.resource_types(),
        handler_budget = ?cli.config.handler_budget(),
        "Dispatcher ready"
    );

    match cli.command {
        Some(Commands::Invoke { event }) => run_invoke(&dispatcher, event).await,
        Some(Commands::Serve) | None => run_server(dispatcher, &cli.config).await,
    }
}

/// Wire AWS-backed control planes into a dispatcher
async fn build_dispatcher(config: &ControllerConfig) -> anyhow::Result<LifecycleDispatcher> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;

    let sender = HttpResponseSender::new(config.delivery_margin(), config.retry())
        .map_err(|e| anyhow::anyhow!("Failed to build response sender: {}", e))?;

    let device_identity = DeviceIdentityHandler::new(
        Arc::new(IotControlPlane::new(&sdk_config)),
        Arc::new(SsmSecretStore::new(&sdk_config)),
        config,
    );
    let deployment_reset =
        DeploymentResetHandler::new(Arc::new(GreengrassControlPlane::new(&sdk_config)), config);

    let mut dispatcher = LifecycleDispatcher::from_config(Arc::new(sender), config);
    dispatcher
        .register(config.device_identity_type.clone(), Arc::new(device_identity))
        .register(config.deployment_reset_type.clone(), Arc::new(deployment_reset));
    Ok(dispatcher)
}

/// Handle one envelope from a file or stdin and print the response
async fn run_invoke(dispatcher: &LifecycleDispatcher, event: PathBuf) -> anyhow::Result<()> {
    let body = if event.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| anyhow::anyhow!("Failed to read event from stdin: {}", e))?;
        buf
    } else {
        tokio::fs::read_to_string(&event)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read event file {:?}: {}", event, e))?
    };

    let raw: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| anyhow::anyhow!("Event is not valid JSON: {}", e))?;
    let response = dispatcher.handle_raw(raw).await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Serve the invocation endpoint until interrupted
async fn run_server(dispatcher: Arc<LifecycleDispatcher>, config: &ControllerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", config.listen, e))?;
    info!(addr = %config.listen, "Serving lifecycle invocations");

    axum::serve(listener, invocation_router(dispatcher))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
