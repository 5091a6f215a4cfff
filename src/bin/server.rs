//! switchboard server
//!
//! Entry point: parse CLI arguments, load the cluster configuration, boot
//! the health monitor, and run the client-facing accept loop until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use switchboard::config::ClusterConfig;
use switchboard::health::ReqwestHealthCheck;
use switchboard::monitor::Monitor;
use switchboard::shutdown::Shutdown;
use switchboard::{server, Backend};

#[cfg(feature = "otel")]
use opentelemetry::global;
#[cfg(feature = "otel")]
use opentelemetry::sdk::trace as sdktrace;
#[cfg(feature = "otel")]
use opentelemetry_aws::trace::XrayPropagator;
#[cfg(feature = "otel")]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
pub async fn main() -> switchboard::Result<()> {
    set_up_logging()?;

    let cli = Cli::parse();
    let config = ClusterConfig::load(&cli.config)
        .await?
        .with_port_override(cli.port);

    let backends: Vec<Arc<Backend>> = config
        .backends
        .iter()
        .enumerate()
        .map(|(index, backend_config)| {
            Arc::new(Backend::new(
                backend_config.host.clone(),
                backend_config.port,
                backend_config.healthcheck_port,
                index,
            ))
        })
        .collect();

    let health_check = Arc::new(ReqwestHealthCheck::new(config.healthcheck_timeout()));
    let (monitor, active_backend) = Monitor::new(
        backends,
        config.healthcheck_timeout(),
        health_check,
        Vec::new(),
    );
    let monitor = Arc::new(monitor);

    let (notify_shutdown, _) = broadcast::channel(1);
    let monitor_task = {
        let monitor = Arc::clone(&monitor);
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        tokio::spawn(async move { monitor.run(shutdown).await })
    };

    let listener = TcpListener::bind(config.listen_addr).await?;
    server::run(listener, active_backend, signal::ctrl_c()).await;

    drop(notify_shutdown);
    let _ = monitor_task.await;

    Ok(())
}

#[derive(Parser, Debug)]
#[clap(
    name = "switchboard-server",
    version,
    author,
    about = "A TCP switchboard for a replicated database cluster"
)]
struct Cli {
    /// Path to the cluster configuration TOML file.
    #[clap(long, default_value = "switchboard.toml")]
    config: PathBuf,

    /// Overrides the listen port from the configuration file.
    #[clap(long)]
    port: Option<u16>,
}

#[cfg(not(feature = "otel"))]
fn set_up_logging() -> switchboard::Result<()> {
    tracing_subscriber::fmt::try_init()?;
    Ok(())
}

#[cfg(feature = "otel")]
fn set_up_logging() -> switchboard::Result<()> {
    // See https://github.com/open-telemetry/opentelemetry-rust/blob/main/examples/aws-xray/src/server.rs
    // for the full picture of wiring an OTel exporter behind `tracing`.
    use tracing_subscriber::{fmt, EnvFilter};
    global::set_text_map_propagator(XrayPropagator::default());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(
            sdktrace::config()
                .with_sampler(sdktrace::Sampler::AlwaysOn)
                .with_id_generator(sdktrace::XrayIdGenerator::default()),
        )
        .install_simple()
        .expect("Unable to initialize OtlpPipeline");

    let opentelemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(opentelemetry)
        .with(filter)
        .with(fmt::Layer::default())
        .try_init()?;
    Ok(())
}
