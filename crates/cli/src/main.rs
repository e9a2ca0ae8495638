use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    flowline_client::{DEFAULT_ENDPOINT, HttpConfig, Pipe, Worker},
    flowline_protocol::{Decoration, ReceiveOptionsPatch},
};

#[derive(Parser)]
#[command(name = "flowline", about = "Flowline — command line pipeline client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Service endpoint.
    #[arg(long, global = true, env = "FLOWLINE_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// API key for the service.
    #[arg(long, global = true, env = "FLOWLINE_API_KEY", default_value = "")]
    api_key: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a payload into a route and print the message id.
    Send {
        /// Payload, as a JSON string.
        payload: String,
        /// Route steps, in processing order.
        #[arg(long, num_args = 1.., required = true)]
        route: Vec<String>,
    },
    /// Fetch pending events for a step and print them as JSON lines.
    Fetch {
        /// Step to poll.
        step: String,
        /// Maximum number of events.
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Long-poll timeout in seconds (0 uses the service default).
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
    /// Drain a step continuously, printing each event.
    Work {
        /// Step to drain.
        step: String,
        /// Stop after this many events (0 runs until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Decorate each processed message, as key=value.
        #[arg(long)]
        decorate: Option<String>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn send(config: HttpConfig, payload: &str, route: &[String]) -> anyhow::Result<()> {
    // The pipe is bound to the route's first step; sending itself is
    // step-independent.
    let step = route.first().cloned().unwrap_or_default();
    let pipe = Pipe::http(config, step)?;
    let id = pipe.send(payload, route).await?;
    println!("{id}");
    Ok(())
}

async fn fetch(config: HttpConfig, step: String, count: u32, timeout: u64) -> anyhow::Result<()> {
    let pipe = Pipe::http(config, step)?;
    pipe.set_receive_options(ReceiveOptionsPatch {
        count: Some(count),
        timeout: Some(timeout),
        ..Default::default()
    })
    .await;

    let events = pipe.fetch().await?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

async fn work(
    config: HttpConfig,
    step: String,
    limit: usize,
    decorate: Option<String>,
) -> anyhow::Result<()> {
    let decoration = decorate.map(parse_decoration).transpose()?;

    let mut worker = Worker::http(config, step)?;
    worker.on_message(move |event, pipe| {
        let decoration = decoration.clone();
        async move {
            println!("{}", serde_json::to_string(&event)?);
            if let Some(decoration) = decoration {
                pipe.decorate(&event.id, &[decoration]).await?;
            }
            Ok(())
        }
    });

    let worker = Arc::new(worker);
    tokio::spawn({
        let worker = Arc::clone(&worker);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                worker.stop().await;
            }
        }
    });

    if limit > 0 {
        worker.run_bounded(limit).await?;
    } else {
        worker.run().await?;
    }
    Ok(())
}

fn parse_decoration(raw: String) -> anyhow::Result<Decoration> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("decoration must be key=value"))?;
    Ok(Decoration::new(key, value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = HttpConfig::new(cli.api_key.clone()).with_endpoint(cli.url.clone());

    match cli.command {
        Commands::Send { payload, route } => send(config, &payload, &route).await,
        Commands::Fetch { step, count, timeout } => fetch(config, step, count, timeout).await,
        Commands::Work { step, limit, decorate } => work(config, step, limit, decorate).await,
    }
}
