use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use resilis::config::{Config, ConfigError, EndpointConfig, LoggingConfig};
use resilis::utils::{format_duration, parse_endpoint, random_key};
use resilis::{Client, Command, Reply};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilis")]
#[command(about = "A failover-aware client for replicated Redis deployments")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "resilis team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where to find the servers
#[derive(clap::Args)]
struct Target {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: PathBuf,
    /// Endpoint as host:port, replaces the configured endpoints (repeatable)
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single command and dump the reply
    Exec {
        #[command(flatten)]
        target: Target,
        /// Command and arguments, e.g. SET foo bar
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Pipeline several commands and dump the packed reply
    Pipeline {
        #[command(flatten)]
        target: Target,
        /// Wrap the commands in MULTI/EXEC
        #[arg(short, long)]
        transaction: bool,
        /// One quoted command per argument, e.g. "SET foo bar" "EXPIRE foo 10"
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Issue a command repeatedly from concurrent tasks sharing one client
    Bench {
        #[command(flatten)]
        target: Target,
        /// Number of concurrent tasks
        #[arg(long, default_value_t = 4)]
        tasks: usize,
        /// Commands per task
        #[arg(short, long, default_value_t = 100)]
        repeat: usize,
        /// Command to run; defaults to INCR on a random key
        command: Option<String>,
    },
    /// Generate example configuration files
    Config {
        /// Configuration mode (standalone or replicated)
        #[arg(short, long)]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Exec { target, command } => {
            let client = prepare_client(&target)?;
            run_exec(&client, &command.join(" ")).await?;
            client.close();
        }
        Commands::Pipeline {
            target,
            transaction,
            commands,
        } => {
            let client = prepare_client(&target)?;
            run_pipeline(&client, &commands, transaction).await?;
            client.close();
        }
        Commands::Bench {
            target,
            tasks,
            repeat,
            command,
        } => {
            let client = Arc::new(prepare_client(&target)?);
            let command = command.unwrap_or_else(|| format!("INCR {}", random_key("resilis:bench")));
            run_bench(client, &command, tasks, repeat).await?;
        }
        Commands::Config { mode, output } => {
            generate_config(&mode, &output)?;
        }
        Commands::Validate { config } => {
            validate_config(&config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

/// Load the configuration, apply endpoint overrides, set up logging and
/// build a client. Nothing is connected yet.
fn prepare_client(target: &Target) -> anyhow::Result<Client> {
    let mut config = if target.endpoints.is_empty() || target.config.exists() {
        Config::load_from_file(&target.config)
            .with_context(|| format!("Failed to load config from {:?}", target.config))?
    } else {
        Config::default()
    };

    if !target.endpoints.is_empty() {
        config.endpoints = target
            .endpoints
            .iter()
            .map(|addr| {
                let (host, port) = parse_endpoint(addr)?;
                Ok(EndpointConfig {
                    host,
                    port,
                    connect_timeout_ms: None,
                    operation_timeout_ms: None,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        config.validate()?;
    }

    init_logging(&config.logging)?;
    info!("Using {} endpoint(s)", config.endpoints.len());
    Ok(config.build_client()?)
}

async fn run_exec(client: &Client, line: &str) -> anyhow::Result<()> {
    let command: Command = line.parse()?;
    let reply = client.command(command).await?;
    print_reply(&reply);
    Ok(())
}

async fn run_pipeline(client: &Client, lines: &[String], transaction: bool) -> anyhow::Result<()> {
    let commands = lines
        .iter()
        .map(|line| line.parse::<Command>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut guard = client.lock().await;
    if transaction {
        guard.multi().await?;
    }
    for command in commands {
        guard.append(command).await?;
    }
    if transaction {
        guard.multi_exec().await?;
    }

    let Some(reply) = guard.exec().await? else {
        bail!("Nothing was queued");
    };
    drop(guard);
    if transaction {
        match reply.transaction_results() {
            Some(results) => print_reply(&Reply::Array(results.to_vec())),
            None => {
                warn!("Transaction was aborted");
                print_reply(&reply);
            }
        }
    } else {
        print_reply(&reply);
    }
    Ok(())
}

fn print_reply(reply: &Reply) {
    let prefix = if reply.is_error() { "error: " } else { "okay: " };
    print!("{}", reply.dump(prefix));
}

async fn run_bench(
    client: Arc<Client>,
    line: &str,
    tasks: usize,
    repeat: usize,
) -> anyhow::Result<()> {
    let command: Command = line.parse()?;
    println!("Running {:?} {} times from {} task(s)", line, repeat, tasks);

    let started = Instant::now();
    let handles = (0..tasks).map(|_| {
        let client = client.clone();
        let command = command.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut errors = 0usize;
            for _ in 0..repeat {
                match client.command(command.clone()).await {
                    Ok(reply) if !reply.is_error() => {}
                    _ => errors += 1,
                }
            }
            (started.elapsed(), errors)
        })
    });

    let mut total_errors = 0;
    for (i, result) in join_all(handles).await.into_iter().enumerate() {
        let (elapsed, errors) = result.context("Benchmark task panicked")?;
        println!("  task {}: {} ({} error(s))", i, format_duration(elapsed), errors);
        total_errors += errors;
    }

    let elapsed = started.elapsed();
    let total = tasks * repeat;
    let rate = total as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    println!(
        "{} commands in {} ({:.0} ops/s), {} error(s)",
        total,
        format_duration(elapsed),
        rate,
        total_errors
    );

    if let Ok(client) = Arc::try_unwrap(client) {
        client.close();
    }
    Ok(())
}

fn generate_config(mode: &str, output: &Path) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(output, mode).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  resilis exec --config {:?} PING", output);

    Ok(())
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Endpoint slots: {}", config.client.max_endpoints);
            println!(
                "  Password: {}",
                if config.client.password.is_some() { "set" } else { "none" }
            );
            println!("  Endpoints: {}", config.endpoints.len());
            for (i, endpoint) in config.endpoints.iter().enumerate() {
                println!("    {}: {}:{}", i, endpoint.host, endpoint.port);
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("resilis v{}", env!("CARGO_PKG_VERSION"));
    println!("A failover-aware client for replicated Redis deployments");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Round-robin reconnection over a fixed set of endpoints");
    println!("  • Master discovery through INFO (2.4) or CONFIG GET slaveof (2.6+)");
    println!("  • Automatic failover on READONLY replies");
    println!("  • Pipelining and MULTI/EXEC transactions");
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    if let Err(e) = result {
        bail!("Failed to initialize logging: {}", e);
    }
    Ok(())
}
