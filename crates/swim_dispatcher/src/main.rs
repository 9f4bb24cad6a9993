//! SWIM Dispatcher command line.
//!
//! Each subcommand runs one pass against the local object store configured in
//! the TOML file and exits. Scheduling passes is left to the caller (cron,
//! systemd timers).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use swim_dispatcher::ports::{JsonProtocolStore, LogNotifier, OutboxEventSink};
use swim_dispatcher::{
    resolve_target, DispatchContext, DispatchEngine, DispatcherConfig, ErrorDetails, EventHandler,
    File, FileEvent, LocalObjectStore, Metadata, ObjectStore, ProtocolEngine, ProtocolOutcome,
    TableLookup, UrlSigner,
};
use swim_logging::LogConfig;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "swim-dispatcher", about = "Tag-driven file dispatcher for object storage")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SWIM_DISPATCHER_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one dispatch pass over all use cases
    Dispatch,

    /// Run one protocol reconciliation pass over all use cases
    Protocols,

    /// Handle a finish event from a handler service
    Finish {
        /// Event JSON: {"useCase", "presignedUrl", "metadataPresignedUrl"?}
        #[arg(long)]
        event: String,
    },

    /// Handle an error event from a handler service
    Fail {
        /// Event JSON, same shape as for `finish`
        #[arg(long)]
        event: String,

        /// Error details JSON: {"source"?, "className", "message", "stacktrace"?}
        #[arg(long)]
        details: String,
    },

    /// Show the target a file would be dispatched to. Name lookups use the
    /// `[lookup]` table of the configuration
    ResolveTarget {
        #[arg(long)]
        use_case: String,

        /// Object key inside the use case's bucket
        #[arg(long)]
        file: String,
    },

    /// Validate the configuration and list the use cases
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("swim-dispatcher");
    log_config.verbose = cli.verbose;
    let _log_guard = match swim_logging::init_logging(log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {:#}", e);
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = DispatcherConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    let storage = &config.storage;
    let store = LocalObjectStore::new(&storage.root);
    let signer = UrlSigner::new(
        &storage.presign_base_url,
        &storage.signing_secret,
        storage.presign_expiry_secs,
    )
    .context("Failed to set up URL signer")?;
    let notifier = LogNotifier::new(&config);

    match cli.command {
        Commands::Dispatch => {
            let events = OutboxEventSink::new(&storage.outbox_dir);
            let reports = DispatchEngine::new(&config, &store, &signer, &events, &notifier).run();
            for report in &reports {
                println!(
                    "{}: {} dispatched, {} rerouted, {} finished, {} failed",
                    report.use_case,
                    report.dispatched,
                    report.rerouted,
                    report.finished,
                    report.errors.len()
                );
            }
        }
        Commands::Protocols => {
            let protocols = JsonProtocolStore::new(&storage.protocol_dir);
            let outcomes = ProtocolEngine::new(&config, &store, &protocols, &notifier).run();
            for outcome in &outcomes {
                let sensitive = |use_case: &str| {
                    config
                        .find_use_case(use_case)
                        .is_ok_and(|use_case| use_case.sensitive_filename)
                };
                match outcome {
                    ProtocolOutcome::Reconciled {
                        use_case,
                        reconciliation,
                        ..
                    } if sensitive(use_case) => println!("{}: <hidden> -> {}", use_case, reconciliation.state),
                    ProtocolOutcome::Reconciled {
                        use_case,
                        protocol_path,
                        reconciliation,
                    } => println!("{}: {} -> {}", use_case, protocol_path, reconciliation.state),
                    ProtocolOutcome::Failed { use_case, .. } if sensitive(use_case) => {
                        println!("{}: <hidden> failed", use_case)
                    }
                    ProtocolOutcome::Failed {
                        use_case,
                        protocol_path,
                        error,
                    } => println!("{}: {} failed: {}", use_case, protocol_path, error),
                }
            }
        }
        Commands::Finish { event } => {
            let event: FileEvent = serde_json::from_str(&event).context("Invalid event JSON")?;
            EventHandler::new(&config, &store, &signer, &notifier).mark_file_finished(&event)?;
            info!(use_case = %event.use_case, "Finish event handled");
        }
        Commands::Fail { event, details } => {
            let event: FileEvent = serde_json::from_str(&event).context("Invalid event JSON")?;
            let details: ErrorDetails =
                serde_json::from_str(&details).context("Invalid error details JSON")?;
            EventHandler::new(&config, &store, &signer, &notifier).handle_error(&event, &details)?;
            info!(use_case = %event.use_case, "Error event handled");
        }
        Commands::ResolveTarget { use_case, file } => {
            let use_case = config.find_use_case(&use_case)?;
            let file = File::new(use_case.container(), file, None);
            let metadata = if use_case.requires_metadata {
                let metadata_file = file.sibling(file.metadata_path()?);
                let content = store
                    .read(&metadata_file)
                    .with_context(|| format!("Failed to read metadata {}", metadata_file.path))?;
                Some(Metadata::parse(&content)?)
            } else {
                None
            };
            let ctx = DispatchContext::new(use_case, &config, &file);
            let target = resolve_target(&ctx, metadata.as_ref(), &TableLookup::from_config(&config))?;
            println!("{}", target);
        }
        Commands::CheckConfig => {
            println!("Configuration OK: {} use case(s)", config.use_cases.len());
            for use_case in config.use_cases.iter() {
                println!(
                    "  {} -> {} ({}, {})",
                    use_case.name,
                    use_case.destination,
                    use_case.container(),
                    use_case.source.name()
                );
            }
        }
    }
    Ok(())
}
