use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use integration_kit::error::{BoxError, ClassifierChain};
use integration_kit::integrations::{
    HealthCheckIntegration, IntegrationRegistry, MemorySessionStore, PlainSecrets, SessionStore,
    SharedIntegration,
};
use integration_kit::logging::{init_logging, LoggingConfig};
use integration_kit::settings::Settings;
use integration_kit::verify::{ConnectionVerifier, TestingResult};

#[derive(Parser, Debug)]
#[command(name = "integration-kit")]
#[command(version)]
#[command(about = "Test connections to self-hosted service integrations")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the integrations configuration file
    #[arg(long, short, default_value = "integrations.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured integrations
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Test integration connections
    Test {
        /// Only test the integration with this id
        #[arg(long)]
        id: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Exit codes
mod exit_codes {
    use std::process::ExitCode;

    /// Every tested connection succeeded
    pub fn success() -> ExitCode {
        ExitCode::from(0)
    }

    /// At least one connection test failed
    pub fn failed() -> ExitCode {
        ExitCode::from(1)
    }

    /// The configuration could not be loaded or used
    pub fn config_error() -> ExitCode {
        ExitCode::from(2)
    }
}

#[derive(Serialize)]
struct IntegrationSummary<'a> {
    id: &'a str,
    name: &'a str,
    url: &'a str,
    operations: &'a [&'static str],
}

#[derive(Serialize)]
struct ConnectionReport<'a> {
    id: &'a str,
    name: &'a str,
    result: TestingResult,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {}", error);
            exit_codes::config_error()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, BoxError> {
    let settings = Settings::load(&cli.config)?;
    let registry = build_registry(&settings)?;

    match cli.command {
        Commands::List { json } => {
            list(&registry, json)?;
            Ok(exit_codes::success())
        }
        Commands::Test { id, json } => {
            let targets: Vec<SharedIntegration> = match id {
                Some(id) => vec![registry
                    .get(&id)
                    .ok_or_else(|| format!("no integration with id '{}'", id))?],
                None => registry.iter().cloned().collect(),
            };

            let verifier = ConnectionVerifier::new(
                Arc::new(settings.verifier.transport_factory()?),
                Arc::new(settings.verifier.certificate_fetcher()),
            );
            test(&verifier, &targets, json).await
        }
    }
}

fn build_registry(settings: &Settings) -> Result<IntegrationRegistry, BoxError> {
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let mut registry = IntegrationRegistry::new(Arc::new(ClassifierChain::new()));

    for integration in &settings.integrations {
        let context = integration.context(&PlainSecrets, sessions.clone())?;
        registry.register(Box::new(HealthCheckIntegration::new(
            context,
            integration.health.clone(),
        )));
    }
    Ok(registry)
}

fn list(registry: &IntegrationRegistry, json: bool) -> Result<(), BoxError> {
    if json {
        let summaries: Vec<IntegrationSummary<'_>> = registry
            .iter()
            .map(|integration| IntegrationSummary {
                id: &integration.identity().id,
                name: &integration.identity().name,
                url: &integration.identity().url,
                operations: integration.operations().names(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No integrations configured");
    }
    for integration in registry.iter() {
        let identity = integration.identity();
        println!("{}\t{}\t{}", identity.id, identity.name, identity.url);
    }
    Ok(())
}

async fn test(
    verifier: &ConnectionVerifier,
    targets: &[SharedIntegration],
    json: bool,
) -> Result<ExitCode, BoxError> {
    let mut reports = Vec::with_capacity(targets.len());
    for integration in targets {
        let result = verifier.test_connection(integration.as_ref()).await;
        reports.push(ConnectionReport {
            id: &integration.identity().id,
            name: &integration.identity().name,
            result,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            match report.result.error() {
                None => println!("{}\t{}\tok", report.id, report.name),
                Some(error) => println!("{}\t{}\tfailed: {}", report.id, report.name, error),
            }
        }
    }

    if reports.iter().all(|report| report.result.is_success()) {
        Ok(exit_codes::success())
    } else {
        Ok(exit_codes::failed())
    }
}
