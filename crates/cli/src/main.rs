use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use provisioner_api::{ClientConfig, CloudCapability, CloudOperation, InMemoryCloud, RestCloudClient, SIMULATED_SUBSCRIPTION_ID};
use provisioner_engine::{Orchestrator, SampleSettings, managed_identity_vm_plan, sample::DEFAULT_REGION};
use provisioner_types::RunReport;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod report;

/// Provision the managed-identity virtual machine scenario and tear it down again.
#[derive(Parser, Debug)]
#[command(name = "provisioner", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scenario end to end; everything created is deleted before exiting
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Region to create resources in
    #[arg(long, env = "PROVISION_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// Name of the primary resource group
    #[arg(long)]
    primary_group: Option<String>,

    /// Use the in-process simulated cloud instead of the management API
    #[arg(long)]
    simulate: bool,

    /// Make every call to this operation fail (simulation only)
    #[arg(long, value_name = "OPERATION", requires = "simulate")]
    fail_operation: Option<CloudOperation>,

    /// Print the full report as JSON instead of the step log
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let Cli { command } = Cli::parse();
    match command {
        Command::Run(args) => run(args).await,
    }
}

/// Diagnostics go to stderr so stdout carries only the step log.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let report = provision(&args).await?;

    if args.json {
        let report = report::redacted(&report);
        println!("{}", serde_json::to_string_pretty(&report).context("failed to serialize run report")?);
    } else {
        print!("{}", report::render(&report));
    }

    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(1)))
}

async fn provision(args: &RunArgs) -> Result<RunReport> {
    let (cloud, subscription_id) = build_cloud(args)?;

    let mut settings = SampleSettings::generate(&args.region, subscription_id);
    if let Some(primary_group) = &args.primary_group {
        settings = settings.with_primary_group(primary_group);
    }
    info!(region = %settings.region, primary_group = %settings.primary_group, simulate = args.simulate, "building plan");
    let plan = managed_identity_vm_plan(cloud, &settings).context("failed to build the provisioning plan")?;

    let orchestrator = Orchestrator::new();
    let token = orchestrator.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; abandoning the current step, then tearing down");
            token.cancel();
        }
    });

    let report = orchestrator.run(plan).await;
    interrupt.abort();
    Ok(report)
}

fn build_cloud(args: &RunArgs) -> Result<(Arc<dyn CloudCapability>, String)> {
    if args.simulate {
        let mut cloud = InMemoryCloud::new();
        if let Some(operation) = args.fail_operation {
            cloud = cloud.fail_operation(operation, "injected failure");
        }
        return Ok((Arc::new(cloud), SIMULATED_SUBSCRIPTION_ID.to_string()));
    }

    let config = ClientConfig::from_env().context("failed to load cloud configuration")?;
    let subscription_id = config.subscription_id.clone();
    let client = RestCloudClient::new(config).context("failed to create management client")?;
    Ok((Arc::new(client), subscription_id))
}
