//! `respond check` -- validate a scenario file.
//!
//! # Example
//!
//! ```text
//! respond check --scenario scenario.json
//! ```

use clap::Args;

use respond_types::config::{ScenarioConfig, UpstreamSpec};

use super::load_scenario;

/// Arguments for the `respond check` subcommand.
#[derive(Args)]
pub struct CheckArgs {
    /// Path to the scenario JSON file.
    #[arg(short, long)]
    pub scenario: String,
}

/// Run the check command.
pub async fn run(args: CheckArgs) -> anyhow::Result<()> {
    let scenario = load_scenario(&args.scenario).await?;
    println!("{}", summary(&scenario));
    Ok(())
}

fn summary(scenario: &ScenarioConfig) -> String {
    let upstream = match &scenario.upstream {
        UpstreamSpec::Response { response } => format!("response {}", response.status),
        UpstreamSpec::Error { kind, .. } => format!("error '{kind}'"),
        UpstreamSpec::WebError { response } => format!("web error {}", response.status),
        UpstreamSpec::Cancelled => "cancelled".to_string(),
    };
    format!(
        "scenario ok: upstream {upstream}, {} stage(s), {} mapper(s)",
        scenario.stages.len(),
        scenario.mappers.len()
    )
}
