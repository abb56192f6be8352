use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt::Write as _;
use std::fs::File;
use std::path::PathBuf;

use super::{DEFAULT_PORT, DEFAULT_SEED, DEFAULT_TRIALS, build_plan, run_http_server, this_year};
use crate::core::{
    FIRST_YEAR, LAST_YEAR, LogObserver, Plan, PlanConfig, PlanResult, RunResult, SweepSummary,
    UsFederal2024, historical_sweep, monte_carlo,
};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Retirement plan simulator for one- or two-person households (taxable, tax-deferred and tax-free accounts)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate the plan once with its configured rate method
    Run {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long, default_value_t = DEFAULT_SEED, help = "Seed for stochastic rates")]
        seed: u64,
    },
    /// Replay history from every start year that fits the plan
    Historical {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long, default_value_t = FIRST_YEAR, help = "Earliest start year to replay")]
        from: i32,
    },
    /// Run stochastic trials fit to a window of historical rates
    MonteCarlo {
        #[command(flatten)]
        plan: PlanArgs,
        #[arg(long, default_value_t = DEFAULT_TRIALS)]
        trials: usize,
        #[arg(long, default_value_t = FIRST_YEAR)]
        from: i32,
        #[arg(long, default_value_t = LAST_YEAR)]
        to: i32,
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long, help = "Plan configuration in TOML")]
    pub config: PathBuf,
    #[arg(
        long = "schedule",
        help = "Contribution schedule CSV; repeat once per individual, in household order"
    )]
    pub schedules: Vec<PathBuf>,
    #[arg(long, help = "First simulated year; defaults to this calendar year")]
    pub current_year: Option<i32>,
    #[arg(long, help = "Print JSON instead of a table")]
    pub json: bool,
}

impl PlanArgs {
    fn load(&self) -> PlanResult<Plan> {
        let config = PlanConfig::read(&self.config)?;
        let files = self
            .schedules
            .iter()
            .map(File::open)
            .collect::<Result<Vec<_>, _>>()?;
        build_plan(&config, self.current_year.unwrap_or_else(this_year), files)
    }
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Run { plan, seed } => {
            let loaded = plan.load().map_err(|e| e.to_string())?;
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut observer = LogObserver::new(loaded.household());
            let result = loaded
                .run_with(&mut rng, &UsFederal2024, &mut observer)
                .map_err(|e| e.to_string())?;
            if plan.json {
                print_json(&result)?;
            } else {
                print!("{}", render_run(&result));
            }
        }
        Command::Historical { plan, from } => {
            let loaded = plan.load().map_err(|e| e.to_string())?;
            let summary =
                historical_sweep(&loaded, from, &UsFederal2024).map_err(|e| e.to_string())?;
            report_summary(&summary, plan.json)?;
        }
        Command::MonteCarlo {
            plan,
            trials,
            from,
            to,
            seed,
        } => {
            let loaded = plan.load().map_err(|e| e.to_string())?;
            let summary = monte_carlo(&loaded, trials, from, to, seed, &UsFederal2024)
                .map_err(|e| e.to_string())?;
            report_summary(&summary, plan.json)?;
        }
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}"))?,
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{text}");
    Ok(())
}

fn report_summary(summary: &SweepSummary, json: bool) -> Result<(), String> {
    if json {
        return print_json(summary);
    }
    print!("{}", render_summary(summary));
    Ok(())
}

pub fn render_run(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>12} {:>12} {:>10} {:>8} {:>14}",
        "year", "target", "net", "tax", "irmaa", "balance"
    );
    for n in 0..result.years_simulated {
        let income = &result.ledger.income[n];
        let _ = writeln!(
            out,
            "{:>6} {:>12.0} {:>12.0} {:>10.0} {:>8.0} {:>14.0}",
            result.ledger.years[n],
            income.target,
            income.net,
            income.tax,
            income.irmaa,
            result.accounts.total(n)
        );
    }
    let _ = writeln!(
        out,
        "\nsuccess: {}\nestate: {:.0} nominal, {:.0} in today's dollars",
        if result.success { "yes" } else { "no" },
        result.estate.nominal,
        result.estate.todays_dollars
    );
    out
}

pub fn render_summary(summary: &SweepSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "runs: {}\nsuccess rate: {:.1}% ({} of {})",
        summary.runs,
        100.0 * summary.success_rate,
        summary.successes,
        summary.runs
    );
    let _ = writeln!(
        out,
        "estate (today's dollars): mean {:.0}, p10 {:.0}, median {:.0}, p90 {:.0}",
        summary.mean_estate, summary.p10_estate, summary.median_estate, summary.p90_estate
    );
    let failures: Vec<String> = summary
        .outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.label.to_string())
        .collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "failed: {}", failures.join(", "));
    }
    out
}
