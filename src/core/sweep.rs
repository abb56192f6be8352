use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;

use super::engine::{Plan, SilentObserver};
use super::error::{PlanError, PlanResult};
use super::rates::{FIRST_YEAR, LAST_YEAR, RateMethod, RateSource, historical_year};
use super::tax::TaxPolicy;
use super::types::{RateSeries, RunResult};

/// One scenario of a batch: a historical start year or a trial index.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub label: i32,
    pub success: bool,
    pub estate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub runs: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub mean_estate: f64,
    pub median_estate: f64,
    pub p10_estate: f64,
    pub p90_estate: f64,
    pub outcomes: Vec<Outcome>,
}

impl SweepSummary {
    fn from_outcomes(outcomes: Vec<Outcome>) -> Self {
        let runs = outcomes.len();
        let successes = outcomes.iter().filter(|o| o.success).count();
        let mut estates: Vec<f64> = outcomes.iter().map(|o| o.estate).collect();
        let mean_estate = if runs == 0 {
            0.0
        } else {
            estates.iter().sum::<f64>() / runs as f64
        };
        let p10_estate = percentile(&mut estates, 10.0);
        let median_estate = percentile(&mut estates, 50.0);
        let p90_estate = percentile(&mut estates, 90.0);
        Self {
            runs,
            successes,
            success_rate: if runs == 0 {
                0.0
            } else {
                successes as f64 / runs as f64
            },
            mean_estate,
            median_estate,
            p10_estate,
            p90_estate,
            outcomes,
        }
    }
}

/// Folds one scenario into an outcome. A solver that gives up fails that
/// scenario only; any other error aborts the batch.
fn outcome(label: i32, run: PlanResult<RunResult>) -> PlanResult<Outcome> {
    match run {
        Ok(result) => Ok(Outcome {
            label,
            success: result.success,
            estate: result.estate.todays_dollars,
        }),
        Err(e @ PlanError::SolverDidNotConverge { .. }) => {
            log::warn!("scenario {label} failed: {e}");
            Ok(Outcome {
                label,
                success: false,
                estate: 0.0,
            })
        }
        Err(e) => Err(e),
    }
}

/// Replays history from every start year on or after `from` that leaves
/// enough recorded years for the whole plan.
pub fn historical_sweep(plan: &Plan, from: i32, tax: &dyn TaxPolicy) -> PlanResult<SweepSummary> {
    let years = plan.household().max_horizon();
    if from < FIRST_YEAR {
        return Err(PlanError::YearRangeOutOfBounds {
            from,
            to: LAST_YEAR,
            min: FIRST_YEAR,
            max: LAST_YEAR,
        });
    }
    let last_start = LAST_YEAR - years as i32 + 1;
    if from > last_start {
        return Err(PlanError::EmptySweep { from, years });
    }

    let current_year = plan.household().current_year();
    let outcomes = (from..=last_start)
        .into_par_iter()
        .map(|start| {
            let series = replay(start, current_year, years)?;
            outcome(start, plan.run(&series, tax, &mut SilentObserver))
        })
        .collect::<PlanResult<Vec<_>>>()?;

    let summary = SweepSummary::from_outcomes(outcomes);
    log::info!(
        "historical sweep {from}-{last_start}: {} of {} succeeded, median estate {:.0}",
        summary.successes,
        summary.runs,
        summary.median_estate
    );
    Ok(summary)
}

fn replay(start: i32, current_year: i32, years: usize) -> PlanResult<RateSeries> {
    let rows = (0..years as i32)
        .map(|k| historical_year(start + k))
        .collect::<Option<Vec<_>>>()
        .ok_or(PlanError::EmptySweep { from: start, years })?;
    Ok(RateSeries::new(current_year, rows))
}

/// Runs `trials` scenarios with rates drawn from the statistics of the
/// `from`..=`to` window. Each trial seeds its own generator, so results do
/// not depend on how trials are spread over threads.
pub fn monte_carlo(
    plan: &Plan,
    trials: usize,
    from: i32,
    to: i32,
    seed: u64,
    tax: &dyn TaxPolicy,
) -> PlanResult<SweepSummary> {
    if trials == 0 {
        return Err(PlanError::NoTrials);
    }
    let source = RateSource::new(RateMethod::Stochastic { from, to })?;
    let current_year = plan.household().current_year();
    let years = plan.household().max_horizon();

    let outcomes = (0..trials)
        .into_par_iter()
        .map(|trial| {
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, trial as u64));
            let series = source.gen_series(current_year, years, &mut rng);
            outcome(trial as i32, plan.run(&series, tax, &mut SilentObserver))
        })
        .collect::<PlanResult<Vec<_>>>()?;

    let summary = SweepSummary::from_outcomes(outcomes);
    log::info!(
        "monte carlo {from}-{to}, {trials} trials: success rate {:.1}%, median estate {:.0}",
        100.0 * summary.success_rate,
        summary.median_estate
    );
    Ok(summary)
}

fn derive_seed(base_seed: u64, trial: u64) -> u64 {
    splitmix64(base_seed ^ trial.rotate_left(32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Linear interpolation between order statistics; sorts `values`.
fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    if values.len() == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (values.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let w = rank - lower as f64;
    values[lower] * (1.0 - w) + values[upper] * w
}
