use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Datelike;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    ContributionSchedule, FIRST_YEAR, LAST_YEAR, Notice, Plan, PlanConfig, PlanError, PlanResult,
    RecordingObserver, RunResult, SweepSummary, UsFederal2024, historical_sweep, monte_carlo,
};

pub mod cli;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TRIALS: usize = 1000;

/// Calendar year plans start in unless told otherwise.
pub fn this_year() -> i32 {
    chrono::Local::now().year()
}

/// Builds a plan from its config and one CSV schedule per individual.
/// Without schedules every contribution stays at zero.
pub fn build_plan<R: Read>(
    config: &PlanConfig,
    current_year: i32,
    schedules: Vec<R>,
) -> PlanResult<Plan> {
    let mut plan = config.to_plan(current_year)?;
    if schedules.is_empty() {
        return Ok(plan);
    }
    let count = plan.household().count();
    if schedules.len() != count {
        return Err(PlanError::WrongLength {
            field: "contribution schedules",
            expected: count,
            actual: schedules.len(),
        });
    }

    let start = plan.household().current_year();
    let loaded = schedules
        .into_iter()
        .enumerate()
        .map(|(who, reader)| {
            let name = &plan.household().individual(who).name;
            ContributionSchedule::from_csv_reader(name, reader, start)
        })
        .collect::<PlanResult<Vec<_>>>()?;
    plan.set_schedules(loaded)?;
    Ok(plan)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanPayload {
    #[serde(flatten)]
    config: PlanConfig,
    /// CSV text, one schedule per individual.
    #[serde(default)]
    schedules: Vec<String>,
    current_year: Option<i32>,
}

impl PlanPayload {
    fn plan(&self) -> PlanResult<Plan> {
        let readers: Vec<&[u8]> = self.schedules.iter().map(|s| s.as_bytes()).collect();
        build_plan(&self.config, self.current_year.unwrap_or_else(this_year), readers)
    }
}

#[derive(Debug, Deserialize)]
struct SimulatePayload {
    #[serde(flatten)]
    plan: PlanPayload,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPayload {
    #[serde(flatten)]
    plan: PlanPayload,
    from: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct MonteCarloPayload {
    #[serde(flatten)]
    plan: PlanPayload,
    trials: Option<usize>,
    from: Option<i32>,
    to: Option<i32>,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    notices: Vec<Notice>,
    #[serde(flatten)]
    result: RunResult,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/historical", post(historical_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("nestegg HTTP API listening on http://{addr}");
    log::info!("Local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(payload): Json<SimulatePayload>) -> Response {
    respond(simulate(&payload))
}

// Sweeps fan out on rayon; keep them off the async workers.
async fn historical_handler(Json(payload): Json<HistoricalPayload>) -> Response {
    respond_blocking(move || historical(&payload)).await
}

async fn monte_carlo_handler(Json(payload): Json<MonteCarloPayload>) -> Response {
    respond_blocking(move || monte_carlo_trials(&payload)).await
}

fn simulate(payload: &SimulatePayload) -> PlanResult<SimulateResponse> {
    let plan = payload.plan.plan()?;
    let mut rng = ChaCha8Rng::seed_from_u64(payload.seed.unwrap_or(DEFAULT_SEED));
    let mut observer = RecordingObserver::default();
    let result = plan.run_with(&mut rng, &UsFederal2024, &mut observer)?;
    Ok(SimulateResponse {
        notices: observer.notices,
        result,
    })
}

fn historical(payload: &HistoricalPayload) -> PlanResult<SweepSummary> {
    let plan = payload.plan.plan()?;
    historical_sweep(&plan, payload.from.unwrap_or(FIRST_YEAR), &UsFederal2024)
}

fn monte_carlo_trials(payload: &MonteCarloPayload) -> PlanResult<SweepSummary> {
    let plan = payload.plan.plan()?;
    monte_carlo(
        &plan,
        payload.trials.unwrap_or(DEFAULT_TRIALS),
        payload.from.unwrap_or(FIRST_YEAR),
        payload.to.unwrap_or(LAST_YEAR),
        payload.seed.unwrap_or(DEFAULT_SEED),
        &UsFederal2024,
    )
}

async fn respond_blocking<T, F>(work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> PlanResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => respond(result),
        Err(e) => {
            log::error!("sweep worker failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "sweep worker failed")
        }
    }
}

fn respond<T: Serialize>(result: PlanResult<T>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => error_response(status_for(&e), &e.to_string()),
    }
}

fn status_for(error: &PlanError) -> StatusCode {
    match error {
        PlanError::SolverDidNotConverge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PlanError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BigTicketPayer, SpendingProfile};
    use serde_json::{Value, json};

    fn sample_payload() -> Value {
        json!({
            "household": {
                "names": ["Ann"],
                "birth_years": [1960],
                "life_expectancy": [70],
                "current_year": 2025
            },
            "beneficiary": { "fractions": [1.0] },
            "pension": { "amounts": [0.0], "ages": [65] },
            "social_security": { "amounts": [20000.0], "ages": [67] },
            "balances": {
                "taxable": [100000.0],
                "tax_deferred": [400000.0],
                "tax_free": [50000.0]
            },
            "allocation": {
                "interpolation": "linear",
                "initial": {
                    "taxable": [[0.0, 25.0, 50.0, 25.0]],
                    "tax_deferred": [[60.0, 40.0, 0.0, 0.0]],
                    "tax_free": [[60.0, 40.0, 0.0, 0.0]]
                },
                "final": {
                    "taxable": [[0.0, 25.0, 50.0, 25.0]],
                    "tax_deferred": [[50.0, 50.0, 0.0, 0.0]],
                    "tax_free": [[60.0, 40.0, 0.0, 0.0]]
                }
            },
            "parameters": {
                "target": 40000.0,
                "profile": "flat",
                "survivor_fraction": 0.6,
                "estate_tax_rate": 25.0,
                "spousal_split": "auto"
            },
            "rates": { "method": "default", "from": 1928, "to": 2022 }
        })
    }

    fn status_of(response: Response) -> StatusCode {
        response.status()
    }

    #[test]
    fn payload_parses_into_a_plan() {
        let payload: SimulatePayload = serde_json::from_value(sample_payload()).unwrap();
        assert!(payload.seed.is_none());
        let plan = payload.plan.plan().expect("valid plan");
        assert_eq!(plan.household().current_year(), 2025);
        assert_eq!(plan.profile(), SpendingProfile::Flat);
        assert_eq!(plan.big_ticket_payer(), BigTicketPayer::Other);
    }

    #[test]
    fn simulate_reports_every_year_of_the_horizon() {
        let payload: SimulatePayload = serde_json::from_value(sample_payload()).unwrap();
        let response = simulate(&payload).expect("run succeeds");
        assert!(response.result.success);
        // Horizon 2025..=2030 plus the year of death.
        assert_eq!(response.result.years_simulated, 6);

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["success"], Value::Bool(true));
        assert!(body["notices"].is_array());
        assert!(body["estate"]["todaysDollars"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn inline_schedules_are_loaded() {
        let mut value = sample_payload();
        value["schedules"] = json!([
            "year,anticipated income,Roth X\n2025,10000,5000\n2026,0,0\n2027,0,0\n2028,0,0\n2029,0,0\n2030,0,0\n2031,0,0\n2032,0,0\n"
        ]);
        let payload: SimulatePayload = serde_json::from_value(value).unwrap();
        let plan = payload.plan.plan().unwrap();
        assert_eq!(plan.schedules()[0].row(0).roth_conversion, 5_000.0);
        assert_eq!(plan.schedules()[0].row(0).anticipated_income, 10_000.0);
    }

    #[test]
    fn schedules_must_match_the_household() {
        let mut value = sample_payload();
        value["schedules"] = json!(["year\n2025\n", "year\n2025\n"]);
        let payload: SimulatePayload = serde_json::from_value(value).unwrap();
        assert!(matches!(
            payload.plan.plan(),
            Err(PlanError::WrongLength {
                field: "contribution schedules",
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn configuration_errors_map_to_bad_request() {
        let mut value = sample_payload();
        value["parameters"]["survivor_fraction"] = json!(1.5);
        let payload: SimulatePayload = serde_json::from_value(value).unwrap();
        let err = simulate(&payload).unwrap_err();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("survivor fraction"));

        let response = respond::<SweepSummary>(Err(err));
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(status_of(response), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn monte_carlo_payload_uses_defaults_when_absent() {
        let mut value = sample_payload();
        value["trials"] = json!(16);
        value["seed"] = json!(3);
        let payload: MonteCarloPayload = serde_json::from_value(value).unwrap();
        assert_eq!(payload.from, None);

        let summary = monte_carlo_trials(&payload).unwrap();
        assert_eq!(summary.runs, 16);
        assert_eq!(summary, monte_carlo_trials(&payload).unwrap());
    }

    #[test]
    fn historical_payload_sweeps_from_the_requested_year() {
        let mut value = sample_payload();
        value["from"] = json!(2010);
        let payload: HistoricalPayload = serde_json::from_value(value).unwrap();
        let summary = historical(&payload).unwrap();
        // A 7-year table fits every start year from 2010 through 2016.
        assert_eq!(summary.runs, 7);
        assert_eq!(summary.outcomes[0].label, 2010);
    }

    #[tokio::test]
    async fn unknown_routes_return_json_not_found() {
        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let health = health_handler().await;
        assert_eq!(health.status(), StatusCode::OK);
    }
}
