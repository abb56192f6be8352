use thiserror::Error;

/// Errors that abort a plan before or during a run.
///
/// Funding shortfalls are not errors; they clear `RunResult::success`.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("household must have 1 or 2 individuals, got {0}")]
    InvalidCount(usize),

    #[error("{field} must be between 0 and 1, got {value}")]
    FractionOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be >= 0, got {value}")]
    NegativeAmount { field: &'static str, value: f64 },

    #[error("{field} expects {expected} entries (one per individual), got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{name} reaches life expectancy in {end_year}, before the current year {current_year}")]
    InvalidHorizon {
        name: String,
        end_year: i32,
        current_year: i32,
    },

    #[error("allocation ratio {values:?} sums to {sum}, expected 1")]
    RatioSum { values: [f64; 4], sum: f64 },

    #[error("allocation ratio component {index} is {value}; components must be within [0, 1]")]
    RatioComponent { index: usize, value: f64 },

    #[error("unknown {field} keyword '{value}'")]
    UnknownKeyword { field: &'static str, value: String },

    #[error("rate year range {from}-{to} is outside the supported window {min}-{max}")]
    YearRangeOutOfBounds {
        from: i32,
        to: i32,
        min: i32,
        max: i32,
    },

    #[error("fixed rate method requires 4 explicit values")]
    MissingFixedRates,

    #[error("rate series has {actual} years, plan needs {required}")]
    RateSeriesTooShort { actual: usize, required: usize },

    #[error("contribution schedule for {name}: {reason}")]
    Schedule { name: String, reason: String },

    #[error("contribution schedule for {name} ends in {ends}, must cover through {required}")]
    ScheduleTooShort {
        name: String,
        ends: i32,
        required: i32,
    },

    #[error("contribution schedules start on different years ({first} vs {second})")]
    ScheduleStartMismatch { first: i32, second: i32 },

    #[error(
        "withdrawal solver did not converge in {rounds} rounds for year {year}, \
         individual {individual}: target {target:.2}, withdrawal {withdrawal:.2}, \
         residual {delta:.2}"
    )]
    SolverDidNotConverge {
        year: i32,
        /// Index of the individual carrying most of the withdrawal.
        individual: usize,
        target: f64,
        withdrawal: f64,
        delta: f64,
        rounds: usize,
    },

    #[error("no historical start year from {from} fits a {years}-year horizon")]
    EmptySweep { from: i32, years: usize },

    #[error("monte carlo needs at least one trial")]
    NoTrials,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("invalid plan config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("could not write plan config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;
