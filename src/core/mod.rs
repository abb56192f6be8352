mod allocation;
mod banking;
mod config;
mod engine;
mod error;
mod rates;
mod schedule;
mod sweep;
mod tax;
mod types;

pub use allocation::{
    AllocationRatio, AllocationSchedule, CoordinationScope, Interpolation, default_bounds,
    split_target,
};
pub use banking::{BankingResult, Itemized, apply as bank, itemize};
pub use config::{
    AccountRatios, AllocationSection, BalancesSection, BenefitSection, BeneficiarySection,
    CoordinationSection, HouseholdSection, ParametersSection, PlanConfig, RatesSection,
};
pub use engine::{
    LogObserver, Notice, Observer, Plan, RecordingObserver, SOLVER_MAX_ROUNDS, SilentObserver,
};
pub use error::{PlanError, PlanResult};
pub use rates::{FIRST_YEAR, LAST_YEAR, RateMethod, RateSource, historical_year};
pub use schedule::{ContributionSchedule, ScheduleRow, check_schedules};
pub use sweep::{Outcome, SweepSummary, historical_sweep, monte_carlo};
pub use tax::{TaxPolicy, UsFederal2024, inflation_adjusted};
pub use types::{
    AccountSet, AccountType, Benefit, BigTicketPayer, Buckets, Estate, FilingStatus, Household,
    IncomeRow, Individual, RateSeries, RunResult, SourceRow, SpendingProfile, SpousalSplit,
    YearRates, YearlyLedger,
};
