use rand::Rng;
use serde::Serialize;

use super::allocation::{AllocationRatio, AllocationSchedule};
use super::banking;
use super::error::{PlanError, PlanResult};
use super::rates::{RateMethod, RateSource};
use super::schedule::{ContributionSchedule, check_schedules};
use super::tax::{TaxPolicy, inflation_adjusted};
use super::types::{
    AccountSet, AccountType, BigTicketPayer, Buckets, Estate, FilingStatus, Household,
    RateSeries, RunResult, SpendingProfile, SpousalSplit, YearlyLedger,
};

/// Rounds the withdrawal solver may take before giving up.
pub const SOLVER_MAX_ROUNDS: usize = 32;
/// Net income this close below target counts as solved.
pub const SOLVER_TOLERANCE: f64 = 1.0;
/// Funds moved this close to the request count as fully delivered.
pub const SHORTFALL_TOLERANCE: f64 = 1.0;
/// Added to income and balance denominators of the spousal split.
pub const SPLIT_EPSILON: f64 = 1.0;
/// Share of Social Security benefits subject to income tax.
pub const SS_TAXABLE_SHARE: f64 = 0.85;
pub const DEFAULT_SURVIVOR_FRACTION: f64 = 0.6;
pub const DEFAULT_ESTATE_TAX_RATE: f64 = 0.25;

/// Something worth reporting that happened during a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notice {
    RothShortfall {
        year: i32,
        who: usize,
        requested: f64,
        performed: f64,
    },
    BigTicketShortfall {
        year: i32,
        who: usize,
        requested: f64,
        performed: f64,
    },
    FundsExhausted {
        year: i32,
        target: f64,
        requested: f64,
        moved: f64,
    },
    AccountsExhausted {
        year: i32,
        who: usize,
        shortfall: f64,
    },
    SolverConverged {
        year: i32,
        rounds: usize,
        delta: f64,
    },
    SurplusDeposited {
        year: i32,
        amount: f64,
        split: f64,
    },
    Deceased {
        year: i32,
        who: usize,
    },
    WealthTransferred {
        year: i32,
        from: usize,
        to: usize,
        fraction: f64,
        amount: f64,
        dropped: f64,
    },
}

impl Notice {
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Notice::RothShortfall { .. }
                | Notice::BigTicketShortfall { .. }
                | Notice::FundsExhausted { .. }
                | Notice::AccountsExhausted { .. }
        )
    }
}

/// Receives the notices of a run in the order they happen.
pub trait Observer {
    fn notice(&mut self, notice: Notice);
}

/// Forwards notices to the `log` facade.
#[derive(Clone, Debug, Default)]
pub struct LogObserver {
    names: Vec<String>,
}

impl LogObserver {
    pub fn new(household: &Household) -> Self {
        Self {
            names: household
                .individuals()
                .iter()
                .map(|p| p.name.clone())
                .collect(),
        }
    }

    fn name(&self, who: usize) -> String {
        self.names
            .get(who)
            .cloned()
            .unwrap_or_else(|| format!("individual {who}"))
    }
}

impl Observer for LogObserver {
    fn notice(&mut self, notice: Notice) {
        match notice {
            Notice::RothShortfall {
                year,
                who,
                requested,
                performed,
            } => log::warn!(
                "{year}: insufficient funds for Roth conversion for {}: requested {requested:.0}, performed {performed:.0}",
                self.name(who)
            ),
            Notice::BigTicketShortfall {
                year,
                who,
                requested,
                performed,
            } => log::warn!(
                "{year}: insufficient funds for big-ticket item of {}: requested {requested:.0}, performed {performed:.0}",
                self.name(who)
            ),
            Notice::FundsExhausted {
                year,
                target,
                requested,
                moved,
            } => log::warn!(
                "{year}: running out of money: target {target:.0}, withdrawal {requested:.0}, available {moved:.0}"
            ),
            Notice::AccountsExhausted {
                year,
                who,
                shortfall,
            } => log::warn!(
                "{year}: all accounts of {} exhausted, short of {shortfall:.0}",
                self.name(who)
            ),
            Notice::SolverConverged {
                year,
                rounds,
                delta,
            } => log::debug!("{year}: withdrawal solved in {rounds} round(s), delta {delta:.2}"),
            Notice::SurplusDeposited {
                year,
                amount,
                split,
            } => log::debug!("{year}: deposited {amount:.0} in taxable accounts, split {split:.2}"),
            Notice::Deceased { year, who } => {
                log::debug!("{year}: {} has passed", self.name(who))
            }
            Notice::WealthTransferred {
                year,
                from,
                to,
                fraction,
                amount,
                ..
            } => log::debug!(
                "{year}: transferred {amount:.0} ({fraction}) of {}'s wealth to {}",
                self.name(from),
                self.name(to)
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SilentObserver;

impl Observer for SilentObserver {
    fn notice(&mut self, _notice: Notice) {}
}

#[derive(Clone, Debug, Default)]
pub struct RecordingObserver {
    pub notices: Vec<Notice>,
}

impl RecordingObserver {
    pub fn warnings(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(|n| n.is_warning())
    }
}

impl Observer for RecordingObserver {
    fn notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

/// Everything needed to simulate one household.
///
/// `run` never mutates a plan, so one plan can back any number of runs
/// and sweeps share it across threads.
#[derive(Clone, Debug)]
pub struct Plan {
    household: Household,
    balances: Vec<Buckets>,
    allocation: AllocationSchedule,
    schedules: Vec<ContributionSchedule>,
    target: f64,
    profile: SpendingProfile,
    survivor_fraction: f64,
    estate_tax_rate: f64,
    spousal_split: SpousalSplit,
    big_ticket_payer: BigTicketPayer,
    rate_source: RateSource,
}

impl Plan {
    pub fn new(household: Household, balances: Vec<Buckets>) -> PlanResult<Self> {
        if balances.len() != household.count() {
            return Err(PlanError::WrongLength {
                field: "account balances",
                expected: household.count(),
                actual: balances.len(),
            });
        }
        for b in &balances {
            for account in AccountType::ALL {
                if b.get(account) < 0.0 {
                    return Err(PlanError::NegativeAmount {
                        field: "account balance",
                        value: b.get(account),
                    });
                }
            }
        }

        let years = household.max_horizon();
        let allocation = AllocationSchedule::new(household.horizons(), years);
        let schedules = (0..household.count())
            .map(|_| ContributionSchedule::zeros(household.current_year(), years))
            .collect();
        Ok(Self {
            household,
            balances,
            allocation,
            schedules,
            target: 0.0,
            profile: SpendingProfile::Flat,
            survivor_fraction: DEFAULT_SURVIVOR_FRACTION,
            estate_tax_rate: DEFAULT_ESTATE_TAX_RATE,
            spousal_split: SpousalSplit::Auto,
            big_ticket_payer: BigTicketPayer::Other,
            rate_source: RateSource::new(RateMethod::Default)?,
        })
    }

    pub fn household(&self) -> &Household {
        &self.household
    }

    pub fn balances(&self) -> &[Buckets] {
        &self.balances
    }

    pub fn allocation(&self) -> &AllocationSchedule {
        &self.allocation
    }

    pub fn allocation_mut(&mut self) -> &mut AllocationSchedule {
        &mut self.allocation
    }

    pub fn schedules(&self) -> &[ContributionSchedule] {
        &self.schedules
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn profile(&self) -> SpendingProfile {
        self.profile
    }

    pub fn survivor_fraction(&self) -> f64 {
        self.survivor_fraction
    }

    pub fn estate_tax_rate(&self) -> f64 {
        self.estate_tax_rate
    }

    pub fn spousal_split(&self) -> SpousalSplit {
        self.spousal_split
    }

    pub fn big_ticket_payer(&self) -> BigTicketPayer {
        self.big_ticket_payer
    }

    pub fn rate_source(&self) -> &RateSource {
        &self.rate_source
    }

    pub fn set_target_income(&mut self, income: f64, profile: SpendingProfile) -> PlanResult<()> {
        if income < 0.0 {
            return Err(PlanError::NegativeAmount {
                field: "target income",
                value: income,
            });
        }
        self.target = income;
        self.profile = profile;
        log::debug!("target net income {income:.0} with a {profile} profile");
        Ok(())
    }

    pub fn set_survivor_fraction(&mut self, fraction: f64) -> PlanResult<()> {
        self.survivor_fraction = check_fraction("survivor fraction", fraction)?;
        Ok(())
    }

    pub fn set_estate_tax_rate(&mut self, rate: f64) -> PlanResult<()> {
        self.estate_tax_rate = check_fraction("estate tax rate", rate)?;
        Ok(())
    }

    pub fn set_spousal_split(&mut self, split: SpousalSplit) -> PlanResult<()> {
        if let SpousalSplit::Fixed(x) = split {
            check_fraction("spousal split", x)?;
        }
        self.spousal_split = split;
        Ok(())
    }

    pub fn set_big_ticket_payer(&mut self, payer: BigTicketPayer) {
        self.big_ticket_payer = payer;
    }

    pub fn set_schedules(&mut self, schedules: Vec<ContributionSchedule>) -> PlanResult<()> {
        check_schedules(&self.household, &schedules)?;
        self.schedules = schedules;
        Ok(())
    }

    pub fn set_allocation(&mut self, allocation: AllocationSchedule) -> PlanResult<()> {
        if allocation.count() != self.household.count() {
            return Err(PlanError::WrongLength {
                field: "allocation schedule",
                expected: self.household.count(),
                actual: allocation.count(),
            });
        }
        self.allocation = allocation;
        Ok(())
    }

    pub fn set_rates(&mut self, method: RateMethod) -> PlanResult<()> {
        self.rate_source = RateSource::new(method)?;
        Ok(())
    }

    /// Draws a rate series from the plan's rate method and runs it.
    pub fn run_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        tax: &dyn TaxPolicy,
        observer: &mut dyn Observer,
    ) -> PlanResult<RunResult> {
        let series = self.rate_source.gen_series(
            self.household.current_year(),
            self.household.max_horizon(),
            rng,
        );
        self.run(&series, tax, observer)
    }

    /// Simulates every year until the last individual's horizon.
    pub fn run(
        &self,
        rates: &RateSeries,
        tax: &dyn TaxPolicy,
        observer: &mut dyn Observer,
    ) -> PlanResult<RunResult> {
        let required = self.household.max_horizon();
        if rates.len() < required {
            return Err(PlanError::RateSeriesTooShort {
                actual: rates.len(),
                required,
            });
        }
        Simulation::new(self, rates, tax, observer).run()
    }
}

/// Individual carrying the larger share of a split request.
fn carrier(split: f64, count: usize) -> usize {
    if count == 1 || split >= 0.5 { 0 } else { 1 }
}

fn check_fraction(field: &'static str, value: f64) -> PlanResult<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PlanError::FractionOutOfRange { field, value });
    }
    Ok(value)
}

/// Household income booked so far in the current year.
#[derive(Clone, Copy, Debug, Default)]
struct YearIncome {
    taxable: f64,
    tax_free: f64,
    roth_conversion: f64,
    /// Tax-deferred money pulled out to fund big-ticket items.
    big_ticket_taxable: f64,
}

impl YearIncome {
    fn gross(&self) -> f64 {
        self.taxable + self.roth_conversion + self.big_ticket_taxable
    }
}

struct Simulation<'a> {
    plan: &'a Plan,
    rates: &'a RateSeries,
    tax: &'a dyn TaxPolicy,
    observer: &'a mut dyn Observer,
    accounts: AccountSet,
    ledger: YearlyLedger,
    alive: Vec<bool>,
    status: FilingStatus,
    raw_target: f64,
    /// Split toward the sole survivor once a spouse has died.
    survivor_split: Option<f64>,
    success: bool,
}

impl<'a> Simulation<'a> {
    fn new(
        plan: &'a Plan,
        rates: &'a RateSeries,
        tax: &'a dyn TaxPolicy,
        observer: &'a mut dyn Observer,
    ) -> Self {
        let household = &plan.household;
        let years = household.max_horizon();
        Self {
            plan,
            rates,
            tax,
            observer,
            accounts: AccountSet::new(years, &plan.balances),
            ledger: YearlyLedger::new(household.current_year(), years, household.count()),
            alive: vec![true; household.count()],
            status: household.filing_status(),
            raw_target: plan.target,
            survivor_split: None,
            success: true,
        }
    }

    fn run(mut self) -> PlanResult<RunResult> {
        let plan = self.plan;
        let household = &plan.household;
        let last = household.max_horizon() - 1;
        log::debug!(
            "simulating {} years from {}",
            last,
            household.current_year()
        );

        for n in 0..last {
            let mut income = YearIncome::default();
            let living: Vec<usize> = (0..household.count())
                .filter(|&who| n <= household.horizon(who))
                .collect();

            for &who in &living {
                self.convert_to_roth(n, who, &mut income);
            }
            let ratios = plan.allocation.ratios_for_year(n, self.accounts.row(n));
            for &who in &living {
                self.grow_accounts(n, who, &ratios[who], &mut income);
                self.fixed_income(n, who, &mut income);
            }
            for &who in &living {
                self.big_ticket(n, who, &mut income);
            }

            self.reconcile(n, &mut income)?;

            if self.year_end(n) {
                return Ok(self.finish(n));
            }
        }
        Ok(self.finish(last - 1))
    }

    fn year(&self, n: usize) -> i32 {
        self.plan.household.year(n)
    }

    fn convert_to_roth(&mut self, n: usize, who: usize, income: &mut YearIncome) {
        let requested = self.plan.schedules[who].row(n).roth_conversion;
        if requested <= 0.0 {
            return;
        }
        let balances = self.accounts.get_mut(n, who);
        let performed = requested.min(balances.tax_deferred);
        balances.tax_deferred -= performed;
        balances.tax_free += performed;
        self.ledger.sources[n][who].roth_conversion = performed;
        income.roth_conversion += performed;

        if performed < requested {
            let year = self.year(n);
            self.observer.notice(Notice::RothShortfall {
                year,
                who,
                requested,
                performed,
            });
        }
    }

    /// Growth treats contributions as made mid-year.
    fn grow_accounts(
        &mut self,
        n: usize,
        who: usize,
        ratios: &[AllocationRatio; 3],
        income: &mut YearIncome,
    ) {
        let row = self.plan.schedules[who].row(n);
        let rates = self.rates.get(n);
        let year = self.year(n);
        let birth_year = self.plan.household.individual(who).birth_year;
        let start = *self.accounts.get(n, who);
        let source = &mut self.ledger.sources[n][who];

        if row.anticipated_income > 0.0 {
            source.job += row.anticipated_income;
            income.taxable += row.anticipated_income;
        }

        let [taxable_mix, deferred_mix, free_mix] = ratios;

        let ctrb = row.ctrb_taxable;
        let growth = (start.taxable + 0.5 * ctrb) * taxable_mix.dot(&rates);
        // Losses offset income; gains are left untaxed.
        source.dividends = growth.min(0.0);
        income.taxable += growth.min(0.0);
        let taxable = start.taxable + ctrb + growth;

        let ctrb = row.tax_deferred_contribution();
        let growth = (start.tax_deferred + 0.5 * ctrb) * deferred_mix.dot(&rates);
        let grown = (start.tax_deferred + ctrb + growth).max(0.0);
        let rmd = grown * self.tax.rmd_fraction(year, birth_year);
        source.rmd = rmd;
        income.taxable += rmd;
        let tax_deferred = grown - rmd;

        let ctrb = row.tax_free_contribution();
        let growth = (start.tax_free + 0.5 * ctrb) * free_mix.dot(&rates);
        let tax_free = start.tax_free + ctrb + growth;

        // Entries may already hold an inheritance.
        let next = self.accounts.get_mut(n + 1, who);
        next.taxable = (next.taxable + taxable).max(0.0);
        next.tax_deferred = (next.tax_deferred + tax_deferred).max(0.0);
        next.tax_free = (next.tax_free + tax_free).max(0.0);
    }

    fn fixed_income(&mut self, n: usize, who: usize, income: &mut YearIncome) {
        let household = &self.plan.household;
        let person = household.individual(who);
        let age = household.age(who, n);

        let pension = if age >= person.pension.start_age {
            person.pension.amount
        } else {
            0.0
        };

        let benefit = person.social_security;
        let social_security = if benefit.amount > 0.0 && age >= benefit.start_age {
            // Indexed from the year benefits start, or from now if they
            // started already.
            let started = person.birth_year + benefit.start_age - household.current_year();
            inflation_adjusted(benefit.amount, n, self.rates, started.max(0) as usize)
        } else {
            0.0
        };

        let source = &mut self.ledger.sources[n][who];
        source.pension = pension;
        source.social_security = social_security;
        income.taxable += pension + SS_TAXABLE_SHARE * social_security;
        income.tax_free += (1.0 - SS_TAXABLE_SHARE) * social_security;
    }

    fn big_ticket_payer(&self, who: usize) -> usize {
        match self.plan.big_ticket_payer {
            BigTicketPayer::Bearer => who,
            BigTicketPayer::Other => {
                let other = (who + 1) % self.alive.len();
                if self.alive[other] { other } else { who }
            }
        }
    }

    fn big_ticket(&mut self, n: usize, who: usize, income: &mut YearIncome) {
        let amount = self.plan.schedules[who].row(n).big_ticket;
        if amount == 0.0 {
            return;
        }
        let payer = self.big_ticket_payer(who);
        let split = if payer == 0 { 1.0 } else { 0.0 };
        let result = banking::apply(amount, &mut self.accounts, n + 1, split, true);

        if amount.abs() - result.total > SHORTFALL_TOLERANCE {
            self.success = false;
            let year = self.year(n);
            self.observer.notice(Notice::BigTicketShortfall {
                year,
                who,
                requested: amount,
                performed: result.total.copysign(amount),
            });
        }

        // Not income, but tax-deferred money drawn for it is taxable.
        income.big_ticket_taxable += result.tax_deferred.sum();
        for (w, source) in self.ledger.sources[n].iter_mut().enumerate() {
            source.distributions += result.tax_deferred.of(w);
            source.tax_free_withdrawal += result.tax_free.of(w);
            source.taxable_withdrawal += result.taxable.of(w);
        }
        self.ledger.sources[n][who].big_ticket = result.total.copysign(amount);
    }

    fn spending_target(&self, n: usize) -> f64 {
        let household = &self.plan.household;
        let oldest = (0..household.count())
            .filter(|&who| self.alive[who])
            .map(|who| household.age(who, n))
            .max()
            .unwrap_or(0);
        let adjusted = self.raw_target * self.plan.profile.adjustment(oldest);
        inflation_adjusted(adjusted, n, self.rates, 0)
    }

    fn living_birth_years(&self) -> Vec<i32> {
        self.plan
            .household
            .individuals()
            .iter()
            .zip(&self.alive)
            .filter(|(_, alive)| **alive)
            .map(|(p, _)| p.birth_year)
            .collect()
    }

    fn income_tax(&self, agi: f64, birth_years: &[i32], n: usize) -> f64 {
        self.tax
            .income_tax(agi, birth_years, self.status, self.year(n), self.rates)
    }

    fn deposit_split(&self, n: usize) -> f64 {
        if self.alive.len() == 1 {
            return 1.0;
        }
        if let Some(split) = self.survivor_split {
            return split;
        }
        match self.plan.spousal_split {
            SpousalSplit::Fixed(x) => x,
            SpousalSplit::Auto => {
                let booked: Vec<f64> = self.ledger.sources[n]
                    .iter()
                    .map(|s| s.job + s.social_security + s.pension + s.rmd)
                    .collect();
                booked[0] / (booked.iter().sum::<f64>() + SPLIT_EPSILON)
            }
        }
    }

    /// Follows the first individual's share of the balances the
    /// withdrawal will reach.
    fn withdrawal_split(&self, amount: f64, row: usize) -> f64 {
        if self.alive.len() == 1 {
            return 1.0;
        }
        if let Some(split) = self.survivor_split {
            return split;
        }
        match self.plan.spousal_split {
            SpousalSplit::Fixed(x) => x,
            SpousalSplit::Auto => {
                let amount = amount.abs();
                let first = self.accounts.get(row, 0);
                let mut reached = 0.0;
                let mut own = 0.0;
                for account in AccountType::ALL {
                    reached += self.accounts.account_total(row, account);
                    own += first.get(account);
                    if amount <= reached {
                        break;
                    }
                }
                own / (reached + SPLIT_EPSILON)
            }
        }
    }

    fn reconcile(&mut self, n: usize, income: &mut YearIncome) -> PlanResult<()> {
        let year = self.year(n);
        let target = self.spending_target(n);
        let birth_years = self.living_birth_years();
        let mut tax = self.income_tax(income.gross(), &birth_years, n);
        let net = income.tax_free + income.taxable - tax;
        let gap = net - target;

        if gap >= 0.0 {
            let split = self.deposit_split(n);
            banking::apply(gap, &mut self.accounts, n + 1, split, true);
            self.observer.notice(Notice::SurplusDeposited {
                year,
                amount: gap,
                split,
            });
        } else {
            let split = self.withdrawal_split(gap, n + 1);
            let withdrawal =
                self.solve_withdrawal(n, gap, target, split, income, &birth_years, &mut tax)?;

            let result = banking::apply(withdrawal, &mut self.accounts, n + 1, split, true);
            for (who, source) in self.ledger.sources[n].iter_mut().enumerate() {
                source.distributions += result.tax_deferred.of(who);
                source.tax_free_withdrawal += result.tax_free.of(who);
                source.taxable_withdrawal += result.taxable.of(who);
            }
            for who in 0..self.alive.len() {
                let shortfall = result.shortfall_of(who);
                if shortfall > SHORTFALL_TOLERANCE {
                    self.observer.notice(Notice::AccountsExhausted {
                        year,
                        who,
                        shortfall,
                    });
                }
            }
            income.taxable += result.tax_deferred.sum();
            income.tax_free += result.untaxed();
        }

        let gross = income.gross();
        let lookback = self.tax.irmaa_lookback_years();
        let magi = if n >= lookback {
            self.ledger.income[n - lookback].gross
        } else {
            gross
        };
        let irmaa = self.tax.irmaa(magi, self.status, year, self.rates);

        let row = &mut self.ledger.income[n];
        row.roth_conversion = income.roth_conversion;
        row.gross = gross;
        row.tax = tax;
        row.irmaa = irmaa;
        row.net = if gap >= 0.0 {
            net
        } else {
            income.tax_free + income.taxable - tax
        };
        row.target = target;
        row.taxable = income.taxable;
        row.tax_free = income.tax_free;
        Ok(())
    }

    /// Finds the (negative) withdrawal whose after-tax proceeds close the
    /// gap to `target`. Leaves the matching tax bill in `tax`.
    #[allow(clippy::too_many_arguments)]
    fn solve_withdrawal(
        &mut self,
        n: usize,
        gap: f64,
        target: f64,
        split: f64,
        income: &YearIncome,
        birth_years: &[i32],
        tax: &mut f64,
    ) -> PlanResult<f64> {
        let year = self.year(n);
        let mut withdrawal = gap;
        let mut delta = gap;
        for round in 1..=SOLVER_MAX_ROUNDS {
            let trial = banking::itemize(withdrawal, &self.accounts, n + 1, split);
            let drawn_taxable = trial.tax_deferred.sum();
            *tax = self.income_tax(income.gross() + drawn_taxable, birth_years, n);
            let net = trial.untaxed() + drawn_taxable + income.tax_free + income.taxable - *tax;

            if (trial.total - withdrawal.abs()).abs() > SHORTFALL_TOLERANCE {
                self.success = false;
                self.observer.notice(Notice::FundsExhausted {
                    year,
                    target,
                    requested: -withdrawal,
                    moved: trial.total,
                });
                return Ok(withdrawal);
            }

            delta = net - target;
            if delta >= -SOLVER_TOLERANCE {
                self.observer.notice(Notice::SolverConverged {
                    year,
                    rounds: round,
                    delta,
                });
                return Ok(withdrawal);
            }
            withdrawal += delta;
        }

        Err(PlanError::SolverDidNotConverge {
            year,
            individual: carrier(split, self.alive.len()),
            target,
            withdrawal: -withdrawal,
            delta,
            rounds: SOLVER_MAX_ROUNDS,
        })
    }

    /// Returns true once nobody is left.
    fn year_end(&mut self, n: usize) -> bool {
        let year = self.year(n);
        for who in 0..self.alive.len() {
            if n != self.plan.household.horizon(who) {
                continue;
            }
            self.alive[who] = false;
            self.observer.notice(Notice::Deceased { year, who });
            if !self.alive.iter().any(|a| *a) {
                return true;
            }

            self.transfer_wealth(n + 1, who);
            self.survivor_split = Some(who as f64);
            self.status = FilingStatus::Single;
            self.raw_target *= self.plan.survivor_fraction;
        }
        false
    }

    /// Moves the beneficiary share of `late`'s accounts to the survivor.
    /// The remainder leaves the household.
    fn transfer_wealth(&mut self, row: usize, late: usize) {
        let other = (late + 1) % self.alive.len();
        let fraction = self.plan.household.individual(late).beneficiary_fraction;
        let estate = *self.accounts.get(row, late);
        let heir = self.accounts.get_mut(row, other);
        for account in AccountType::ALL {
            *heir.get_mut(account) += fraction * estate.get(account);
        }
        *self.accounts.get_mut(row, late) = Buckets::default();

        let year = self.year(row - 1);
        self.observer.notice(Notice::WealthTransferred {
            year,
            from: late,
            to: other,
            fraction,
            amount: fraction * estate.total(),
            dropped: (1.0 - fraction) * estate.total(),
        });
    }

    /// Post-tax value of the balances left at the end of year `last`.
    fn finish(self, last: usize) -> RunResult {
        let terminal = last + 1;
        let row = self.accounts.row(terminal);
        let balance = |account| row.iter().map(|b: &Buckets| b.get(account)).sum::<f64>();
        let nominal = balance(AccountType::Taxable)
            + balance(AccountType::TaxFree)
            + (1.0 - self.plan.estate_tax_rate) * balance(AccountType::TaxDeferred);
        let factor = inflation_adjusted(1.0, terminal, self.rates, 0);
        let estate = Estate {
            nominal,
            todays_dollars: nominal / factor,
            cumulative_inflation: factor - 1.0,
        };
        log::debug!(
            "{} estate: {:.0} in today's dollars, cumulative inflation {:.1}%",
            self.plan.household.year(last),
            estate.todays_dollars,
            100.0 * estate.cumulative_inflation
        );

        RunResult {
            success: self.success,
            years_simulated: terminal,
            accounts: self.accounts,
            ledger: self.ledger,
            rates: self.rates.clone(),
            estate,
        }
    }
}
