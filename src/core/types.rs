use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{PlanError, PlanResult};

/// Extra rows past the longest horizon: one for the year of death and one
/// holding the balances handed to the estate.
pub const HORIZON_BUFFER: usize = 2;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilingStatus {
    Single,
    Married,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountType {
    Taxable,
    TaxDeferred,
    TaxFree,
}

impl AccountType {
    pub const ALL: [AccountType; 3] = [
        AccountType::Taxable,
        AccountType::TaxDeferred,
        AccountType::TaxFree,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AccountType::Taxable => "taxable",
            AccountType::TaxDeferred => "tax-deferred",
            AccountType::TaxFree => "tax-free",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Balances of the three account types held by one individual.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buckets {
    pub taxable: f64,
    pub tax_deferred: f64,
    pub tax_free: f64,
}

impl Buckets {
    pub fn new(taxable: f64, tax_deferred: f64, tax_free: f64) -> Self {
        Self {
            taxable,
            tax_deferred,
            tax_free,
        }
    }

    pub fn get(&self, account: AccountType) -> f64 {
        match account {
            AccountType::Taxable => self.taxable,
            AccountType::TaxDeferred => self.tax_deferred,
            AccountType::TaxFree => self.tax_free,
        }
    }

    pub fn get_mut(&mut self, account: AccountType) -> &mut f64 {
        match account {
            AccountType::Taxable => &mut self.taxable,
            AccountType::TaxDeferred => &mut self.tax_deferred,
            AccountType::TaxFree => &mut self.tax_free,
        }
    }

    pub fn total(&self) -> f64 {
        self.taxable + self.tax_deferred + self.tax_free
    }
}

/// A fixed annual income starting at a given age.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    pub amount: f64,
    pub start_age: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Individual {
    pub name: String,
    pub birth_year: i32,
    pub life_expectancy: i32,
    pub pension: Benefit,
    pub social_security: Benefit,
    /// Share of this individual's estate inherited by the other individual.
    pub beneficiary_fraction: f64,
}

impl Individual {
    pub fn new(name: impl Into<String>, birth_year: i32, life_expectancy: i32) -> Self {
        Self {
            name: name.into(),
            birth_year,
            life_expectancy,
            pension: Benefit::default(),
            social_security: Benefit::default(),
            beneficiary_fraction: 1.0,
        }
    }

    pub fn age_in(&self, year: i32) -> i32 {
        year - self.birth_year
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Household {
    individuals: Vec<Individual>,
    current_year: i32,
    horizons: Vec<usize>,
}

impl Household {
    pub fn new(individuals: Vec<Individual>, current_year: i32) -> PlanResult<Self> {
        if individuals.is_empty() || individuals.len() > 2 {
            return Err(PlanError::InvalidCount(individuals.len()));
        }

        let mut horizons = Vec::with_capacity(individuals.len());
        for person in &individuals {
            if !(0.0..=1.0).contains(&person.beneficiary_fraction) {
                return Err(PlanError::FractionOutOfRange {
                    field: "beneficiary fraction",
                    value: person.beneficiary_fraction,
                });
            }
            if person.pension.amount < 0.0 {
                return Err(PlanError::NegativeAmount {
                    field: "pension amount",
                    value: person.pension.amount,
                });
            }
            if person.social_security.amount < 0.0 {
                return Err(PlanError::NegativeAmount {
                    field: "social security amount",
                    value: person.social_security.amount,
                });
            }
            let end_year = person.birth_year + person.life_expectancy;
            if end_year < current_year {
                return Err(PlanError::InvalidHorizon {
                    name: person.name.clone(),
                    end_year,
                    current_year,
                });
            }
            horizons.push((end_year - current_year) as usize);
        }

        Ok(Self {
            individuals,
            current_year,
            horizons,
        })
    }

    pub fn count(&self) -> usize {
        self.individuals.len()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn individual(&self, who: usize) -> &Individual {
        &self.individuals[who]
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    pub fn filing_status(&self) -> FilingStatus {
        if self.count() == 2 {
            FilingStatus::Married
        } else {
            FilingStatus::Single
        }
    }

    /// Last year index (from now) each individual is alive for.
    pub fn horizons(&self) -> &[usize] {
        &self.horizons
    }

    pub fn horizon(&self, who: usize) -> usize {
        self.horizons[who]
    }

    /// Number of rows in every year-indexed table of a run.
    pub fn max_horizon(&self) -> usize {
        self.horizons.iter().copied().max().unwrap_or(0) + HORIZON_BUFFER
    }

    pub fn year(&self, n: usize) -> i32 {
        self.current_year + n as i32
    }

    pub fn age(&self, who: usize, n: usize) -> i32 {
        self.individuals[who].age_in(self.year(n))
    }

    pub fn birth_years(&self) -> Vec<i32> {
        self.individuals.iter().map(|p| p.birth_year).collect()
    }
}

/// The four economic factors of one simulated year, as decimals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRates {
    pub equity: f64,
    pub corporate_bonds: f64,
    pub treasury: f64,
    pub inflation: f64,
}

impl YearRates {
    pub fn from_array(values: [f64; 4]) -> Self {
        Self {
            equity: values[0],
            corporate_bonds: values[1],
            treasury: values[2],
            inflation: values[3],
        }
    }

    pub fn as_array(&self) -> [f64; 4] {
        [
            self.equity,
            self.corporate_bonds,
            self.treasury,
            self.inflation,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSeries {
    start_year: i32,
    years: Vec<YearRates>,
}

impl RateSeries {
    pub fn new(start_year: i32, years: Vec<YearRates>) -> Self {
        Self { start_year, years }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn get(&self, n: usize) -> YearRates {
        self.years[n]
    }

    pub fn inflation(&self, n: usize) -> f64 {
        self.years[n].inflation
    }

    pub fn years(&self) -> &[YearRates] {
        &self.years
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendingProfile {
    Flat,
    Smile,
}

// Go-go, slow-go and no-go years, ages 65 through 100.
const SMILE_TABLE: [f64; 36] = [
    1.000, 1.010, 1.015, 1.010, 1.000, 0.993, 0.978, 0.960, 0.940, 0.918, 0.895, 0.871, 0.848,
    0.825, 0.804, 0.785, 0.769, 0.757, 0.748, 0.744, 0.745, 0.752, 0.766, 0.787, 0.815, 0.852,
    0.899, 0.955, 1.021, 1.059, 1.100, 1.121, 1.141, 1.151, 1.161, 1.171,
];

impl SpendingProfile {
    pub fn adjustment(self, age: i32) -> f64 {
        match self {
            SpendingProfile::Flat => 1.0,
            SpendingProfile::Smile if age <= 65 => 1.0,
            SpendingProfile::Smile => {
                let idx = ((age - 65) as usize).min(SMILE_TABLE.len() - 1);
                SMILE_TABLE[idx]
            }
        }
    }
}

impl FromStr for SpendingProfile {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(SpendingProfile::Flat),
            "smile" => Ok(SpendingProfile::Smile),
            other => Err(PlanError::UnknownKeyword {
                field: "profile",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SpendingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpendingProfile::Flat => f.write_str("flat"),
            SpendingProfile::Smile => f.write_str("smile"),
        }
    }
}

/// How a joint withdrawal is divided between two living individuals.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SpousalSplit {
    /// Follow the share of balances held by the first individual.
    Auto,
    /// Fraction attributed to the first individual.
    Fixed(f64),
}

impl FromStr for SpousalSplit {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Ok(SpousalSplit::Auto);
        }
        let value: f64 = trimmed.parse().map_err(|_| PlanError::UnknownKeyword {
            field: "spousal split",
            value: trimmed.to_string(),
        })?;
        if !(0.0..=1.0).contains(&value) {
            return Err(PlanError::FractionOutOfRange {
                field: "spousal split",
                value,
            });
        }
        Ok(SpousalSplit::Fixed(value))
    }
}

impl fmt::Display for SpousalSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpousalSplit::Auto => f.write_str("auto"),
            SpousalSplit::Fixed(x) => write!(f, "{x}"),
        }
    }
}

/// Whose accounts fund a big-ticket item.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BigTicketPayer {
    Other,
    Bearer,
}

impl FromStr for BigTicketPayer {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "other" => Ok(BigTicketPayer::Other),
            "bearer" => Ok(BigTicketPayer::Bearer),
            other => Err(PlanError::UnknownKeyword {
                field: "big-ticket payer",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BigTicketPayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BigTicketPayer::Other => f.write_str("other"),
            BigTicketPayer::Bearer => f.write_str("bearer"),
        }
    }
}

/// Balances indexed by `[year][individual]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccountSet {
    rows: Vec<Vec<Buckets>>,
}

impl AccountSet {
    pub fn new(years: usize, initial: &[Buckets]) -> Self {
        let mut rows = vec![vec![Buckets::default(); initial.len()]; years.max(1)];
        rows[0].copy_from_slice(initial);
        Self { rows }
    }

    pub fn years(&self) -> usize {
        self.rows.len()
    }

    pub fn count(&self) -> usize {
        self.rows[0].len()
    }

    pub fn row(&self, n: usize) -> &[Buckets] {
        &self.rows[n]
    }

    pub fn get(&self, n: usize, who: usize) -> &Buckets {
        &self.rows[n][who]
    }

    pub fn get_mut(&mut self, n: usize, who: usize) -> &mut Buckets {
        &mut self.rows[n][who]
    }

    pub fn balance(&self, n: usize, who: usize, account: AccountType) -> f64 {
        self.rows[n][who].get(account)
    }

    /// Sum of one account type across individuals.
    pub fn account_total(&self, n: usize, account: AccountType) -> f64 {
        self.rows[n].iter().map(|b| b.get(account)).sum()
    }

    pub fn total(&self, n: usize) -> f64 {
        self.rows[n].iter().map(Buckets::total).sum()
    }
}

/// Income received by one individual in one year, by source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    pub job: f64,
    pub rmd: f64,
    pub social_security: f64,
    pub pension: f64,
    pub dividends: f64,
    pub distributions: f64,
    pub roth_conversion: f64,
    pub taxable_withdrawal: f64,
    pub tax_free_withdrawal: f64,
    pub big_ticket: f64,
}

/// Household income totals for one year.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRow {
    pub roth_conversion: f64,
    pub gross: f64,
    pub tax: f64,
    pub irmaa: f64,
    pub net: f64,
    pub target: f64,
    pub taxable: f64,
    pub tax_free: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyLedger {
    pub years: Vec<i32>,
    pub sources: Vec<Vec<SourceRow>>,
    pub income: Vec<IncomeRow>,
}

impl YearlyLedger {
    pub fn new(first_year: i32, years: usize, count: usize) -> Self {
        Self {
            years: (0..years).map(|n| first_year + n as i32).collect(),
            sources: vec![vec![SourceRow::default(); count]; years],
            income: vec![IncomeRow::default(); years],
        }
    }

    pub fn len(&self) -> usize {
        self.income.len()
    }

    pub fn is_empty(&self) -> bool {
        self.income.is_empty()
    }
}

/// Post-tax value of the balances left after the last individual dies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Estate {
    pub nominal: f64,
    pub todays_dollars: f64,
    pub cumulative_inflation: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub success: bool,
    pub years_simulated: usize,
    pub accounts: AccountSet,
    pub ledger: YearlyLedger,
    pub rates: RateSeries,
    pub estate: Estate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn couple() -> Vec<Individual> {
        vec![
            Individual::new("Jack", 1961, 89),
            Individual::new("Jill", 1964, 92),
        ]
    }

    #[test]
    fn household_derives_status_and_horizons() {
        let household = Household::new(couple(), 2025).expect("valid household");
        assert_eq!(household.filing_status(), FilingStatus::Married);
        assert_eq!(household.horizons(), &[25, 31]);
        assert_eq!(household.max_horizon(), 31 + HORIZON_BUFFER);
        assert_eq!(household.age(1, 3), 64);

        let single = Household::new(vec![Individual::new("Ann", 1960, 90)], 2025).unwrap();
        assert_eq!(single.filing_status(), FilingStatus::Single);
    }

    #[test]
    fn household_rejects_bad_counts_and_fractions() {
        assert!(matches!(
            Household::new(Vec::new(), 2025),
            Err(PlanError::InvalidCount(0))
        ));

        let mut three = couple();
        three.push(Individual::new("Joe", 1970, 90));
        assert!(matches!(
            Household::new(three, 2025),
            Err(PlanError::InvalidCount(3))
        ));

        let mut people = couple();
        people[0].beneficiary_fraction = 1.5;
        assert!(matches!(
            Household::new(people, 2025),
            Err(PlanError::FractionOutOfRange { .. })
        ));
    }

    #[test]
    fn household_rejects_expectancy_in_the_past() {
        let err = Household::new(vec![Individual::new("Old", 1920, 80)], 2025)
            .expect_err("must reject horizon in the past");
        assert!(err.to_string().contains("Old"));
    }

    #[test]
    fn smile_profile_dips_mid_retirement() {
        assert_eq!(SpendingProfile::Flat.adjustment(80), 1.0);
        assert_eq!(SpendingProfile::Smile.adjustment(60), 1.0);
        assert!(SpendingProfile::Smile.adjustment(67) > 1.0);
        assert!(SpendingProfile::Smile.adjustment(84) < 0.75);
        assert!(SpendingProfile::Smile.adjustment(100) > 1.1);
        assert_eq!(
            SpendingProfile::Smile.adjustment(104),
            SpendingProfile::Smile.adjustment(100)
        );
    }

    #[test]
    fn keywords_parse_and_reject_unknown_values() {
        assert_eq!("auto".parse::<SpousalSplit>().unwrap(), SpousalSplit::Auto);
        assert_eq!(
            "0.25".parse::<SpousalSplit>().unwrap(),
            SpousalSplit::Fixed(0.25)
        );
        assert!("1.5".parse::<SpousalSplit>().is_err());
        assert!("half".parse::<SpousalSplit>().is_err());
        assert_eq!(
            "Smile".parse::<SpendingProfile>().unwrap(),
            SpendingProfile::Smile
        );
        assert!("frown".parse::<SpendingProfile>().is_err());
        assert_eq!(
            "bearer".parse::<BigTicketPayer>().unwrap(),
            BigTicketPayer::Bearer
        );
    }

    #[test]
    fn account_set_starts_from_initial_balances() {
        let accounts =
            AccountSet::new(4, &[Buckets::new(1.0, 2.0, 3.0), Buckets::new(4.0, 0.0, 0.0)]);
        assert_eq!(accounts.years(), 4);
        assert_eq!(accounts.count(), 2);
        assert_eq!(accounts.total(0), 10.0);
        assert_eq!(accounts.account_total(0, AccountType::Taxable), 5.0);
        assert_eq!(accounts.total(1), 0.0);
    }
}
