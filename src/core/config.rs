use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::allocation::{AllocationRatio, AllocationSchedule, CoordinationScope, Interpolation};
use super::engine::Plan;
use super::error::{PlanError, PlanResult};
use super::rates::{FIRST_YEAR, LAST_YEAR, RateMethod};
use super::types::{
    AccountType, Benefit, BigTicketPayer, Buckets, Household, Individual, SpendingProfile,
    SpousalSplit,
};

const PERCENT_SCALE: f64 = 1e9;

/// Plan parameters as stored on disk, one TOML table per section.
///
/// Per-individual values are arrays in household order. Allocation
/// ratios, fixed rates and the estate tax rate are percentages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub household: HouseholdSection,
    pub beneficiary: BeneficiarySection,
    pub pension: BenefitSection,
    pub social_security: BenefitSection,
    pub balances: BalancesSection,
    pub allocation: AllocationSection,
    pub parameters: ParametersSection,
    pub rates: RatesSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HouseholdSection {
    pub names: Vec<String>,
    pub birth_years: Vec<i32>,
    pub life_expectancy: Vec<i32>,
    /// Plan start; the caller's current year when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_year: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeneficiarySection {
    pub fractions: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenefitSection {
    pub amounts: Vec<f64>,
    pub ages: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalancesSection {
    pub taxable: Vec<f64>,
    pub tax_deferred: Vec<f64>,
    pub tax_free: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountRatios {
    pub taxable: Vec<[f64; 4]>,
    pub tax_deferred: Vec<[f64; 4]>,
    pub tax_free: Vec<[f64; 4]>,
}

impl AccountRatios {
    fn get(&self, account: AccountType) -> &[[f64; 4]] {
        match account {
            AccountType::Taxable => &self.taxable,
            AccountType::TaxDeferred => &self.tax_deferred,
            AccountType::TaxFree => &self.tax_free,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinationSection {
    /// `individual` or `combined`.
    pub scope: String,
    pub initial: Vec<[f64; 4]>,
    #[serde(rename = "final")]
    pub last: Vec<[f64; 4]>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationSection {
    /// `linear` or `s-curve`.
    pub interpolation: String,
    #[serde(default = "default_center")]
    pub center: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    pub initial: AccountRatios,
    #[serde(rename = "final")]
    pub last: AccountRatios,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordination: Option<CoordinationSection>,
}

fn default_center() -> f64 {
    super::allocation::DEFAULT_SCURVE_CENTER
}

fn default_width() -> f64 {
    super::allocation::DEFAULT_SCURVE_WIDTH
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParametersSection {
    pub target: f64,
    pub profile: SpendingProfile,
    pub survivor_fraction: f64,
    pub estate_tax_rate: f64,
    /// `auto` or the first individual's fraction.
    pub spousal_split: String,
    #[serde(default = "default_payer")]
    pub big_ticket_payer: BigTicketPayer,
}

fn default_payer() -> BigTicketPayer {
    BigTicketPayer::Other
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatesSection {
    pub method: String,
    pub from: i32,
    pub to: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<[f64; 4]>,
}

impl PlanConfig {
    pub fn from_toml(text: &str) -> PlanResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> PlanResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn read(path: impl AsRef<Path>) -> PlanResult<Self> {
        let path = path.as_ref();
        log::info!("reading plan config from {}", path.display());
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> PlanResult<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    fn count(&self) -> usize {
        self.household.names.len()
    }

    fn check_len(&self, field: &'static str, actual: usize) -> PlanResult<()> {
        if actual != self.count() {
            return Err(PlanError::WrongLength {
                field,
                expected: self.count(),
                actual,
            });
        }
        Ok(())
    }

    /// Builds a plan starting in `current_year` unless the config pins one.
    /// Contribution schedules stay at zero; they are loaded separately.
    pub fn to_plan(&self, current_year: i32) -> PlanResult<Plan> {
        let count = self.count();
        if count == 0 || count > 2 {
            return Err(PlanError::InvalidCount(count));
        }
        self.check_len("birth years", self.household.birth_years.len())?;
        self.check_len("life expectancy", self.household.life_expectancy.len())?;
        self.check_len("beneficiary fractions", self.beneficiary.fractions.len())?;
        self.check_len("pension amounts", self.pension.amounts.len())?;
        self.check_len("pension ages", self.pension.ages.len())?;
        self.check_len("social security amounts", self.social_security.amounts.len())?;
        self.check_len("social security ages", self.social_security.ages.len())?;
        self.check_len("taxable balances", self.balances.taxable.len())?;
        self.check_len("tax-deferred balances", self.balances.tax_deferred.len())?;
        self.check_len("tax-free balances", self.balances.tax_free.len())?;

        let individuals = (0..count)
            .map(|i| Individual {
                name: self.household.names[i].clone(),
                birth_year: self.household.birth_years[i],
                life_expectancy: self.household.life_expectancy[i],
                pension: Benefit {
                    amount: self.pension.amounts[i],
                    start_age: self.pension.ages[i],
                },
                social_security: Benefit {
                    amount: self.social_security.amounts[i],
                    start_age: self.social_security.ages[i],
                },
                beneficiary_fraction: self.beneficiary.fractions[i],
            })
            .collect();
        let start = self.household.current_year.unwrap_or(current_year);
        let household = Household::new(individuals, start)?;

        let balances = (0..count)
            .map(|i| {
                Buckets::new(
                    self.balances.taxable[i],
                    self.balances.tax_deferred[i],
                    self.balances.tax_free[i],
                )
            })
            .collect();
        let mut allocation =
            AllocationSchedule::new(household.horizons(), household.max_horizon());
        let mut plan = Plan::new(household, balances)?;

        for account in AccountType::ALL {
            let initial = ratios(self.allocation.initial.get(account))?;
            let last = ratios(self.allocation.last.get(account))?;
            allocation.set_bounds(account, &initial, &last)?;
        }
        if let Some(coordination) = &self.allocation.coordination {
            let scope = parse_scope(&coordination.scope)?;
            let initial = ratios(&coordination.initial)?;
            allocation.coordinate(scope, &initial, &ratios(&coordination.last)?)?;
        }
        allocation.interpolate(parse_interpolation(&self.allocation)?);
        plan.set_allocation(allocation)?;

        let params = &self.parameters;
        plan.set_target_income(params.target, params.profile)?;
        plan.set_survivor_fraction(params.survivor_fraction)?;
        plan.set_estate_tax_rate(params.estate_tax_rate / 100.0)?;
        plan.set_spousal_split(params.spousal_split.parse::<SpousalSplit>()?)?;
        plan.set_big_ticket_payer(params.big_ticket_payer);

        let values = self.rates.values.map(|v| v.map(|x| x / 100.0));
        plan.set_rates(RateMethod::from_keyword(
            &self.rates.method,
            self.rates.from,
            self.rates.to,
            values,
        )?)?;
        Ok(plan)
    }

    pub fn from_plan(plan: &Plan) -> Self {
        let household = plan.household();
        let people = household.individuals();
        let allocation = plan.allocation();

        let percents = |account: AccountType, pick_last: bool| -> Vec<[f64; 4]> {
            allocation
                .bounds(account)
                .iter()
                .map(|(initial, last)| percents_of(if pick_last { last } else { initial }))
                .collect()
        };
        let account_ratios = |pick_last| AccountRatios {
            taxable: percents(AccountType::Taxable, pick_last),
            tax_deferred: percents(AccountType::TaxDeferred, pick_last),
            tax_free: percents(AccountType::TaxFree, pick_last),
        };
        let coordination = allocation
            .coordination_scope()
            .zip(allocation.coordinated_bounds())
            .map(|(scope, bounds)| CoordinationSection {
                scope: match scope {
                    CoordinationScope::Individual => "individual",
                    CoordinationScope::Combined => "combined",
                }
                .to_string(),
                initial: bounds.iter().map(|(i, _)| percents_of(i)).collect(),
                last: bounds.iter().map(|(_, l)| percents_of(l)).collect(),
            });
        let (interpolation, center, width) = match allocation.interpolation() {
            Interpolation::Linear => ("linear", default_center(), default_width()),
            Interpolation::SCurve { center, width } => ("s-curve", center, width),
        };

        let method = plan.rate_source().method();
        let (from, to) = method.year_range().unwrap_or((FIRST_YEAR, LAST_YEAR));
        let values = match method {
            RateMethod::Fixed(v) => Some(v.map(percent)),
            _ => None,
        };

        Self {
            household: HouseholdSection {
                names: people.iter().map(|p| p.name.clone()).collect(),
                birth_years: people.iter().map(|p| p.birth_year).collect(),
                life_expectancy: people.iter().map(|p| p.life_expectancy).collect(),
                current_year: Some(household.current_year()),
            },
            beneficiary: BeneficiarySection {
                fractions: people.iter().map(|p| p.beneficiary_fraction).collect(),
            },
            pension: BenefitSection {
                amounts: people.iter().map(|p| p.pension.amount).collect(),
                ages: people.iter().map(|p| p.pension.start_age).collect(),
            },
            social_security: BenefitSection {
                amounts: people.iter().map(|p| p.social_security.amount).collect(),
                ages: people.iter().map(|p| p.social_security.start_age).collect(),
            },
            balances: BalancesSection {
                taxable: plan.balances().iter().map(|b| b.taxable).collect(),
                tax_deferred: plan.balances().iter().map(|b| b.tax_deferred).collect(),
                tax_free: plan.balances().iter().map(|b| b.tax_free).collect(),
            },
            allocation: AllocationSection {
                interpolation: interpolation.to_string(),
                center,
                width,
                initial: account_ratios(false),
                last: account_ratios(true),
                coordination,
            },
            parameters: ParametersSection {
                target: plan.target(),
                profile: plan.profile(),
                survivor_fraction: plan.survivor_fraction(),
                estate_tax_rate: percent(plan.estate_tax_rate()),
                spousal_split: plan.spousal_split().to_string(),
                big_ticket_payer: plan.big_ticket_payer(),
            },
            rates: RatesSection {
                method: method.keyword().to_string(),
                from,
                to,
                values,
            },
        }
    }
}

/// Decimal back to the percentage it was loaded from. Rounding to nine
/// decimals undoes the error of the earlier division by 100.
fn percent(decimal: f64) -> f64 {
    (decimal * 100.0 * PERCENT_SCALE).round() / PERCENT_SCALE
}

fn percents_of(ratio: &AllocationRatio) -> [f64; 4] {
    ratio.values().map(percent)
}

fn ratios(values: &[[f64; 4]]) -> PlanResult<Vec<AllocationRatio>> {
    values.iter().map(|v| AllocationRatio::from_percent(*v)).collect()
}

fn parse_scope(keyword: &str) -> PlanResult<CoordinationScope> {
    match keyword.trim().to_ascii_lowercase().as_str() {
        "individual" => Ok(CoordinationScope::Individual),
        "combined" | "both" => Ok(CoordinationScope::Combined),
        other => Err(PlanError::UnknownKeyword {
            field: "coordination scope",
            value: other.to_string(),
        }),
    }
}

fn parse_interpolation(section: &AllocationSection) -> PlanResult<Interpolation> {
    match section.interpolation.trim().to_ascii_lowercase().as_str() {
        "linear" => Ok(Interpolation::Linear),
        "s-curve" | "scurve" | "tanh" => Ok(Interpolation::SCurve {
            center: section.center,
            width: section.width,
        }),
        other => Err(PlanError::UnknownKeyword {
            field: "interpolation",
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[household]
names = ["Jack", "Jill"]
birth_years = [1961, 1964]
life_expectancy = [89, 92]
current_year = 2025

[beneficiary]
fractions = [1.0, 1.0]

[pension]
amounts = [0.0, 10000.0]
ages = [65, 65]

[social_security]
amounts = [28000.0, 25000.0]
ages = [70, 70]

[balances]
taxable = [90000.0, 60000.0]
tax_deferred = [600000.0, 150000.0]
tax_free = [50000.0, 40000.0]

[allocation]
interpolation = "s-curve"

[allocation.initial]
taxable = [[60.0, 40.0, 0.0, 0.0], [60.0, 40.0, 0.0, 0.0]]
tax_deferred = [[60.0, 40.0, 0.0, 0.0], [60.0, 40.0, 0.0, 0.0]]
tax_free = [[60.0, 40.0, 0.0, 0.0], [60.0, 40.0, 0.0, 0.0]]

[allocation.final]
taxable = [[70.0, 30.0, 0.0, 0.0], [70.0, 30.0, 0.0, 0.0]]
tax_deferred = [[70.0, 30.0, 0.0, 0.0], [70.0, 30.0, 0.0, 0.0]]
tax_free = [[70.0, 30.0, 0.0, 0.0], [70.0, 30.0, 0.0, 0.0]]

[parameters]
target = 95000.0
profile = "smile"
survivor_fraction = 0.6
estate_tax_rate = 30.0
spousal_split = "auto"

[rates]
method = "historical"
from = 1969
to = 2002
"#;

    #[test]
    fn sample_config_builds_a_plan() {
        let config = PlanConfig::from_toml(SAMPLE).expect("valid config");
        let plan = config.to_plan(2030).expect("valid plan");

        assert_eq!(plan.household().current_year(), 2025);
        assert_eq!(plan.household().horizons(), &[25, 31]);
        assert_eq!(plan.household().individual(1).pension.amount, 10_000.0);
        assert_eq!(plan.profile(), SpendingProfile::Smile);
        assert!((plan.estate_tax_rate() - 0.3).abs() < 1e-12);
        assert_eq!(plan.spousal_split(), SpousalSplit::Auto);
        assert_eq!(plan.big_ticket_payer(), BigTicketPayer::Other);
        assert_eq!(
            plan.rate_source().method(),
            &RateMethod::Historical { from: 1969, to: 2002 }
        );
        assert!(matches!(
            plan.allocation().interpolation(),
            Interpolation::SCurve { center, width } if center == 15.0 && width == 5.0
        ));
    }

    #[test]
    fn toml_round_trips_every_value() {
        let config = PlanConfig::from_toml(SAMPLE).unwrap();
        let text = config.to_toml().unwrap();
        assert_eq!(PlanConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn plan_round_trips_through_config() {
        let mut config = PlanConfig::from_toml(SAMPLE).unwrap();
        config.parameters.spousal_split = "0.35".to_string();
        config.parameters.big_ticket_payer = BigTicketPayer::Bearer;
        config.parameters.estate_tax_rate = 29.0;
        config.balances.tax_free = vec![0.1 + 0.2, 1.0 / 3.0];
        config.rates = RatesSection {
            method: "fixed".to_string(),
            from: FIRST_YEAR,
            to: LAST_YEAR,
            values: Some([7.0, 14.0, 57.0, 29.0]),
        };
        config.allocation.coordination = Some(CoordinationSection {
            scope: "combined".to_string(),
            initial: vec![[57.0, 29.0, 7.0, 7.0]],
            last: vec![[40.0, 40.0, 10.0, 10.0]],
        });

        let plan = config.to_plan(2025).unwrap();
        let back = PlanConfig::from_plan(&plan);
        let text = back.to_toml().unwrap();
        let again = PlanConfig::from_toml(&text).unwrap();
        assert_eq!(again.balances, config.balances);
        assert_eq!(again.parameters, config.parameters);
        assert_eq!(again.household, config.household);
        assert_eq!(again.allocation.coordination, config.allocation.coordination);
        assert_eq!(again.allocation.interpolation, "s-curve");
        assert_eq!(again.rates.values, config.rates.values);
        assert_eq!(again.rates.method, "fixed");
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut config = PlanConfig::from_toml(SAMPLE).unwrap();
        config.pension.ages.pop();
        assert!(matches!(
            config.to_plan(2025),
            Err(PlanError::WrongLength { field: "pension ages", .. })
        ));

        let mut config = PlanConfig::from_toml(SAMPLE).unwrap();
        config.rates.method = "lottery".to_string();
        assert!(matches!(config.to_plan(2025), Err(PlanError::UnknownKeyword { .. })));

        let mut config = PlanConfig::from_toml(SAMPLE).unwrap();
        config.allocation.initial.taxable[0] = [60.0, 30.0, 0.0, 0.0];
        assert!(matches!(config.to_plan(2025), Err(PlanError::RatioSum { .. })));

        let mut config = PlanConfig::from_toml(SAMPLE).unwrap();
        config.rates.method = "fixed".to_string();
        assert!(matches!(config.to_plan(2025), Err(PlanError::MissingFixedRates)));

        assert!(matches!(
            PlanConfig::from_toml("household = 3"),
            Err(PlanError::ConfigParse(_))
        ));
    }
}
