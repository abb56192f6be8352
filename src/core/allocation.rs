use serde::Serialize;

use super::error::{PlanError, PlanResult};
use super::types::{AccountType, Buckets, YearRates};

/// Allowed drift of a ratio's component sum away from 1.
pub const RATIO_TOLERANCE: f64 = 1e-6;
/// Added to account balances before dividing by them.
pub const BALANCE_EPSILON: f64 = 1e-6;

pub const DEFAULT_SCURVE_CENTER: f64 = 15.0;
pub const DEFAULT_SCURVE_WIDTH: f64 = 5.0;

/// Asset mix of one account: equity, corporate bonds, treasuries, cash.
///
/// Cash earns the inflation rate, so the mix dots directly with a
/// [`YearRates`] value.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct AllocationRatio([f64; 4]);

impl AllocationRatio {
    pub fn new(values: [f64; 4]) -> PlanResult<Self> {
        for (index, &value) in values.iter().enumerate() {
            if !(0.0..=1.0).contains(&value) {
                return Err(PlanError::RatioComponent { index, value });
            }
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(PlanError::RatioSum { values, sum });
        }
        Ok(Self(values))
    }

    pub fn from_percent(values: [f64; 4]) -> PlanResult<Self> {
        Self::new(values.map(|v| v / 100.0))
    }

    pub fn values(&self) -> [f64; 4] {
        self.0
    }

    pub fn as_percent(&self) -> [f64; 4] {
        self.0.map(|v| v * 100.0)
    }

    pub fn equity(&self) -> f64 {
        self.0[0]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Portfolio return for one year.
    pub fn dot(&self, rates: &YearRates) -> f64 {
        self.0
            .iter()
            .zip(rates.as_array())
            .map(|(w, r)| w * r)
            .sum()
    }

    fn blend(&self, other: &Self, s: f64) -> Self {
        let mut out = [0.0; 4];
        for (j, value) in out.iter_mut().enumerate() {
            *value = self.0[j] + (other.0[j] - self.0[j]) * s;
        }
        Self(out)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Interpolation {
    Linear,
    /// Hyperbolic-tangent glide path; `center` and `width` in years from now.
    SCurve { center: f64, width: f64 },
}

impl Interpolation {
    pub fn s_curve() -> Self {
        Interpolation::SCurve {
            center: DEFAULT_SCURVE_CENTER,
            width: DEFAULT_SCURVE_WIDTH,
        }
    }

    /// Progress from the initial bound (0) to the final bound (1) in year
    /// `n` of a `horizon`-year path.
    fn progress(self, n: usize, horizon: usize) -> f64 {
        if horizon == 0 {
            return 0.0;
        }
        let n = n.min(horizon) as f64;
        let h = horizon as f64;
        match self {
            Interpolation::Linear => n / h,
            Interpolation::SCurve { center, width } => {
                let width = width.max(f64::MIN_POSITIVE);
                let lo = (-center / width).tanh();
                let hi = ((h - center) / width).tanh();
                if (hi - lo).abs() < 1e-12 {
                    return n / h;
                }
                (((n - center) / width).tanh() - lo) / (hi - lo)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoordinationScope {
    /// Each individual's three accounts track that individual's target.
    Individual,
    /// All accounts of the household track one target.
    Combined,
}

#[derive(Clone, Debug)]
struct Coordination {
    scope: CoordinationScope,
    bounds: Vec<(AllocationRatio, AllocationRatio)>,
    path: Vec<Vec<AllocationRatio>>,
}

/// Per account type, per individual, per year asset mixes.
#[derive(Clone, Debug)]
pub struct AllocationSchedule {
    horizons: Vec<usize>,
    years: usize,
    interpolation: Interpolation,
    bounds: [Vec<(AllocationRatio, AllocationRatio)>; 3],
    table: [Vec<Vec<AllocationRatio>>; 3],
    coordination: Option<Coordination>,
}

/// Mix used by each account type when none is configured.
pub fn default_bounds(account: AccountType) -> AllocationRatio {
    match account {
        AccountType::Taxable => AllocationRatio([0.0, 0.25, 0.5, 0.25]),
        AccountType::TaxDeferred | AccountType::TaxFree => AllocationRatio([0.6, 0.4, 0.0, 0.0]),
    }
}

fn slot(account: AccountType) -> usize {
    match account {
        AccountType::Taxable => 0,
        AccountType::TaxDeferred => 1,
        AccountType::TaxFree => 2,
    }
}

impl AllocationSchedule {
    /// A schedule holding the default mixes. `years` sizes the table and
    /// years past an individual's horizon keep the final mix.
    pub fn new(horizons: &[usize], years: usize) -> Self {
        let bounds = AccountType::ALL.map(|account| {
            let ratio = default_bounds(account);
            vec![(ratio, ratio); horizons.len()]
        });
        let mut schedule = Self {
            horizons: horizons.to_vec(),
            years: years.max(1),
            interpolation: Interpolation::Linear,
            bounds,
            table: [Vec::new(), Vec::new(), Vec::new()],
            coordination: None,
        };
        schedule.interpolate(Interpolation::Linear);
        schedule
    }

    pub fn count(&self) -> usize {
        self.horizons.len()
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn bounds(&self, account: AccountType) -> &[(AllocationRatio, AllocationRatio)] {
        &self.bounds[slot(account)]
    }

    pub fn set_bounds(
        &mut self,
        account: AccountType,
        initial: &[AllocationRatio],
        last: &[AllocationRatio],
    ) -> PlanResult<()> {
        self.check_len("initial allocation", initial.len(), self.count())?;
        self.check_len("final allocation", last.len(), self.count())?;
        self.bounds[slot(account)] = initial.iter().copied().zip(last.iter().copied()).collect();
        self.interpolate(self.interpolation);
        Ok(())
    }

    /// Rebuilds every per-year table from the configured bounds.
    pub fn interpolate(&mut self, method: Interpolation) {
        self.interpolation = method;
        for account in AccountType::ALL {
            let k = slot(account);
            self.table[k] = self.bounds[k]
                .iter()
                .zip(&self.horizons)
                .map(|(bounds, &h)| path(bounds, h, self.years, method))
                .collect();
        }
        if let Some(coordination) = self.coordination.as_mut() {
            let horizons = coordination_horizons(coordination.scope, &self.horizons);
            coordination.path = coordination
                .bounds
                .iter()
                .zip(horizons)
                .map(|(bounds, h)| path(bounds, h, self.years, method))
                .collect();
        }
        log::debug!("interpolated allocation ratios using {method:?}");
    }

    /// Replaces the per-account mixes with one target mix that is split
    /// across account types each year. `Individual` scope takes one bound
    /// pair per individual, `Combined` exactly one.
    pub fn coordinate(
        &mut self,
        scope: CoordinationScope,
        initial: &[AllocationRatio],
        last: &[AllocationRatio],
    ) -> PlanResult<()> {
        let expected = match scope {
            CoordinationScope::Individual => self.count(),
            CoordinationScope::Combined => 1,
        };
        self.check_len("coordinated initial allocation", initial.len(), expected)?;
        self.check_len("coordinated final allocation", last.len(), expected)?;
        self.coordination = Some(Coordination {
            scope,
            bounds: initial.iter().copied().zip(last.iter().copied()).collect(),
            path: Vec::new(),
        });
        self.interpolate(self.interpolation);
        Ok(())
    }

    pub fn coordination_scope(&self) -> Option<CoordinationScope> {
        self.coordination.as_ref().map(|c| c.scope)
    }

    pub fn coordinated_bounds(&self) -> Option<&[(AllocationRatio, AllocationRatio)]> {
        self.coordination.as_ref().map(|c| c.bounds.as_slice())
    }

    /// Independent mix of one account in year `n`.
    pub fn ratio(&self, account: AccountType, who: usize, n: usize) -> AllocationRatio {
        let column = &self.table[slot(account)][who];
        column[n.min(column.len() - 1)]
    }

    /// Mixes to grow each individual's accounts with in year `n`, indexed
    /// `[who][account]` in [`AccountType::ALL`] order.
    pub fn ratios_for_year(&self, n: usize, balances: &[Buckets]) -> Vec<[AllocationRatio; 3]> {
        let Some(coordination) = &self.coordination else {
            return (0..self.count())
                .map(|who| AccountType::ALL.map(|account| self.ratio(account, who, n)))
                .collect();
        };

        match coordination.scope {
            CoordinationScope::Individual => balances
                .iter()
                .enumerate()
                .map(|(who, b)| split_target(&pick(&coordination.path[who], n), b))
                .collect(),
            CoordinationScope::Combined => {
                let mut combined = Buckets::default();
                for b in balances {
                    combined.taxable += b.taxable;
                    combined.tax_deferred += b.tax_deferred;
                    combined.tax_free += b.tax_free;
                }
                let ratios = split_target(&pick(&coordination.path[0], n), &combined);
                vec![ratios; balances.len()]
            }
        }
    }

    fn check_len(&self, field: &'static str, actual: usize, expected: usize) -> PlanResult<()> {
        if actual != expected {
            return Err(PlanError::WrongLength {
                field,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

fn coordination_horizons(scope: CoordinationScope, horizons: &[usize]) -> Vec<usize> {
    match scope {
        CoordinationScope::Individual => horizons.to_vec(),
        CoordinationScope::Combined => vec![horizons.iter().copied().max().unwrap_or(0)],
    }
}

fn path(
    bounds: &(AllocationRatio, AllocationRatio),
    horizon: usize,
    years: usize,
    method: Interpolation,
) -> Vec<AllocationRatio> {
    let (initial, last) = bounds;
    (0..years)
        .map(|n| initial.blend(last, method.progress(n, horizon)))
        .collect()
}

fn pick(path: &[AllocationRatio], n: usize) -> AllocationRatio {
    path[n.min(path.len() - 1)]
}

/// Greedy split of a household-level target mix across the three accounts.
///
/// Equities fill tax-free, then tax-deferred, then taxable space. Bonds
/// fill what is left of tax-free then tax-deferred. Cash fills taxable
/// first. Treasuries take whatever remains in each account.
pub fn split_target(target: &AllocationRatio, balances: &Buckets) -> [AllocationRatio; 3] {
    let [e, b, _, c] = target.values();
    let total = balances.total();
    let (mut free, mut deferred, mut taxable) =
        (balances.tax_free, balances.tax_deferred, balances.taxable);

    let mut equity = e * total;
    let equity_free = equity.min(free);
    free -= equity_free;
    equity -= equity_free;
    let equity_deferred = equity.min(deferred);
    deferred -= equity_deferred;
    let equity_taxable = (equity - equity_deferred).min(taxable).max(0.0);
    taxable -= equity_taxable;

    let bonds = b * total;
    let bonds_free = bonds.min(free);
    free -= bonds_free;
    let bonds_deferred = (bonds - bonds_free).min(deferred);
    deferred -= bonds_deferred;
    let bonds_taxable = (bonds - bonds_free - bonds_deferred).min(taxable).max(0.0);
    taxable -= bonds_taxable;

    let cash = c * total;
    let cash_taxable = cash.min(taxable);
    let cash_deferred = (cash - cash_taxable).min(deferred);
    let cash_free = (cash - cash_taxable - cash_deferred).min(free).max(0.0);

    [
        account_mix(balances.taxable, equity_taxable, bonds_taxable, cash_taxable),
        account_mix(balances.tax_deferred, equity_deferred, bonds_deferred, cash_deferred),
        account_mix(balances.tax_free, equity_free, bonds_free, cash_free),
    ]
}

fn account_mix(balance: f64, equity: f64, bonds: f64, cash: f64) -> AllocationRatio {
    let denom = balance.max(0.0) + BALANCE_EPSILON;
    let e = (equity / denom).clamp(0.0, 1.0);
    let b = (bonds / denom).clamp(0.0, 1.0 - e);
    let c = (cash / denom).clamp(0.0, 1.0 - e - b);
    AllocationRatio([e, b, (1.0 - e - b - c).max(0.0), c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn ratio(values: [f64; 4]) -> AllocationRatio {
        AllocationRatio::new(values).expect("valid ratio")
    }

    #[test]
    fn ratio_rejects_bad_sums_and_components() {
        assert!(matches!(
            AllocationRatio::new([0.5, 0.5, 0.5, 0.0]),
            Err(PlanError::RatioSum { .. })
        ));
        assert!(matches!(
            AllocationRatio::new([1.5, -0.5, 0.0, 0.0]),
            Err(PlanError::RatioComponent { index: 0, .. })
        ));
        let pct = AllocationRatio::from_percent([60.0, 40.0, 0.0, 0.0]).unwrap();
        assert_approx(pct.equity(), 0.6);
    }

    #[test]
    fn dot_weights_each_rate() {
        let rates = YearRates::from_array([0.10, 0.05, 0.02, 0.03]);
        let mix = ratio([0.5, 0.2, 0.2, 0.1]);
        assert_approx(mix.dot(&rates), 0.05 + 0.01 + 0.004 + 0.003);
    }

    #[test]
    fn linear_path_hits_both_bounds_and_holds_after_horizon() {
        let mut schedule = AllocationSchedule::new(&[10, 4], 12);
        let start = ratio([1.0, 0.0, 0.0, 0.0]);
        let end = ratio([0.0, 1.0, 0.0, 0.0]);
        schedule
            .set_bounds(AccountType::TaxFree, &[start, start], &[end, end])
            .unwrap();

        assert_eq!(schedule.ratio(AccountType::TaxFree, 0, 0), start);
        assert_approx(schedule.ratio(AccountType::TaxFree, 0, 5).equity(), 0.5);
        assert_approx(schedule.ratio(AccountType::TaxFree, 0, 10).equity(), 0.0);
        assert_approx(schedule.ratio(AccountType::TaxFree, 1, 2).equity(), 0.5);
        assert_eq!(
            schedule.ratio(AccountType::TaxFree, 1, 11),
            schedule.ratio(AccountType::TaxFree, 1, 4)
        );
        assert_eq!(
            schedule.ratio(AccountType::Taxable, 0, 3),
            default_bounds(AccountType::Taxable)
        );
    }

    #[test]
    fn s_curve_is_exact_at_endpoints_and_slow_at_the_start() {
        let mut schedule = AllocationSchedule::new(&[30], 32);
        let start = ratio([1.0, 0.0, 0.0, 0.0]);
        let end = ratio([0.0, 0.0, 0.0, 1.0]);
        schedule
            .set_bounds(AccountType::TaxDeferred, &[start], &[end])
            .unwrap();
        schedule.interpolate(Interpolation::s_curve());

        let at = |n| schedule.ratio(AccountType::TaxDeferred, 0, n).equity();
        assert_approx(at(0), 1.0);
        assert_approx(at(30), 0.0);
        assert!(at(5) > 0.95);
        assert!((at(15) - 0.5).abs() < 0.05);
        assert!(at(25) < 0.05);
    }

    #[test]
    fn bounds_must_match_household_size() {
        let mut schedule = AllocationSchedule::new(&[10, 12], 14);
        let mix = default_bounds(AccountType::TaxFree);
        assert!(matches!(
            schedule.set_bounds(AccountType::TaxFree, &[mix], &[mix, mix]),
            Err(PlanError::WrongLength { expected: 2, actual: 1, .. })
        ));
        assert!(
            schedule
                .coordinate(CoordinationScope::Combined, &[mix, mix], &[mix, mix])
                .is_err()
        );
    }

    #[test]
    fn greedy_split_shelters_equities_first() {
        let target = ratio([0.5, 0.3, 0.1, 0.1]);
        let [taxable, deferred, free] =
            split_target(&target, &Buckets::new(100.0, 100.0, 100.0));

        assert_approx(free.equity(), 1.0);
        assert_approx(deferred.values()[0], 0.5);
        assert_approx(deferred.values()[1], 0.5);
        assert_approx(taxable.values()[0], 0.0);
        assert_approx(taxable.values()[1], 0.4);
        assert_approx(taxable.values()[2], 0.3);
        assert_approx(taxable.values()[3], 0.3);
    }

    #[test]
    fn greedy_split_of_empty_account_is_all_treasury() {
        let target = ratio([0.6, 0.4, 0.0, 0.0]);
        let [taxable, _, free] = split_target(&target, &Buckets::new(0.0, 1_000.0, 0.0));
        assert_eq!(taxable.values(), [0.0, 0.0, 1.0, 0.0]);
        assert_eq!(free.values(), [0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn combined_scope_uses_household_balances() {
        let mut schedule = AllocationSchedule::new(&[20, 25], 27);
        let target = ratio([0.5, 0.5, 0.0, 0.0]);
        schedule
            .coordinate(CoordinationScope::Combined, &[target], &[target])
            .unwrap();
        let row = [Buckets::new(0.0, 0.0, 50.0), Buckets::new(50.0, 0.0, 0.0)];
        let ratios = schedule.ratios_for_year(3, &row);
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratios[0], ratios[1]);
        assert_approx(ratios[0][2].equity(), 1.0);
        assert_approx(ratios[0][0].values()[1], 1.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(256))]

        #[test]
        fn prop_every_ratio_is_normalized(
            weights in proptest::array::uniform4(0.0f64..10.0),
            taxable in 0.0f64..2e6,
            deferred in 0.0f64..2e6,
            free in 0.0f64..2e6,
            n in 0usize..40,
            s_curve in proptest::bool::ANY,
        ) {
            let sum: f64 = weights.iter().sum::<f64>() + 1e-9;
            let target = AllocationRatio::new(weights.map(|w| w / sum)).unwrap_or_else(|_| {
                default_bounds(AccountType::TaxFree)
            });
            let mut schedule = AllocationSchedule::new(&[30, 25], 32);
            schedule
                .set_bounds(
                    AccountType::Taxable,
                    &[target, target],
                    &[default_bounds(AccountType::TaxFree); 2],
                )
                .unwrap();
            if s_curve {
                schedule
                    .coordinate(
                        CoordinationScope::Individual,
                        &[target, target],
                        &[default_bounds(AccountType::Taxable); 2],
                    )
                    .unwrap();
                schedule.interpolate(Interpolation::s_curve());
            }
            let row = [
                Buckets::new(taxable, deferred, free),
                Buckets::new(free, taxable, deferred),
            ];
            for per_person in schedule.ratios_for_year(n, &row) {
                for mix in per_person {
                    prop_assert!((mix.sum() - 1.0).abs() <= RATIO_TOLERANCE);
                    prop_assert!(mix.values().iter().all(|v| (0.0..=1.0).contains(v)));
                }
            }
        }

        #[test]
        fn prop_greedy_split_places_the_target_equity(
            e in 0.0f64..1.0,
            taxable in 1.0f64..1e6,
            deferred in 1.0f64..1e6,
            free in 1.0f64..1e6,
        ) {
            let target = AllocationRatio::new([e, 0.0, 1.0 - e, 0.0]).unwrap();
            let balances = Buckets::new(taxable, deferred, free);
            let mixes = split_target(&target, &balances);
            let placed: f64 = mixes
                .iter()
                .zip(AccountType::ALL)
                .map(|(mix, account)| mix.equity() * balances.get(account))
                .sum();
            prop_assert!((placed - e * balances.total()).abs() <= 1e-3);
        }
    }
}
