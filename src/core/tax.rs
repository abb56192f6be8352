use super::types::{FilingStatus, RateSeries};

/// Tax-law collaborator queried by the engine once or more per year.
///
/// Amounts are nominal dollars of the taxed `year`; `rates` supplies the
/// inflation path used to index brackets from the plan's first year.
pub trait TaxPolicy: Send + Sync {
    fn income_tax(
        &self,
        agi: f64,
        birth_years: &[i32],
        status: FilingStatus,
        year: i32,
        rates: &RateSeries,
    ) -> f64;

    fn irmaa(&self, magi: f64, status: FilingStatus, year: i32, rates: &RateSeries) -> f64;

    fn rmd_fraction(&self, year: i32, birth_year: i32) -> f64;

    /// Years between the income a Medicare premium is based on and the
    /// year it is billed.
    fn irmaa_lookback_years(&self) -> usize {
        0
    }
}

/// Compounds `amount` by the inflation of years `ref_index..index` of the
/// series, or deflates it when `index < ref_index`.
pub fn inflation_adjusted(amount: f64, index: usize, rates: &RateSeries, ref_index: usize) -> f64 {
    let mut factor = 1.0;
    if index >= ref_index {
        for k in ref_index..index {
            factor *= 1.0 + rates.inflation(k);
        }
    } else {
        for k in index..ref_index {
            factor /= 1.0 + rates.inflation(k);
        }
    }
    amount * factor
}

/// First calendar year the pre-2018 brackets come back into force.
pub const SUNSET_YEAR: i32 = 2026;

const TCJA_SINGLE: [(f64, f64); 7] = [
    (11_600.0, 0.10),
    (47_150.0, 0.12),
    (100_525.0, 0.22),
    (191_950.0, 0.24),
    (243_725.0, 0.32),
    (609_350.0, 0.35),
    (f64::INFINITY, 0.37),
];

const TCJA_MARRIED: [(f64, f64); 7] = [
    (23_200.0, 0.10),
    (94_300.0, 0.12),
    (201_050.0, 0.22),
    (383_900.0, 0.24),
    (487_450.0, 0.32),
    (731_200.0, 0.35),
    (f64::INFINITY, 0.37),
];

// 2017 code indexed to 2024 dollars.
const SUNSET_SINGLE: [(f64, f64); 7] = [
    (12_100.0, 0.10),
    (49_300.0, 0.15),
    (119_500.0, 0.25),
    (249_100.0, 0.28),
    (541_700.0, 0.33),
    (543_900.0, 0.35),
    (f64::INFINITY, 0.396),
];

const SUNSET_MARRIED: [(f64, f64); 7] = [
    (24_200.0, 0.10),
    (98_700.0, 0.15),
    (199_000.0, 0.25),
    (303_350.0, 0.28),
    (541_700.0, 0.33),
    (611_900.0, 0.35),
    (f64::INFINITY, 0.396),
];

const IRMAA_SINGLE: [(f64, f64); 6] = [
    (103_000.0, 0.0),
    (129_000.0, 838.80),
    (161_000.0, 2_096.40),
    (193_000.0, 3_354.00),
    (500_000.0, 4_611.60),
    (f64::INFINITY, 5_031.60),
];

const IRMAA_MARRIED: [(f64, f64); 6] = [
    (206_000.0, 0.0),
    (258_000.0, 838.80),
    (322_000.0, 2_096.40),
    (386_000.0, 3_354.00),
    (750_000.0, 4_611.60),
    (f64::INFINITY, 5_031.60),
];

/// Uniform Lifetime Table distribution periods, ages 72 through 120.
const RMD_DIVISORS: [f64; 49] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2,
    14.4, 13.7, 12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2,
    4.9, 4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];
const RMD_TABLE_START_AGE: i32 = 72;

/// U.S. federal income tax and Medicare Part B surcharges, 2024 edition.
#[derive(Copy, Clone, Debug, Default)]
pub struct UsFederal2024;

impl UsFederal2024 {
    pub fn standard_deduction(
        &self,
        birth_years: &[i32],
        status: FilingStatus,
        year: i32,
        rates: &RateSeries,
    ) -> f64 {
        let index = year_index(year, rates);
        let (base, senior) = match status {
            FilingStatus::Single if year < SUNSET_YEAR => (14_600.0, 1_950.0),
            FilingStatus::Single => (8_250.0, 1_950.0),
            FilingStatus::Married if year < SUNSET_YEAR => (29_200.0, 1_550.0),
            FilingStatus::Married => (16_500.0, 1_550.0),
        };
        let seniors = birth_years.iter().filter(|yob| year - **yob >= 65).count();
        // Survivors file single but keep only their own senior allowance.
        let seniors = match status {
            FilingStatus::Single => seniors.min(1),
            FilingStatus::Married => seniors,
        };
        inflation_adjusted(base + senior * seniors as f64, index, rates, 0)
    }

    /// RMD start age in force for a given calendar year.
    pub fn rmd_start_age(year: i32) -> i32 {
        if year > 2032 {
            75
        } else if year > 2023 {
            73
        } else {
            72
        }
    }
}

impl TaxPolicy for UsFederal2024 {
    fn income_tax(
        &self,
        agi: f64,
        birth_years: &[i32],
        status: FilingStatus,
        year: i32,
        rates: &RateSeries,
    ) -> f64 {
        let taxable = agi - self.standard_deduction(birth_years, status, year, rates);
        let table = match status {
            FilingStatus::Single if year < SUNSET_YEAR => &TCJA_SINGLE,
            FilingStatus::Single => &SUNSET_SINGLE,
            FilingStatus::Married if year < SUNSET_YEAR => &TCJA_MARRIED,
            FilingStatus::Married => &SUNSET_MARRIED,
        };
        bracket_tax(taxable, table, year_index(year, rates), rates)
    }

    fn irmaa(&self, magi: f64, status: FilingStatus, year: i32, rates: &RateSeries) -> f64 {
        let table = match status {
            FilingStatus::Single => &IRMAA_SINGLE,
            FilingStatus::Married => &IRMAA_MARRIED,
        };
        let index = year_index(year, rates);
        for &(threshold, premium) in table {
            if magi < inflation_adjusted(threshold, index, rates, 0) {
                return inflation_adjusted(premium, index, rates, 0);
            }
        }
        0.0
    }

    fn rmd_fraction(&self, year: i32, birth_year: i32) -> f64 {
        let age = year - birth_year;
        if age < Self::rmd_start_age(year) {
            return 0.0;
        }
        let idx = ((age - RMD_TABLE_START_AGE) as usize).min(RMD_DIVISORS.len() - 1);
        1.0 / RMD_DIVISORS[idx]
    }

    fn irmaa_lookback_years(&self) -> usize {
        2
    }
}

fn year_index(year: i32, rates: &RateSeries) -> usize {
    let idx = (year - rates.start_year()).max(0) as usize;
    idx.min(rates.len().saturating_sub(1))
}

fn bracket_tax(income: f64, table: &[(f64, f64)], index: usize, rates: &RateSeries) -> f64 {
    if income <= 0.0 {
        return 0.0;
    }

    let mut tax = 0.0;
    let mut lower = 0.0;
    for &(upper, rate) in table {
        let upper = inflation_adjusted(upper, index, rates, 0);
        if income <= upper {
            return tax + (income - lower) * rate;
        }
        tax += (upper - lower) * rate;
        lower = upper;
    }
    tax
}
