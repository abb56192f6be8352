use rand::Rng;
use rand_distr::StandardNormal;

use super::error::{PlanError, PlanResult};
use super::types::{RateSeries, YearRates};

pub const FIRST_YEAR: i32 = 1928;
pub const LAST_YEAR: i32 = 2022;

const DEFAULT_RATES: [f64; 4] = [0.11008387, 0.0736, 0.05028387, 0.02513871];
const REALISTIC_RATES: [f64; 4] = [0.08, 0.05, 0.04, 0.03];
const CONSERVATIVE_RATES: [f64; 4] = [0.06, 0.04, 0.033, 0.028];

// Annual percent: S&P 500 with dividends, AA corporate bonds,
// 10-year treasury notes, CPI inflation.
const HISTORY: [[f64; 4]; (LAST_YEAR - FIRST_YEAR + 1) as usize] = [
    [43.81, 3.22, 0.84, -1.16], // 1928
    [-8.30, 3.02, 4.20, 0.58], // 1929
    [-25.12, 0.54, 4.54, -6.40], // 1930
    [-43.84, -15.68, -2.56, -9.32], // 1931
    [-8.64, 23.59, 8.79, -10.27], // 1932
    [49.98, 12.97, 1.86, 0.76], // 1933
    [-1.19, 18.82, 7.96, 1.52], // 1934
    [46.74, 13.31, 4.47, 2.99], // 1935
    [31.94, 11.38, 5.02, 1.45], // 1936
    [-35.34, -4.42, 1.38, 2.86], // 1937
    [29.28, 9.24, 4.21, -2.78], // 1938
    [-1.10, 7.98, 4.41, 0.00], // 1939
    [-10.67, 8.65, 5.40, 0.71], // 1940
    [-12.77, 5.01, -2.02, 9.93], // 1941
    [19.17, 5.18, 2.29, 9.03], // 1942
    [25.06, 8.04, 2.49, 2.96], // 1943
    [19.03, 6.57, 2.58, 2.30], // 1944
    [35.82, 6.80, 3.80, 2.25], // 1945
    [-8.43, 2.51, 3.13, 18.13], // 1946
    [5.20, 0.26, 0.92, 8.84], // 1947
    [5.70, 3.44, 1.95, 2.99], // 1948
    [18.30, 5.38, 4.66, -2.07], // 1949
    [30.81, 4.24, 0.43, 5.93], // 1950
    [23.68, -0.19, -0.30, 6.00], // 1951
    [18.15, 4.44, 2.27, 0.75], // 1952
    [-1.21, 1.62, 4.14, 0.75], // 1953
    [52.56, 6.16, 3.29, -0.74], // 1954
    [32.60, 2.04, -1.34, 0.37], // 1955
    [7.44, -2.35, -2.26, 2.99], // 1956
    [-10.46, -0.72, 6.80, 2.90], // 1957
    [43.72, 6.43, -2.10, 1.76], // 1958
    [12.06, 1.57, -2.65, 1.73], // 1959
    [0.34, 6.66, 11.64, 1.36], // 1960
    [26.64, 5.10, 2.06, 0.67], // 1961
    [-8.81, 6.50, 5.69, 1.33], // 1962
    [22.61, 5.46, 1.68, 1.64], // 1963
    [16.42, 5.16, 3.73, 0.97], // 1964
    [12.40, 3.19, 0.72, 1.92], // 1965
    [-9.97, -3.45, 2.91, 3.46], // 1966
    [23.80, 0.90, -1.58, 3.04], // 1967
    [10.81, 4.85, 3.27, 4.72], // 1968
    [-8.24, -2.03, -5.01, 6.20], // 1969
    [3.56, 5.65, 16.75, 5.57], // 1970
    [14.22, 14.00, 9.79, 3.27], // 1971
    [18.76, 11.41, 2.82, 3.41], // 1972
    [-14.31, 4.32, 3.66, 8.71], // 1973
    [-25.90, -4.38, 1.99, 12.34], // 1974
    [37.00, 11.05, 3.61, 6.94], // 1975
    [23.83, 19.75, 15.98, 4.86], // 1976
    [-6.98, 9.95, 1.29, 6.70], // 1977
    [6.51, 3.14, -0.78, 9.02], // 1978
    [18.52, -2.01, 0.67, 13.29], // 1979
    [31.74, -3.32, -2.99, 12.52], // 1980
    [-4.70, 8.46, 8.20, 8.92], // 1981
    [20.42, 29.05, 32.81, 3.83], // 1982
    [22.34, 16.19, 3.20, 3.79], // 1983
    [6.15, 15.62, 13.73, 3.95], // 1984
    [31.24, 23.86, 25.71, 3.80], // 1985
    [18.49, 21.49, 24.28, 1.10], // 1986
    [5.81, 2.29, -4.96, 4.43], // 1987
    [16.54, 15.12, 8.22, 4.42], // 1988
    [31.48, 15.79, 17.69, 4.65], // 1989
    [-3.06, 6.14, 6.24, 6.11], // 1990
    [30.23, 17.85, 15.00, 3.06], // 1991
    [7.49, 12.17, 9.36, 2.90], // 1992
    [9.97, 16.43, 14.21, 2.75], // 1993
    [1.33, -1.32, -8.04, 2.67], // 1994
    [37.20, 20.16, 23.48, 2.54], // 1995
    [22.68, 4.79, 1.43, 3.32], // 1996
    [33.10, 11.83, 9.94, 1.70], // 1997
    [28.34, 7.95, 14.92, 1.61], // 1998
    [20.89, 0.84, -8.25, 2.68], // 1999
    [-9.03, 9.33, 16.66, 3.39], // 2000
    [-11.85, 7.82, 5.57, 1.55], // 2001
    [-21.97, 12.18, 15.12, 2.38], // 2002
    [28.36, 13.53, 0.38, 1.88], // 2003
    [10.74, 9.89, 4.49, 3.26], // 2004
    [4.83, 4.92, 2.87, 3.42], // 2005
    [15.61, 7.05, 1.96, 2.54], // 2006
    [5.48, 3.15, 10.21, 4.08], // 2007
    [-36.55, -5.07, 20.10, 0.09], // 2008
    [25.94, 23.33, -11.12, 2.72], // 2009
    [14.82, 8.35, 8.46, 1.50], // 2010
    [2.10, 12.58, 16.04, 2.96], // 2011
    [15.89, 10.12, 2.97, 1.74], // 2012
    [32.15, -1.06, -9.10, 1.50], // 2013
    [13.52, 10.38, 10.75, 0.76], // 2014
    [1.38, -0.70, 1.28, 0.73], // 2015
    [11.77, 10.37, 0.69, 2.07], // 2016
    [21.61, 9.72, 2.80, 2.11], // 2017
    [-4.23, -2.76, -0.02, 1.91], // 2018
    [31.21, 15.33, 9.64, 2.29], // 2019
    [18.02, 10.41, 11.33, 1.36], // 2020
    [28.47, 0.93, -4.42, 7.10], // 2021
    [-18.01, -14.49, -17.83, 6.42], // 2022
];

/// How the yearly investment and inflation factors of a run are produced.
#[derive(Clone, Debug, PartialEq)]
pub enum RateMethod {
    Default,
    Realistic,
    Conservative,
    /// Equity, corporate bond, treasury and inflation rates as decimals.
    Fixed([f64; 4]),
    /// Replays the window year by year, wrapping when it runs out.
    Historical { from: i32, to: i32 },
    /// Arithmetic mean of the window, every year.
    Average { from: i32, to: i32 },
    /// Independent multivariate-normal draws fit to the window.
    Stochastic { from: i32, to: i32 },
}

impl RateMethod {
    /// Resolves a method keyword the way plan configs spell it.
    pub fn from_keyword(
        keyword: &str,
        from: i32,
        to: i32,
        values: Option<[f64; 4]>,
    ) -> PlanResult<Self> {
        let method = match keyword.trim().to_ascii_lowercase().as_str() {
            "default" => RateMethod::Default,
            "realistic" => RateMethod::Realistic,
            "conservative" => RateMethod::Conservative,
            "fixed" => RateMethod::Fixed(values.ok_or(PlanError::MissingFixedRates)?),
            "historical" => RateMethod::Historical { from, to },
            "average" => RateMethod::Average { from, to },
            "stochastic" => RateMethod::Stochastic { from, to },
            other => {
                return Err(PlanError::UnknownKeyword {
                    field: "rate method",
                    value: other.to_string(),
                });
            }
        };
        Ok(method)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            RateMethod::Default => "default",
            RateMethod::Realistic => "realistic",
            RateMethod::Conservative => "conservative",
            RateMethod::Fixed(_) => "fixed",
            RateMethod::Historical { .. } => "historical",
            RateMethod::Average { .. } => "average",
            RateMethod::Stochastic { .. } => "stochastic",
        }
    }

    pub fn year_range(&self) -> Option<(i32, i32)> {
        match *self {
            RateMethod::Historical { from, to }
            | RateMethod::Average { from, to }
            | RateMethod::Stochastic { from, to } => Some((from, to)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
enum Generator {
    Fixed(YearRates),
    Historical { first: usize, span: usize },
    Stochastic { mean: [f64; 4], factor: [[f64; 4]; 4] },
}

/// A resolved rate method, ready to generate series.
#[derive(Clone, Debug)]
pub struct RateSource {
    method: RateMethod,
    generator: Generator,
}

impl RateSource {
    pub fn new(method: RateMethod) -> PlanResult<Self> {
        let generator = match &method {
            RateMethod::Default => Generator::Fixed(YearRates::from_array(DEFAULT_RATES)),
            RateMethod::Realistic => Generator::Fixed(YearRates::from_array(REALISTIC_RATES)),
            RateMethod::Conservative => {
                Generator::Fixed(YearRates::from_array(CONSERVATIVE_RATES))
            }
            RateMethod::Fixed(values) => {
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(PlanError::MissingFixedRates);
                }
                Generator::Fixed(YearRates::from_array(*values))
            }
            RateMethod::Historical { from, to } => {
                let (first, span) = window(*from, *to)?;
                Generator::Historical { first, span }
            }
            RateMethod::Average { from, to } => {
                let (mean, _) = window_statistics(*from, *to)?;
                Generator::Fixed(YearRates::from_array(mean))
            }
            RateMethod::Stochastic { from, to } => {
                let (mean, covariance) = window_statistics(*from, *to)?;
                Generator::Stochastic {
                    mean,
                    factor: cholesky(&covariance),
                }
            }
        };
        log::debug!("using {} rates", method.keyword());
        Ok(Self { method, generator })
    }

    pub fn method(&self) -> &RateMethod {
        &self.method
    }

    pub fn is_random(&self) -> bool {
        matches!(self.generator, Generator::Stochastic { .. })
    }

    /// Produces `n` consecutive years of rates labelled from `start_year`.
    pub fn gen_series<R: Rng + ?Sized>(
        &self,
        start_year: i32,
        n: usize,
        rng: &mut R,
    ) -> RateSeries {
        let years = (0..n).map(|k| self.rates_for(k, rng)).collect();
        RateSeries::new(start_year, years)
    }

    fn rates_for<R: Rng + ?Sized>(&self, k: usize, rng: &mut R) -> YearRates {
        match &self.generator {
            Generator::Fixed(rates) => *rates,
            Generator::Historical { first, span } => history_row(first + k % span),
            Generator::Stochastic { mean, factor } => {
                let z: [f64; 4] = std::array::from_fn(|_| rng.sample(StandardNormal));
                let mut draw = *mean;
                for (i, value) in draw.iter_mut().enumerate() {
                    *value += (0..=i).map(|j| factor[i][j] * z[j]).sum::<f64>();
                }
                YearRates::from_array(draw)
            }
        }
    }
}

/// Historical rates of one calendar year, as decimals.
pub fn historical_year(year: i32) -> Option<YearRates> {
    if !(FIRST_YEAR..=LAST_YEAR).contains(&year) {
        return None;
    }
    Some(history_row((year - FIRST_YEAR) as usize))
}

fn history_row(idx: usize) -> YearRates {
    let pct = HISTORY[idx];
    YearRates::from_array(pct.map(|v| v / 100.0))
}

fn window(from: i32, to: i32) -> PlanResult<(usize, usize)> {
    if from > to || from < FIRST_YEAR || to > LAST_YEAR {
        return Err(PlanError::YearRangeOutOfBounds {
            from,
            to,
            min: FIRST_YEAR,
            max: LAST_YEAR,
        });
    }
    Ok(((from - FIRST_YEAR) as usize, (to - from + 1) as usize))
}

/// Mean vector and population covariance matrix of the four series over
/// `from..=to`, as decimals.
pub fn window_statistics(from: i32, to: i32) -> PlanResult<([f64; 4], [[f64; 4]; 4])> {
    let (first, span) = window(from, to)?;
    let rows: Vec<[f64; 4]> = (first..first + span)
        .map(|idx| history_row(idx).as_array())
        .collect();
    let n = rows.len() as f64;

    let mut mean = [0.0; 4];
    for row in &rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n;
        }
    }

    let mut covariance = [[0.0; 4]; 4];
    for row in &rows {
        for i in 0..4 {
            for j in 0..4 {
                covariance[i][j] += (row[i] - mean[i]) * (row[j] - mean[j]) / n;
            }
        }
    }

    Ok((mean, covariance))
}

// Lower-triangular factor. Non-positive pivots (degenerate windows) are
// zeroed so the matching direction carries no variance.
fn cholesky(a: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    const PIVOT_FLOOR: f64 = 1e-14;
    let mut l = [[0.0; 4]; 4];
    for j in 0..4 {
        let diag = a[j][j] - (0..j).map(|k| l[j][k] * l[j][k]).sum::<f64>();
        if diag <= PIVOT_FLOOR {
            continue;
        }
        l[j][j] = diag.sqrt();
        for i in j + 1..4 {
            let off = a[i][j] - (0..j).map(|k| l[i][k] * l[j][k]).sum::<f64>();
            l[i][j] = off / l[j][j];
        }
    }
    l
}
