use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{PlanError, PlanResult};
use super::types::Household;

/// Planned flows of one individual for one calendar year.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub anticipated_income: f64,
    pub ctrb_taxable: f64,
    pub ctrb_401k: f64,
    pub ctrb_roth_401k: f64,
    pub ctrb_ira: f64,
    pub ctrb_roth_ira: f64,
    pub roth_conversion: f64,
    /// Positive for a windfall, negative for a purchase.
    pub big_ticket: f64,
}

impl ScheduleRow {
    pub fn tax_deferred_contribution(&self) -> f64 {
        self.ctrb_401k + self.ctrb_ira
    }

    pub fn tax_free_contribution(&self) -> f64 {
        self.ctrb_roth_401k + self.ctrb_roth_ira
    }
}

/// Spreadsheet layout of a schedule row. Headers are matched after
/// lowercasing; absent columns and empty cells read as zero.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CsvRow {
    year: i32,
    #[serde(rename = "anticipated income", default)]
    anticipated_income: Option<f64>,
    #[serde(rename = "ctrb taxable", default)]
    ctrb_taxable: Option<f64>,
    #[serde(rename = "ctrb 401k", default)]
    ctrb_401k: Option<f64>,
    #[serde(rename = "ctrb roth 401k", default)]
    ctrb_roth_401k: Option<f64>,
    #[serde(rename = "ctrb ira", default)]
    ctrb_ira: Option<f64>,
    #[serde(rename = "ctrb roth ira", default)]
    ctrb_roth_ira: Option<f64>,
    #[serde(rename = "roth x", default)]
    roth_conversion: Option<f64>,
    #[serde(rename = "big ticket items", default)]
    big_ticket: Option<f64>,
}

impl From<&CsvRow> for ScheduleRow {
    fn from(row: &CsvRow) -> Self {
        Self {
            anticipated_income: row.anticipated_income.unwrap_or(0.0),
            ctrb_taxable: row.ctrb_taxable.unwrap_or(0.0),
            ctrb_401k: row.ctrb_401k.unwrap_or(0.0),
            ctrb_roth_401k: row.ctrb_roth_401k.unwrap_or(0.0),
            ctrb_ira: row.ctrb_ira.unwrap_or(0.0),
            ctrb_roth_ira: row.ctrb_roth_ira.unwrap_or(0.0),
            roth_conversion: row.roth_conversion.unwrap_or(0.0),
            big_ticket: row.big_ticket.unwrap_or(0.0),
        }
    }
}

const CSV_HEADERS: [&str; 9] = [
    "year",
    "anticipated income",
    "ctrb taxable",
    "ctrb 401k",
    "ctrb Roth 401k",
    "ctrb IRA",
    "ctrb Roth IRA",
    "Roth X",
    "big ticket items",
];

/// Year-indexed flows of one individual, starting at the plan's first year.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSchedule {
    pub start_year: i32,
    pub rows: Vec<ScheduleRow>,
}

impl ContributionSchedule {
    pub fn new(start_year: i32, rows: Vec<ScheduleRow>) -> Self {
        Self { start_year, rows }
    }

    pub fn zeros(start_year: i32, years: usize) -> Self {
        Self::new(start_year, vec![ScheduleRow::default(); years])
    }

    pub fn from_csv_path(
        name: &str,
        path: impl AsRef<Path>,
        current_year: i32,
    ) -> PlanResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_csv_reader(name, file, current_year)
    }

    pub fn from_csv_reader<R: Read>(name: &str, reader: R, current_year: i32) -> PlanResult<Self> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: csv::StringRecord = csv
            .headers()?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        if !headers.iter().any(|h| h == "year") {
            return Err(schedule_error(name, "missing 'year' column"));
        }
        csv.set_headers(headers);

        let mut start_year = None;
        let mut rows = Vec::new();
        for record in csv.deserialize::<CsvRow>() {
            let record = record?;
            if record.year < current_year {
                continue;
            }
            let expected = match start_year {
                None => {
                    if record.year != current_year {
                        return Err(schedule_error(
                            name,
                            format!("first year is {}, expected {current_year}", record.year),
                        ));
                    }
                    start_year = Some(record.year);
                    current_year
                }
                Some(first) => first + rows.len() as i32,
            };
            if record.year != expected {
                return Err(schedule_error(
                    name,
                    format!("year {} follows {}", record.year, expected - 1),
                ));
            }
            rows.push(ScheduleRow::from(&record));
        }

        let Some(start_year) = start_year else {
            return Err(schedule_error(name, format!("no rows from {current_year} on")));
        };
        log::info!("read {} years of contributions for {name}", rows.len());
        Ok(Self::new(start_year, rows))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> PlanResult<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(CSV_HEADERS)?;
        for (k, row) in self.rows.iter().enumerate() {
            csv.serialize((
                self.start_year + k as i32,
                row.anticipated_income,
                row.ctrb_taxable,
                row.ctrb_401k,
                row.ctrb_roth_401k,
                row.ctrb_ira,
                row.ctrb_roth_ira,
                row.roth_conversion,
                row.big_ticket,
            ))?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Last calendar year with a row.
    pub fn end_year(&self) -> i32 {
        self.start_year + self.rows.len() as i32 - 1
    }

    /// Row for plan year `n`; zero past the end of the schedule.
    pub fn row(&self, n: usize) -> ScheduleRow {
        self.rows.get(n).copied().unwrap_or_default()
    }

    pub fn row_for_year_mut(&mut self, year: i32) -> Option<&mut ScheduleRow> {
        let k = usize::try_from(year - self.start_year).ok()?;
        self.rows.get_mut(k)
    }
}

/// Checks one schedule per individual, sharing a start year and covering
/// each individual's horizon.
pub fn check_schedules(
    household: &Household,
    schedules: &[ContributionSchedule],
) -> PlanResult<()> {
    if schedules.len() != household.count() {
        return Err(PlanError::WrongLength {
            field: "contribution schedules",
            expected: household.count(),
            actual: schedules.len(),
        });
    }

    let first = schedules[0].start_year;
    for (who, schedule) in schedules.iter().enumerate() {
        let name = &household.individual(who).name;
        if schedule.start_year != first {
            return Err(PlanError::ScheduleStartMismatch {
                first,
                second: schedule.start_year,
            });
        }
        if schedule.start_year != household.current_year() {
            return Err(schedule_error(
                name,
                format!(
                    "starts in {}, plan starts in {}",
                    schedule.start_year,
                    household.current_year()
                ),
            ));
        }
        let required = household.year(household.horizon(who));
        if schedule.is_empty() || schedule.end_year() < required {
            return Err(PlanError::ScheduleTooShort {
                name: name.clone(),
                ends: schedule.end_year(),
                required,
            });
        }
        for (k, row) in schedule.rows.iter().enumerate() {
            let amounts = [
                row.ctrb_taxable,
                row.ctrb_401k,
                row.ctrb_roth_401k,
                row.ctrb_ira,
                row.ctrb_roth_ira,
                row.roth_conversion,
            ];
            if amounts.iter().any(|v| *v < 0.0) || row.anticipated_income < 0.0 {
                return Err(schedule_error(
                    name,
                    format!("negative amount in {}", schedule.start_year + k as i32),
                ));
            }
        }
    }
    Ok(())
}

fn schedule_error(name: &str, reason: impl Into<String>) -> PlanError {
    PlanError::Schedule {
        name: name.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Individual;

    const SHEET: &str = "\
Year,Anticipated Income,ctrb taxable,ctrb 401k,Ctrb Roth 401k,ctrb IRA,ctrb Roth IRA,Roth X,big ticket items
2023,1,1,1,1,1,1,1,1
2024,1,1,1,1,1,1,1,1
2025,90000,,23000,0,0,7000,0,
2026,90000,5000,23000,0,0,7000,10000,-30000
2027,,,,,,,,
";

    #[test]
    fn loads_case_insensitive_headers_and_defaults_empty_cells() {
        let schedule = ContributionSchedule::from_csv_reader("Jack", SHEET.as_bytes(), 2025)
            .expect("valid sheet");
        assert_eq!(schedule.start_year, 2025);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.end_year(), 2027);

        let first = schedule.row(0);
        assert_eq!(first.anticipated_income, 90_000.0);
        assert_eq!(first.ctrb_taxable, 0.0);
        assert_eq!(first.tax_deferred_contribution(), 23_000.0);
        assert_eq!(first.tax_free_contribution(), 7_000.0);

        let second = schedule.row(1);
        assert_eq!(second.roth_conversion, 10_000.0);
        assert_eq!(second.big_ticket, -30_000.0);
        assert_eq!(schedule.row(2), ScheduleRow::default());
        assert_eq!(schedule.row(40), ScheduleRow::default());
    }

    #[test]
    fn absent_columns_read_as_zero() {
        let sheet = "year,anticipated income\n2025,50000\n2026,50000\n";
        let schedule =
            ContributionSchedule::from_csv_reader("Ann", sheet.as_bytes(), 2025).unwrap();
        assert_eq!(schedule.row(1).anticipated_income, 50_000.0);
        assert_eq!(schedule.row(1).ctrb_roth_ira, 0.0);
    }

    #[test]
    fn rejects_gaps_and_late_starts() {
        let gap = "year,roth x\n2025,0\n2027,0\n";
        let err = ContributionSchedule::from_csv_reader("Ann", gap.as_bytes(), 2025).unwrap_err();
        assert!(err.to_string().contains("2027"));

        let late = "year,roth x\n2026,0\n";
        assert!(ContributionSchedule::from_csv_reader("Ann", late.as_bytes(), 2025).is_err());

        let no_year = "when,roth x\n2025,0\n";
        assert!(ContributionSchedule::from_csv_reader("Ann", no_year.as_bytes(), 2025).is_err());
    }

    #[test]
    fn csv_written_back_reads_the_same() {
        let schedule =
            ContributionSchedule::from_csv_reader("Jack", SHEET.as_bytes(), 2025).unwrap();
        let mut out = Vec::new();
        schedule.write_csv(&mut out).unwrap();
        let again = ContributionSchedule::from_csv_reader("Jack", out.as_slice(), 2025).unwrap();
        assert_eq!(again, schedule);
    }

    #[test]
    fn schedules_must_cover_each_horizon() {
        let household = Household::new(
            vec![Individual::new("Jack", 1961, 66), Individual::new("Jill", 1964, 64)],
            2025,
        )
        .unwrap();
        // Horizons are 2 and 3 years.
        let ok = vec![
            ContributionSchedule::zeros(2025, 3),
            ContributionSchedule::zeros(2025, 4),
        ];
        assert!(check_schedules(&household, &ok).is_ok());

        let short = vec![
            ContributionSchedule::zeros(2025, 3),
            ContributionSchedule::zeros(2025, 3),
        ];
        assert!(matches!(
            check_schedules(&household, &short),
            Err(PlanError::ScheduleTooShort { ends: 2027, required: 2028, .. })
        ));

        let mismatched = vec![
            ContributionSchedule::zeros(2025, 3),
            ContributionSchedule::zeros(2024, 5),
        ];
        assert!(matches!(
            check_schedules(&household, &mismatched),
            Err(PlanError::ScheduleStartMismatch { first: 2025, second: 2024 })
        ));

        assert!(check_schedules(&household, &ok[..1]).is_err());
    }
}
