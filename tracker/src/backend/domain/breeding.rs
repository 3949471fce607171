//! # Breeding Calculation Engine
//!
//! Reproductive KPIs over a snapshot of the herd. Every function here is pure:
//! the caller passes the collection, the reporting window and "today", so the
//! same inputs always give the same report.
//!
//! ## Periods
//!
//! [`generate_report`] takes the window as a [`ReportPeriod`]. An explicit
//! range carries its own start and end dates in `ReportPeriod::Range`, so
//! there are no separate range arguments. [`parse_period`] builds the period
//! from a kind name and optional start/end strings.
//!
//! ## Definitions
//!
//! For a window `[start, end]` (inclusive dates):
//!
//! - **total cows**: animals without an exit date on or before `start`
//! - **eligible cows**: of those, animals with a calving date whose voluntary
//!   waiting period (per-animal `vwp`, falling back to the report default)
//!   ends on or before `end`
//! - **inseminations**: attempts dated inside the window
//! - **inseminated cows**: eligible animals with at least one attempt inside
//!   the window
//! - **pregnancies**: pregnant animals whose latest attempt is inside the
//!   window
//! - **HDR** = inseminated / eligible, **CR** = pregnancies / inseminations,
//!   **PR** = HDR × CR, all in percent with one decimal
//! - **service period**: mean days from calving to the conceiving attempt
//! - **days open**: mean days from calving to `end` for eligible animals not
//!   yet pregnant

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate};
use shared::{BreedingReport, CowEntry, PeriodBounds, ReportPeriod};

use crate::backend::domain::models::entry::statuses;

/// Parse a stored date. Accepts `YYYY-MM-DD`, ISO/RFC 3339 date-times and
/// `DD.MM.YYYY`; anything else is `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Some(date_time.date_naive());
    }
    // Date-times without an offset, e.g. "2024-02-15T10:00:00"
    if let Some((date, _time)) = value.split_once(|c: char| c == 'T' || c == ' ') {
        if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(value, "%d.%m.%Y").ok()
}

/// Build a reporting period from its name and optional range ends
pub fn parse_period(kind: &str, start: Option<&str>, end: Option<&str>) -> Result<ReportPeriod> {
    match kind.trim().to_lowercase().as_str() {
        "month" => Ok(ReportPeriod::Month),
        "year" => Ok(ReportPeriod::Year),
        "range" => {
            let start = start
                .and_then(parse_date)
                .ok_or_else(|| anyhow!("Range period needs a valid start date"))?;
            let end = end
                .and_then(parse_date)
                .ok_or_else(|| anyhow!("Range period needs a valid end date"))?;
            Ok(ReportPeriod::Range { start, end })
        }
        other => Err(anyhow!("Unknown period '{}', expected month, year or range", other)),
    }
}

/// Resolve a period to concrete inclusive dates around `today`
pub fn get_period_bounds(period: &ReportPeriod, today: NaiveDate) -> PeriodBounds {
    match period {
        ReportPeriod::Month => {
            let start = today.with_day(1).unwrap_or(today);
            let next_month = if today.month() == 12 {
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
            };
            let end = next_month.and_then(|d| d.pred_opt()).unwrap_or(today);
            PeriodBounds { start, end }
        }
        ReportPeriod::Year => PeriodBounds {
            start: NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
            end: NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today),
        },
        ReportPeriod::Range { start, end } => PeriodBounds {
            start: (*start).min(*end),
            end: (*start).max(*end),
        },
    }
}

/// Whole days from `from` to `to`; `None` if either is absent
pub fn days_between(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Option<i64> {
    Some((to? - from?).num_days())
}

pub fn is_pregnant(entry: &CowEntry) -> bool {
    entry.status.contains(statuses::PREGNANT) || entry.status.contains(statuses::CALVED)
}

/// Pregnancy rate from heat detection and conception rates (percent)
pub fn calculate_pr(hdr: f64, cr: f64) -> f64 {
    round1((hdr / 100.0) * (cr / 100.0) * 100.0)
}

fn round1(value: f64) -> f64 {
    // Nudge so that x.x5 stored as x.x4999.. still rounds up
    ((value * 10.0) + 1e-9).round() / 10.0
}

fn percent(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round1(numerator as f64 / denominator as f64 * 100.0)
    }
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(round1(values.iter().sum::<i64>() as f64 / values.len() as f64))
    }
}

/// Dates of every recorded attempt; the top-level date stands in for an
/// empty history
fn attempt_dates(entry: &CowEntry) -> Vec<NaiveDate> {
    if entry.insemination_history.is_empty() {
        parse_date(&entry.insemination_date).into_iter().collect()
    } else {
        entry
            .insemination_history
            .iter()
            .filter_map(|record| parse_date(&record.date))
            .collect()
    }
}

fn effective_vwp(entry: &CowEntry, vwp_default: u32) -> i64 {
    if entry.vwp == 0 {
        vwp_default as i64
    } else {
        entry.vwp as i64
    }
}

/// Compute the breeding report for `period` over `entries`
pub fn generate_report(
    period: &ReportPeriod,
    vwp_default: u32,
    entries: &[CowEntry],
    today: NaiveDate,
) -> BreedingReport {
    let bounds = get_period_bounds(period, today);

    let herd: Vec<&CowEntry> = entries
        .iter()
        .filter(|entry| match parse_date(&entry.exit_date) {
            Some(exit) => exit > bounds.start,
            None => true,
        })
        .collect();

    let mut eligible_cows = 0;
    let mut inseminated_cows = 0;
    let mut inseminations = 0;
    let mut pregnancies = 0;
    let mut pregnant_cows = 0;
    let mut service_periods = Vec::new();
    let mut days_open = Vec::new();

    for entry in herd.iter().copied() {
        let calving = parse_date(&entry.calving_date);
        let attempts = attempt_dates(entry);
        let in_window = attempts.iter().filter(|d| bounds.contains(**d)).count();
        let latest = attempts.iter().max().copied();
        let pregnant = is_pregnant(entry);

        inseminations += in_window;

        let eligible = calving
            .map(|c| c + Duration::days(effective_vwp(entry, vwp_default)) <= bounds.end)
            .unwrap_or(false);
        if eligible {
            eligible_cows += 1;
            if in_window > 0 {
                inseminated_cows += 1;
            }
        }

        if pregnant {
            pregnant_cows += 1;
            if let Some(conceived) = latest.filter(|d| bounds.contains(*d)) {
                pregnancies += 1;
                if let Some(days) = days_between(calving, Some(conceived)).filter(|d| *d >= 0) {
                    service_periods.push(days);
                }
            }
        } else if eligible {
            if let Some(days) = days_between(calving, Some(bounds.end)).filter(|d| *d >= 0) {
                days_open.push(days);
            }
        }
    }

    let hdr = percent(inseminated_cows, eligible_cows);
    let cr = percent(pregnancies, inseminations);

    BreedingReport {
        period: period.name().to_string(),
        bounds,
        total_cows: herd.len(),
        eligible_cows,
        inseminated_cows,
        inseminations,
        pregnancies,
        pregnant_cows,
        pr: calculate_pr(hdr, cr),
        cr,
        hdr,
        service_period_days: mean(&service_periods),
        avg_days_open: mean(&days_open),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::InseminationRecord;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn attempt(date: &str, attempt_number: u32) -> InseminationRecord {
        InseminationRecord {
            date: date.to_string(),
            attempt_number,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-02-15"), Some(date("2024-02-15")));
        assert_eq!(parse_date("2024-02-15T10:30:00Z"), Some(date("2024-02-15")));
        assert_eq!(parse_date("2024-02-15T10:30:00"), Some(date("2024-02-15")));
        assert_eq!(parse_date("15.02.2024"), Some(date("2024-02-15")));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("2024-13-45"), None);
        assert_eq!(parse_date("вчера"), None);
    }

    #[test]
    fn test_days_between() {
        assert_eq!(days_between(Some(date("2024-01-01")), Some(date("2024-01-11"))), Some(10));
        assert_eq!(days_between(Some(date("2024-01-11")), Some(date("2024-01-01"))), Some(-10));
        assert_eq!(days_between(None, Some(date("2024-01-11"))), None);
        assert_eq!(days_between(Some(date("2024-01-11")), None), None);
    }

    #[test]
    fn test_is_pregnant() {
        let mut entry = CowEntry::new("1");
        entry.status = "Стельная".to_string();
        assert!(is_pregnant(&entry));
        entry.status = "Отёл".to_string();
        assert!(is_pregnant(&entry));
        entry.status = "Стельная 2 мес.".to_string();
        assert!(is_pregnant(&entry));
        entry.status = "Охота".to_string();
        assert!(!is_pregnant(&entry));
        entry.status = String::new();
        assert!(!is_pregnant(&entry));
    }

    #[test]
    fn test_calculate_pr() {
        assert_eq!(calculate_pr(50.0, 40.0), 20.0);
        assert_eq!(calculate_pr(33.0, 33.0), 10.9);
        assert_eq!(calculate_pr(0.0, 80.0), 0.0);
        assert_eq!(calculate_pr(100.0, 100.0), 100.0);
    }

    #[test]
    fn test_period_bounds() {
        let today = date("2024-02-10");
        assert_eq!(
            get_period_bounds(&ReportPeriod::Month, today),
            PeriodBounds { start: date("2024-02-01"), end: date("2024-02-29") }
        );
        assert_eq!(
            get_period_bounds(&ReportPeriod::Month, date("2023-12-31")),
            PeriodBounds { start: date("2023-12-01"), end: date("2023-12-31") }
        );
        assert_eq!(
            get_period_bounds(&ReportPeriod::Year, today),
            PeriodBounds { start: date("2024-01-01"), end: date("2024-12-31") }
        );

        let reversed = ReportPeriod::Range { start: date("2024-03-01"), end: date("2024-01-01") };
        let bounds = get_period_bounds(&reversed, today);
        assert!(bounds.start <= bounds.end);
        assert_eq!(bounds.start, date("2024-01-01"));
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("Month", None, None).unwrap(), ReportPeriod::Month);
        assert_eq!(
            parse_period("range", Some("2024-01-01"), Some("31.03.2024")).unwrap(),
            ReportPeriod::Range { start: date("2024-01-01"), end: date("2024-03-31") }
        );
        assert!(parse_period("range", Some("2024-01-01"), None).is_err());
        assert!(parse_period("week", None, None).is_err());
    }

    #[test]
    fn test_empty_collection_report() {
        let report = generate_report(&ReportPeriod::Year, 60, &[], date("2024-06-01"));
        assert_eq!(report.period, "year");
        assert_eq!(report.total_cows, 0);
        assert_eq!(report.inseminations, 0);
        assert_eq!(report.pr, 0.0);
        assert_eq!(report.cr, 0.0);
        assert_eq!(report.hdr, 0.0);
        assert_eq!(report.service_period_days, None);
        assert_eq!(report.avg_days_open, None);
    }

    #[test]
    fn test_report_metrics() {
        // Pregnant after two attempts in the window
        let mut a = CowEntry::new("A");
        a.calving_date = "2023-11-01".to_string();
        a.insemination_history = vec![attempt("2024-01-10", 1), attempt("2024-02-05", 2)];
        a.status = "Стельная".to_string();

        // Eligible, never inseminated
        let mut b = CowEntry::new("B");
        b.calving_date = "2024-01-15".to_string();

        // Still inside the waiting period, inseminated anyway
        let mut c = CowEntry::new("C");
        c.calving_date = "2024-03-01".to_string();
        c.insemination_date = "2024-03-20".to_string();
        c.status = "Осеменена".to_string();

        // Left the herd before the window
        let mut d = CowEntry::new("D");
        d.exit_date = "2023-12-01".to_string();
        d.calving_date = "2023-10-01".to_string();

        // Left during the window, no calving on record
        let mut e = CowEntry::new("E");
        e.exit_date = "2024-02-10".to_string();

        let period = ReportPeriod::Range { start: date("2024-01-01"), end: date("2024-03-31") };
        let report = generate_report(&period, 60, &[a, b, c, d, e], date("2024-06-01"));

        assert_eq!(report.period, "range");
        assert_eq!(report.total_cows, 4);
        assert_eq!(report.eligible_cows, 2);
        assert_eq!(report.inseminations, 3);
        assert_eq!(report.inseminated_cows, 1);
        assert_eq!(report.pregnancies, 1);
        assert_eq!(report.pregnant_cows, 1);
        assert_eq!(report.hdr, 50.0);
        assert_eq!(report.cr, 33.3);
        assert_eq!(report.pr, calculate_pr(report.hdr, report.cr));
        assert_eq!(report.service_period_days, Some(96.0));
        assert_eq!(report.avg_days_open, Some(76.0));
    }

    #[test]
    fn test_zero_vwp_falls_back_to_default() {
        let mut cow = CowEntry::new("1");
        cow.calving_date = "2024-01-01".to_string();
        cow.vwp = 0;

        let period = ReportPeriod::Range { start: date("2024-02-01"), end: date("2024-02-15") };
        assert_eq!(generate_report(&period, 60, &[cow.clone()], date("2024-06-01")).eligible_cows, 0);
        assert_eq!(generate_report(&period, 30, &[cow], date("2024-06-01")).eligible_cows, 1);
    }
}
