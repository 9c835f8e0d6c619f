//! Fiscal-year and grant-cycle reports built from reporting records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, Month, PrimitiveDateTime, Time};
use tracing::info;

use crate::aggregate::{Pipeline, RunReport};
use crate::config::PipelineConfig;
use crate::dates::{coerce, opt_timestamp, parse_as_of, Timestamp};
use crate::enrich::enrollment_anchor;
use crate::model::{AccountId, CertificationAward, Placement, Quarter, ReportingRecord, Snapshot};
use crate::PipelineError;

/// Half-open `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl ReportWindow {
    #[must_use]
    pub fn contains(&self, value: Option<Timestamp>) -> bool {
        value.is_some_and(|date| self.start <= date && date < self.end)
    }
}

/// `[July 1 of year - 1, July 1 of year)`.
///
/// # Errors
/// Returns [`PipelineError::Validation`] when the year is outside the
/// supported calendar range.
pub fn fiscal_year_window(year: i32) -> Result<ReportWindow, PipelineError> {
    let july_first = |calendar_year: i32| {
        Date::from_calendar_date(calendar_year, Month::July, 1)
            .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT))
            .map_err(|err| PipelineError::Validation(format!("invalid fiscal year {year}: {err}")))
    };
    let previous = year
        .checked_sub(1)
        .ok_or_else(|| PipelineError::Validation(format!("invalid fiscal year {year}")))?;
    Ok(ReportWindow {
        start: july_first(previous)?,
        end: july_first(year)?,
    })
}

/// Restricts a snapshot to one fiscal year: accounts whose enrollment anchor
/// (taken from `records`) falls in the window, and activities created on or
/// after the window start.
#[must_use]
pub fn fiscal_year_snapshot(
    snapshot: &Snapshot,
    records: &[ReportingRecord],
    config: &PipelineConfig,
    window: ReportWindow,
) -> Snapshot {
    let anchors: BTreeMap<AccountId, Option<Timestamp>> = records
        .iter()
        .map(|record| (record.id(), enrollment_anchor(record, config)))
        .collect();

    Snapshot {
        accounts: snapshot
            .accounts
            .iter()
            .filter(|account| window.contains(anchors.get(&account.id).copied().flatten()))
            .cloned()
            .collect(),
        activities: snapshot
            .activities
            .iter()
            .filter(|event| {
                coerce(event.created_date.as_deref()).is_some_and(|created| created >= window.start)
            })
            .cloned()
            .collect(),
        wage_records: snapshot.wage_records.clone(),
    }
}

/// Head counts over a record set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KpiSummary {
    pub clients: usize,
    pub active: usize,
    pub inactive: usize,
    pub enrollment_satisfied: usize,
    pub enrollment_pending: usize,
    pub program_completion: usize,
    pub completed_without_employment: usize,
    pub gained_employment: usize,
    pub gained_new_employment: usize,
    pub currently_employed: usize,
    pub gained_certification: usize,
    pub status_unknown: usize,
    pub call_due: usize,
    pub incumbent_advancement: usize,
    pub unreported_placement: usize,
    pub average_days_to_employment: Option<f64>,
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(records: &[ReportingRecord]) -> KpiSummary {
    let count = |pick: fn(&ReportingRecord) -> bool| records.iter().filter(|record| pick(record)).count();
    let days: Vec<i64> = records
        .iter()
        .filter_map(|record| record.kpis.days_to_employment)
        .collect();

    KpiSummary {
        clients: records.len(),
        active: count(|record| record.kpis.active.is_yes()),
        inactive: count(|record| record.enrollment.is_inactive()),
        enrollment_satisfied: count(|record| record.kpis.enrollment_satisfied.is_yes()),
        enrollment_pending: count(|record| record.kpis.enrollment_pending.is_yes()),
        program_completion: count(|record| record.kpis.program_completion.is_yes()),
        completed_without_employment: count(|record| {
            record.kpis.completed_without_employment.is_yes()
        }),
        gained_employment: count(|record| record.kpis.gained_employment.is_yes()),
        gained_new_employment: count(|record| record.kpis.gained_new_employment.is_yes()),
        currently_employed: count(|record| record.kpis.currently_employed.is_yes()),
        gained_certification: count(|record| record.certifications.gained_certification.is_yes()),
        status_unknown: count(|record| record.kpis.status_unknown.is_yes()),
        call_due: count(|record| record.milestones.call_due.is_yes()),
        incumbent_advancement: count(|record| record.kpis.incumbent_advancement.is_yes()),
        unreported_placement: count(|record| record.kpis.unreported_placement.is_yes()),
        average_days_to_employment: (!days.is_empty())
            .then(|| days.iter().sum::<i64>() as f64 / days.len() as f64),
    }
}

/// Employment-focused projection of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmploymentView {
    pub account_id: AccountId,
    pub name: Option<String>,
    pub grant_fund: String,
    pub case_manager: Option<String>,
    pub training_program: Option<String>,
    #[serde(default, with = "opt_timestamp")]
    pub cohort_date: Option<Timestamp>,
    pub quarter: Option<Quarter>,
    pub fiscal_year: Option<i32>,
    pub gained_certification: bool,
    pub initial_placement: Option<Placement>,
    pub current_placement: Option<Placement>,
    pub retention_milestone: Option<i64>,
    pub employment_milestone: Option<i64>,
    pub contact_milestone: Option<i64>,
    #[serde(default, with = "opt_timestamp")]
    pub last_retention_update: Option<Timestamp>,
    pub last_retention_status: Option<String>,
    #[serde(default, with = "opt_timestamp")]
    pub last_date_retained: Option<Timestamp>,
    #[serde(default, with = "opt_timestamp")]
    pub last_job_hop: Option<Timestamp>,
    pub advancement: bool,
    pub call_due: bool,
}

impl From<&ReportingRecord> for EmploymentView {
    fn from(record: &ReportingRecord) -> Self {
        Self {
            account_id: record.id(),
            name: record.account.name.clone(),
            grant_fund: record.grants.grant_fund.clone(),
            case_manager: record.case_manager.clone(),
            training_program: record.intake.training_program.clone(),
            cohort_date: record.enrollment.cohort_date,
            quarter: record.fiscal.quarter,
            fiscal_year: record.fiscal.fiscal_year,
            gained_certification: record.certifications.gained_certification.is_yes(),
            initial_placement: record.employment.initial_placement.clone(),
            current_placement: record.employment.current_placement.clone(),
            retention_milestone: record.milestones.retention_milestone,
            employment_milestone: record.milestones.employment_milestone,
            contact_milestone: record.milestones.contact_milestone,
            last_retention_update: record.retention.last_retention_update,
            last_retention_status: record.retention.last_retention_status.clone(),
            last_date_retained: record.retention.last_date_retained,
            last_job_hop: record.employment.last_job_hop,
            advancement: record.retention.advancement.is_yes(),
            call_due: record.milestones.call_due.is_yes(),
        }
    }
}

/// Certification-focused projection of a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificationView {
    pub account_id: AccountId,
    pub name: Option<String>,
    pub grant_fund: String,
    pub case_manager: Option<String>,
    pub training_program: Option<String>,
    #[serde(default, with = "opt_timestamp")]
    pub cohort_date: Option<Timestamp>,
    pub quarter: Option<Quarter>,
    pub fiscal_year: Option<i32>,
    pub gained_employment: bool,
    pub certifications: BTreeMap<String, CertificationAward>,
}

impl From<&ReportingRecord> for CertificationView {
    fn from(record: &ReportingRecord) -> Self {
        Self {
            account_id: record.id(),
            name: record.account.name.clone(),
            grant_fund: record.grants.grant_fund.clone(),
            case_manager: record.case_manager.clone(),
            training_program: record.intake.training_program.clone(),
            cohort_date: record.enrollment.cohort_date,
            quarter: record.fiscal.quarter,
            fiscal_year: record.fiscal.fiscal_year,
            gained_employment: record.kpis.gained_employment.is_yes(),
            certifications: record.certifications.certifications.clone(),
        }
    }
}

/// One report: every record plus the KPI, employment and certification views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSheets {
    pub title: String,
    pub summary: KpiSummary,
    pub data: Vec<ReportingRecord>,
    pub employments: Vec<EmploymentView>,
    pub certifications: Vec<CertificationView>,
}

impl ReportSheets {
    #[must_use]
    pub fn build(title: String, records: Vec<ReportingRecord>) -> Self {
        let employments = records
            .iter()
            .filter(|record| record.kpis.gained_employment.is_yes())
            .map(EmploymentView::from)
            .collect();
        let certifications = records
            .iter()
            .filter(|record| record.certifications.gained_certification.is_yes())
            .map(CertificationView::from)
            .collect();
        Self {
            title,
            summary: summarize(&records),
            data: records,
            employments,
            certifications,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiscalYearReport {
    pub fiscal_year: i32,
    pub run: RunReport,
    #[serde(flatten)]
    pub sheets: ReportSheets,
}

/// Recomputes the pipeline over one fiscal year's slice of `snapshot`.
///
/// Enrollment anchors come from a full run over the whole snapshot, then
/// the restricted snapshot is recomputed from scratch.
///
/// # Errors
/// Returns [`PipelineError::Validation`] for an unsupported fiscal year.
pub fn fiscal_year_report(
    pipeline: &Pipeline,
    snapshot: &Snapshot,
    fiscal_year: i32,
    now: Timestamp,
) -> Result<FiscalYearReport, PipelineError> {
    let window = fiscal_year_window(fiscal_year)?;
    let full = pipeline.run(snapshot, now);
    let restricted = fiscal_year_snapshot(snapshot, &full.records, pipeline.config(), window);
    info!(
        fiscal_year,
        accounts = restricted.accounts.len(),
        activities = restricted.activities.len(),
        "building fiscal year report"
    );

    let output = pipeline.run(&restricted, now);
    Ok(FiscalYearReport {
        fiscal_year,
        run: output.report,
        sheets: ReportSheets::build(format!("FY {fiscal_year}"), output.records),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleBounds {
    pub start: String,
    pub end: String,
}

/// One reporting cycle of a grant, e.g. `SNAP` / `2024`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantCycle {
    pub grant: String,
    pub cycle: String,
    pub start: String,
    pub end: String,
}

impl GrantCycle {
    /// # Errors
    /// Returns [`PipelineError::Validation`] when a bound is not a timestamp
    /// or the window is empty.
    pub fn window(&self) -> Result<ReportWindow, PipelineError> {
        let window = ReportWindow {
            start: parse_as_of(&self.start)?,
            end: parse_as_of(&self.end)?,
        };
        if window.start >= window.end {
            return Err(PipelineError::Validation(format!(
                "grant cycle {}-{} ends before it starts",
                self.grant, self.cycle
            )));
        }
        Ok(window)
    }
}

/// Decodes `{ "<grant>": { "<cycle>": { "start": .., "end": .. } } }`.
///
/// # Errors
/// Returns [`PipelineError::Configuration`] when the payload does not have
/// that shape.
pub fn grant_cycles_from_json(value: &Value) -> Result<Vec<GrantCycle>, PipelineError> {
    let decoded: BTreeMap<String, BTreeMap<String, CycleBounds>> =
        serde_json::from_value(value.clone()).map_err(|err| {
            PipelineError::Configuration(format!("invalid grant cycle JSON payload: {err}"))
        })?;

    Ok(decoded
        .into_iter()
        .flat_map(|(grant, cycles)| {
            cycles.into_iter().map(move |(cycle, bounds)| GrantCycle {
                grant: grant.clone(),
                cycle,
                start: bounds.start,
                end: bounds.end,
            })
        })
        .collect())
}

/// Date that places a record inside a grant cycle: first SNAP confirmation
/// month for SNAP, EARN entry for EARN, intake date for anything else.
fn cycle_date(record: &ReportingRecord, grant: &str, config: &PipelineConfig) -> Option<Timestamp> {
    let tokens = &config.grant_tokens;
    if grant == tokens.snap {
        record
            .snap
            .snap_initial_confirmation
            .as_deref()
            .and_then(confirmation_month)
    } else if grant == tokens.earn {
        record.grants.earn_entry
    } else {
        record.intake.intake_date
    }
}

fn confirmation_month(raw: &str) -> Option<Timestamp> {
    let (month, year) = raw.split_once('-')?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let date = Date::from_calendar_date(year.parse().ok()?, month, 1).ok()?;
    Some(PrimitiveDateTime::new(date, Time::MIDNIGHT))
}

/// Selects the records counted towards a grant cycle.
///
/// # Errors
/// Returns [`PipelineError::Validation`] when the cycle bounds are invalid.
pub fn grant_cycle_records(
    records: &[ReportingRecord],
    cycle: &GrantCycle,
    config: &PipelineConfig,
) -> Result<Vec<ReportingRecord>, PipelineError> {
    let window = cycle.window()?;
    let is_cdbg = cycle.grant == config.grant_tokens.cdbg;
    let cdbg_year = window.end.year();

    Ok(records
        .iter()
        .filter(|record| record.grants.grant_fund.contains(cycle.grant.as_str()))
        .filter(|record| {
            if is_cdbg {
                record.fiscal.fiscal_year == Some(cdbg_year)
            } else {
                window.contains(cycle_date(record, &cycle.grant, config))
            }
        })
        .cloned()
        .collect())
}

/// # Errors
/// Returns [`PipelineError::Validation`] when the cycle bounds are invalid.
pub fn grant_cycle_report(
    records: &[ReportingRecord],
    cycle: &GrantCycle,
    config: &PipelineConfig,
) -> Result<ReportSheets, PipelineError> {
    let selected = grant_cycle_records(records, cycle, config)?;
    info!(
        grant = %cycle.grant,
        cycle = %cycle.cycle,
        clients = selected.len(),
        "building grant cycle report"
    );
    Ok(ReportSheets::build(
        format!("{}_{}", cycle.grant, cycle.cycle),
        selected,
    ))
}
