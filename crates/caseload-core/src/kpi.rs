//! Outcome KPI flags.
//!
//! Flags are derived in a fixed order; each one reads only the record fields
//! populated by earlier stages and the flags computed before it.

use time::Duration;

use crate::config::PipelineConfig;
use crate::dates::{delta_days, Timestamp};
use crate::model::{parse_number, present, Flag, Kpis, ReportingRecord};

#[must_use]
pub fn derive_kpis(record: &ReportingRecord, config: &PipelineConfig) -> Kpis {
    let has_program = record.has_program();
    let inactive = record.enrollment.is_inactive();
    let incumbent = record.milestones.incumbent_worker.is_yes();
    let status = record.retention.last_retention_status.as_deref();
    let not_retained = config.retention_markers.job_not_retained.as_str();
    let initial = record.employment.initial_placement.as_ref();
    let current = record.employment.current_placement.as_ref();

    let program_completion = record.enrollment.training_complete.is_yes()
        || record.certifications.gained_certification.is_yes()
        || initial.is_some();
    let gained_employment = initial.is_some();
    let enrollment_satisfied = record.intake.training_program.as_deref()
        == Some(config.enrollment_exempt_program.as_str())
        || record.enrollment.cohort_date.is_some();
    let enrollment_pending = has_program && !enrollment_satisfied && !inactive;
    let currently_employed = (gained_employment || incumbent) && status != Some(not_retained);
    let active = (!currently_employed || incumbent)
        && (!gained_employment || status.is_some_and(|text| text.contains(not_retained)))
        && !inactive
        && has_program;
    let status_unknown = has_program && !inactive && !active && !currently_employed;
    let days_to_employment = delta_days(
        initial.and_then(|placement| placement.start_date),
        record.intake.intake_date,
    );
    let completed_without_employment = program_completion && !gained_employment && !inactive;

    let previous_wage = previous_amount(record.account.previous_wage.as_deref());
    let current_wage = current.and_then(|placement| placement.wage);
    let incumbent_wage_increase = incumbent
        && matches!((previous_wage, current_wage), (Some(before), Some(after)) if before < after);

    let previous_hours = previous_amount(record.account.previous_hours.as_deref());
    let current_hours = current.and_then(|placement| placement.hours).unwrap_or(0.0);
    let incumbent_hours_increase = incumbent
        && previous_hours.is_some_and(|before| whole(before) < whole(current_hours));

    let unreported_placement = !gained_employment && record.grants.wage_record_confirmed.is_yes();

    Kpis {
        program_completion: Flag::from(program_completion),
        gained_employment: Flag::from(gained_employment),
        enrollment_satisfied: Flag::from(enrollment_satisfied),
        enrollment_pending: Flag::from(enrollment_pending),
        currently_employed: Flag::from(currently_employed),
        active: Flag::from(active),
        status_unknown: Flag::from(status_unknown),
        days_to_employment,
        completed_without_employment: Flag::from(completed_without_employment),
        incumbent_wage_increase: Flag::from(incumbent_wage_increase),
        incumbent_hours_increase: Flag::from(incumbent_hours_increase),
        unreported_placement: Flag::from(unreported_placement),
        ..Kpis::default()
    }
}

/// Returns `(gained_new_employment, incumbent_advancement)`.
///
/// Advancement is a wage increase, or an hours increase without new
/// employment.
#[must_use]
pub fn new_employment(record: &ReportingRecord) -> (Flag, Flag) {
    let current_start = record
        .employment
        .current_placement
        .as_ref()
        .and_then(|placement| placement.start_date);
    let gained_new = matches!(
        (record.intake.intake_date, current_start),
        (Some(intake), Some(start)) if intake <= start
    );
    let kpis = &record.kpis;
    let advancement = kpis.incumbent_wage_increase.is_yes()
        || (kpis.incumbent_hours_increase.is_yes() && !gained_new);
    (Flag::from(gained_new), Flag::from(advancement))
}

/// Flags records enrolled in the most recent cohort while "now" is still
/// inside the active-training window.
pub fn mark_active_training<'a>(
    records: impl IntoIterator<Item = &'a mut ReportingRecord>,
    config: &PipelineConfig,
    now: Timestamp,
) {
    let mut records: Vec<&'a mut ReportingRecord> = records.into_iter().collect();
    let latest = records
        .iter()
        .filter_map(|record| record.enrollment.cohort_date)
        .max();
    let window = Duration::days(config.active_training_window_days);

    for record in &mut records {
        let in_training = match (record.enrollment.cohort_date, latest) {
            (Some(cohort), Some(latest)) if cohort == latest => {
                // An unrepresentable window end lies after any "now".
                match cohort.checked_add(window) {
                    Some(end) => now <= end,
                    None => true,
                }
            }
            _ => false,
        };
        record.kpis.in_active_training = Flag::from(in_training);
    }
}

/// Blank, whitespace, zero and unparseable prior amounts are absent.
fn previous_amount(raw: Option<&str>) -> Option<f64> {
    present(raw)
        .and_then(|text| parse_number(Some(text)))
        .filter(|value| *value != 0.0)
}

#[allow(clippy::cast_possible_truncation)]
fn whole(value: f64) -> i64 {
    value.trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::model::{AccountId, ClientAccount, EmploymentDetails, Placement, PlacementType};

    fn at(raw: &str) -> Timestamp {
        match parse_timestamp(raw) {
            Some(value) => value,
            None => panic!("bad fixture timestamp {raw}"),
        }
    }

    fn placement(start: &str, wage: Option<f64>, hours: Option<f64>) -> Placement {
        Placement {
            start_date: Some(at(start)),
            placement_type: PlacementType::Initial,
            employer: Some("Harbor Freight".to_string()),
            position: None,
            wage,
            hours,
            details: EmploymentDetails::default(),
        }
    }

    fn enrolled(program: &str) -> ReportingRecord {
        let mut record = ReportingRecord::seed(ClientAccount::new(AccountId(1)));
        record.intake.training_program = Some(program.to_string());
        record.intake.intake_date = Some(at("2024-01-10"));
        record
    }

    fn incumbent(mut record: ReportingRecord) -> ReportingRecord {
        record.milestones.incumbent_worker = Flag::Yes;
        record
    }

    #[test]
    fn enrolled_without_outcomes_is_active_and_pending() {
        let kpis = derive_kpis(&enrolled("CTC"), &PipelineConfig::v1());

        assert_eq!(kpis.active, Flag::Yes);
        assert_eq!(kpis.enrollment_pending, Flag::Yes);
        assert_eq!(kpis.status_unknown, Flag::No);
        assert_eq!(kpis.program_completion, Flag::No);
    }

    #[test]
    fn placement_makes_client_employed_until_not_retained() {
        let config = PipelineConfig::v1();
        let mut record = enrolled("OOO");
        record.employment.initial_placement = Some(placement("2024-02-19", None, None));

        let kpis = derive_kpis(&record, &config);
        assert_eq!(kpis.gained_employment, Flag::Yes);
        assert_eq!(kpis.currently_employed, Flag::Yes);
        assert_eq!(kpis.active, Flag::No);
        assert_eq!(kpis.enrollment_satisfied, Flag::Yes);
        assert_eq!(kpis.days_to_employment, Some(40));

        record.retention.last_retention_status = Some("Job Not Retained".to_string());
        let kpis = derive_kpis(&record, &config);
        assert_eq!(kpis.currently_employed, Flag::No);
        assert_eq!(kpis.active, Flag::Yes);
    }

    #[test]
    fn inactive_clients_are_neither_active_nor_unknown() {
        let mut record = enrolled("CTC");
        record.enrollment.inactive = Some(Flag::Yes);

        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.active, Flag::No);
        assert_eq!(kpis.status_unknown, Flag::No);
        assert_eq!(kpis.enrollment_pending, Flag::No);
    }

    #[test]
    fn status_unknown_when_nothing_else_applies() {
        let mut record = enrolled("CTC");
        record.employment.initial_placement = Some(placement("2024-02-19", None, None));
        record.retention.last_retention_status = Some("Job Not Retained - Laid Off".to_string());

        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.currently_employed, Flag::Yes);
        assert_eq!(kpis.status_unknown, Flag::No);

        record.retention.last_retention_status = Some("Job Not Retained".to_string());
        record.intake.training_program = None;
        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.status_unknown, Flag::No);
        assert_eq!(kpis.active, Flag::No);
    }

    #[test]
    fn absent_previous_wage_blocks_increase() {
        let config = PipelineConfig::v1();
        for previous in [None, Some(""), Some("  "), Some("0"), Some("0.0")] {
            let mut record = incumbent(enrolled("CTC"));
            record.account.previous_wage = previous.map(ToString::to_string);
            record.employment.current_placement = Some(placement("2024-03-01", Some(22.0), None));

            let kpis = derive_kpis(&record, &config);
            assert_eq!(kpis.incumbent_wage_increase, Flag::No, "{previous:?}");
        }
    }

    #[test]
    fn incumbent_wage_and_hours_increases() {
        let config = PipelineConfig::v1();
        let mut record = incumbent(enrolled("CTC"));
        record.account.previous_wage = Some("15.50".to_string());
        record.account.previous_hours = Some("20.9".to_string());
        record.employment.current_placement =
            Some(placement("2024-03-01", Some(18.0), Some(21.2)));

        let kpis = derive_kpis(&record, &config);
        assert_eq!(kpis.incumbent_wage_increase, Flag::Yes);
        assert_eq!(kpis.incumbent_hours_increase, Flag::Yes);

        record.milestones.incumbent_worker = Flag::No;
        let kpis = derive_kpis(&record, &config);
        assert_eq!(kpis.incumbent_wage_increase, Flag::No);
        assert_eq!(kpis.incumbent_hours_increase, Flag::No);
    }

    #[test]
    fn truncated_hours_must_strictly_increase() {
        let mut record = incumbent(enrolled("CTC"));
        record.account.previous_hours = Some("20.1".to_string());
        record.employment.current_placement =
            Some(placement("2024-03-01", None, Some(20.9)));

        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.incumbent_hours_increase, Flag::No);
    }

    #[test]
    fn unreported_placement_needs_wage_record_without_placement() {
        let mut record = enrolled("CTC");
        record.grants.wage_record_confirmed = Flag::Yes;
        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.unreported_placement, Flag::Yes);

        record.employment.initial_placement = Some(placement("2024-02-19", None, None));
        let kpis = derive_kpis(&record, &PipelineConfig::v1());
        assert_eq!(kpis.unreported_placement, Flag::No);
    }

    #[test]
    fn hours_advancement_requires_no_new_employment() {
        let mut record = enrolled("CTC");
        record.kpis.incumbent_hours_increase = Flag::Yes;
        record.employment.current_placement = Some(placement("2024-03-01", None, None));

        assert_eq!(new_employment(&record), (Flag::Yes, Flag::No));

        record.employment.current_placement = Some(placement("2023-03-01", None, None));
        assert_eq!(new_employment(&record), (Flag::No, Flag::Yes));

        record.kpis.incumbent_wage_increase = Flag::Yes;
        record.employment.current_placement = Some(placement("2024-03-01", None, None));
        assert_eq!(new_employment(&record), (Flag::Yes, Flag::Yes));
    }

    #[test]
    fn active_training_tracks_latest_cohort_window() {
        let config = PipelineConfig::v1();
        let mut latest = enrolled("CTC");
        latest.enrollment.cohort_date = Some(at("2024-05-01"));
        let mut older = enrolled("CTC");
        older.enrollment.cohort_date = Some(at("2024-02-01"));
        let mut records = vec![latest, older];

        mark_active_training(records.iter_mut(), &config, at("2024-05-22"));
        assert_eq!(records[0].kpis.in_active_training, Flag::Yes);
        assert_eq!(records[1].kpis.in_active_training, Flag::No);

        mark_active_training(records.iter_mut(), &config, at("2024-05-22T00:00:01"));
        assert_eq!(records[0].kpis.in_active_training, Flag::No);
    }

    #[test]
    fn cohort_window_past_calendar_end_stays_open() {
        let config = PipelineConfig::v1();
        let mut record = enrolled("CTC");
        record.enrollment.cohort_date = Some(at("9999-12-25"));
        let mut records = vec![record];

        mark_active_training(records.iter_mut(), &config, at("2024-06-01"));
        assert_eq!(records[0].kpis.in_active_training, Flag::Yes);
    }
}
