//! Day-count milestones and the retention call-due flag.

use time::Duration;

use crate::config::PipelineConfig;
use crate::dates::{days_between, delta_days, Timestamp};
use crate::model::{Flag, Milestones, ReportingRecord};

/// Derives incumbent status, milestones and `call_due` for one record.
///
/// The inactive override on `call_due` is a later stage and is not applied
/// here.
#[must_use]
pub fn derive_milestones(
    record: &ReportingRecord,
    config: &PipelineConfig,
    now: Timestamp,
) -> Milestones {
    let incumbent = config.is_incumbent_phrase(record.account.employment_status.as_deref());
    let intake = record.intake.intake_date;
    let initial_start = record
        .employment
        .initial_placement
        .as_ref()
        .and_then(|placement| placement.start_date);
    let last_job_hop = record.employment.last_job_hop;
    let last_retained = record.retention.last_date_retained;
    let last_contact = record.retention.last_retention_update;

    let base_anchor = if incumbent { intake } else { initial_start };
    let retention_anchor = match (last_job_hop, last_retained) {
        (None, _) => base_anchor,
        (Some(hop), Some(retained)) if retained - hop <= Duration::ZERO => base_anchor,
        (Some(hop), _) => Some(hop),
    };

    Milestones {
        incumbent_worker: Flag::from(incumbent),
        retention_milestone: delta_days(last_retained, retention_anchor),
        employment_milestone: delta_days(last_retained, base_anchor),
        contact_milestone: delta_days(last_contact, base_anchor),
        call_due: Flag::from(is_call_due(
            initial_start,
            last_contact,
            &config.call_checkpoints_days,
            now,
        )),
    }
}

/// Due when a placement has never been followed up, or when any checkpoint
/// has been reached since placement while the last contact predates it.
#[must_use]
pub fn is_call_due(
    initial_start: Option<Timestamp>,
    last_contact: Option<Timestamp>,
    checkpoints: &[i64],
    now: Timestamp,
) -> bool {
    let Some(start) = initial_start else {
        return false;
    };
    let Some(contact) = last_contact else {
        return true;
    };

    let since_placement = days_between(now, start);
    let contact_offset = days_between(contact, start);
    checkpoints
        .iter()
        .any(|checkpoint| since_placement >= *checkpoint && contact_offset < *checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::model::{AccountId, ClientAccount, Placement, PlacementType};

    const CHECKPOINTS: [i64; 5] = [30, 90, 180, 365, 730];

    fn at(raw: &str) -> Timestamp {
        match parse_timestamp(raw) {
            Some(value) => value,
            None => panic!("bad fixture timestamp {raw}"),
        }
    }

    fn placed(start: &str) -> Placement {
        Placement {
            start_date: Some(at(start)),
            placement_type: PlacementType::Initial,
            employer: None,
            position: None,
            wage: None,
            hours: None,
            details: crate::model::EmploymentDetails::default(),
        }
    }

    #[test]
    fn crossed_checkpoint_since_last_contact_is_due() {
        let now = at("2025-01-01");
        let start = now - Duration::days(400);
        let contact = now - Duration::days(100);
        assert!(is_call_due(Some(start), Some(contact), &CHECKPOINTS, now));
    }

    #[test]
    fn contact_after_last_reached_checkpoint_is_not_due() {
        let now = at("2025-01-01");
        let start = now - Duration::days(100);
        let contact = start + Duration::days(95);
        assert!(!is_call_due(Some(start), Some(contact), &CHECKPOINTS, now));
    }

    #[test]
    fn placement_without_contact_is_due() {
        let now = at("2025-01-01");
        assert!(is_call_due(Some(now), None, &CHECKPOINTS, now));
        assert!(!is_call_due(None, None, &CHECKPOINTS, now));
    }

    #[test]
    fn non_incumbent_milestones_anchor_on_initial_start() {
        let config = PipelineConfig::v1();
        let mut record = ReportingRecord::seed(ClientAccount::new(AccountId(1)));
        record.intake.intake_date = Some(at("2024-01-01"));
        record.employment.initial_placement = Some(placed("2024-02-01"));
        record.retention.last_date_retained = Some(at("2024-05-01"));
        record.retention.last_retention_update = Some(at("2024-05-11"));

        let milestones = derive_milestones(&record, &config, at("2024-06-01"));

        assert_eq!(milestones.incumbent_worker, Flag::No);
        assert_eq!(milestones.retention_milestone, Some(90));
        assert_eq!(milestones.employment_milestone, Some(90));
        assert_eq!(milestones.contact_milestone, Some(100));
    }

    #[test]
    fn incumbent_milestones_anchor_on_intake() {
        let config = PipelineConfig::v1();
        let mut account = ClientAccount::new(AccountId(2));
        account.employment_status = Some("Still Working".to_string());
        let mut record = ReportingRecord::seed(account);
        record.intake.intake_date = Some(at("2024-01-01"));
        record.retention.last_date_retained = Some(at("2024-01-31"));

        let milestones = derive_milestones(&record, &config, at("2024-06-01"));

        assert_eq!(milestones.incumbent_worker, Flag::Yes);
        assert_eq!(milestones.retention_milestone, Some(30));
        assert_eq!(milestones.contact_milestone, None);
        assert_eq!(milestones.call_due, Flag::No);
    }

    #[test]
    fn job_hop_resets_retention_anchor_only_when_retained_after_it() {
        let config = PipelineConfig::v1();
        let mut record = ReportingRecord::seed(ClientAccount::new(AccountId(3)));
        record.employment.initial_placement = Some(placed("2023-01-01"));
        record.employment.last_job_hop = Some(at("2024-01-01"));
        record.retention.last_date_retained = Some(at("2024-03-01"));

        let after_hop = derive_milestones(&record, &config, at("2024-06-01"));
        assert_eq!(after_hop.retention_milestone, Some(60));
        assert_eq!(after_hop.employment_milestone, Some(425));

        record.retention.last_date_retained = Some(at("2023-12-01"));
        let before_hop = derive_milestones(&record, &config, at("2024-06-01"));
        assert_eq!(before_hop.retention_milestone, Some(334));
    }

    #[test]
    fn missing_operands_stay_null() {
        let config = PipelineConfig::v1();
        let record = ReportingRecord::seed(ClientAccount::new(AccountId(4)));
        let milestones = derive_milestones(&record, &config, at("2024-06-01"));
        assert_eq!(milestones, Milestones::default());
    }
}
