//! Partitions the raw activity log into typed row sets.
//!
//! Each event is matched by its exact `type` label. Unknown labels are
//! dropped and counted; payload markers come from case-sensitive substring
//! tests on the `placementretention` text.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::aggregate::RunDiagnostics;
use crate::config::PipelineConfig;
use crate::dates::{parse_timestamp, Timestamp};
use crate::model::{
    parse_number, present, AccountId, ActivityEvent, ActivityKind, EmploymentDetails, Flag,
    PlacementType,
};

const MISSING_TYPE_LABEL: &str = "<missing>";

/// Secondary ordering used to break ties between rows sharing an ordering
/// value: activity id ascending (rows without one last), then source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOrder {
    pub activity_id: Option<i64>,
    pub seq: usize,
}

impl Ord for RowOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.activity_id, other.activity_id) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for RowOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub trait Keyed {
    fn account(&self) -> AccountId;
    fn order(&self) -> RowOrder;
}

macro_rules! keyed_rows {
    ($($row:ty),+ $(,)?) => {
        $(
            impl Keyed for $row {
                fn account(&self) -> AccountId {
                    self.account
                }

                fn order(&self) -> RowOrder {
                    self.order
                }
            }
        )+
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub start_date: Option<Timestamp>,
    pub placement_type: PlacementType,
    pub employer: Option<String>,
    pub position: Option<String>,
    pub wage: Option<f64>,
    pub hours: Option<f64>,
    pub details: EmploymentDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub status: Option<String>,
    pub advancement: bool,
    pub retained: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificationRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub certification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingStatusRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub start_date: Option<Timestamp>,
}

/// An `Active` or `Inactive` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChangeRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub inactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub start_date: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantIdRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturningRow {
    pub account: AccountId,
    pub order: RowOrder,
    pub date: Option<Timestamp>,
    pub training_program: Option<String>,
}

keyed_rows!(
    PlacementRow,
    RetentionRow,
    CertificationRow,
    TrainingStatusRow,
    CohortRow,
    StatusChangeRow,
    DatedRow,
    StartRow,
    GrantIdRow,
    ReturningRow,
);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedActivities {
    pub placements: Vec<PlacementRow>,
    pub retention: Vec<RetentionRow>,
    pub certifications: Vec<CertificationRow>,
    pub training_status: Vec<TrainingStatusRow>,
    pub cohorts: Vec<CohortRow>,
    pub status_changes: Vec<StatusChangeRow>,
    pub snap_confirmations: Vec<DatedRow>,
    pub earn_entries: Vec<StartRow>,
    pub earn_exits: Vec<StartRow>,
    pub snap_ids: Vec<GrantIdRow>,
    pub earn_ids: Vec<GrantIdRow>,
    pub returning: Vec<ReturningRow>,
    /// Recognised but not reduced into any reporting field.
    pub train_up_activities: usize,
}

impl ClassifiedActivities {
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
            + self.retention.len()
            + self.certifications.len()
            + self.training_status.len()
            + self.cohorts.len()
            + self.status_changes.len()
            + self.snap_confirmations.len()
            + self.earn_entries.len()
            + self.earn_exits.len()
            + self.snap_ids.len()
            + self.earn_ids.len()
            + self.returning.len()
            + self.train_up_activities
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partitions `events` by activity kind. Source position is the index in
/// `events`.
pub fn classify(
    events: &[ActivityEvent],
    config: &PipelineConfig,
    diagnostics: &mut RunDiagnostics,
) -> ClassifiedActivities {
    let mut classified = ClassifiedActivities::default();
    let mut unknown: BTreeMap<String, usize> = BTreeMap::new();

    for (seq, event) in events.iter().enumerate() {
        let label = event.activity_type.as_deref().unwrap_or(MISSING_TYPE_LABEL);
        let Some(kind) = config.activity_types.kind_of(label) else {
            *unknown.entry(label.to_string()).or_default() += 1;
            continue;
        };

        let order = RowOrder {
            activity_id: event.id,
            seq,
        };
        let account = event.account_id;
        let mut date_of = |raw: Option<&str>| coerce_counted(raw, diagnostics);

        match kind {
            ActivityKind::ClientBecameEmployed => {
                classified.placements.push(PlacementRow {
                    account,
                    order,
                    start_date: date_of(event.start_date.as_deref()),
                    placement_type: placement_type(event, config),
                    employer: event.employer.clone(),
                    position: event.position.clone(),
                    wage: parse_number(event.wage.as_deref()),
                    hours: parse_number(event.hours.as_deref()),
                    details: employment_details(event, config),
                });
            }
            ActivityKind::Retention => {
                let markers = &config.retention_markers;
                classified.retention.push(RetentionRow {
                    account,
                    order,
                    date: date_of(event.date.as_deref()),
                    status: event.placement_retention.clone(),
                    advancement: marker(event, &markers.advancement),
                    retained: marker(event, &markers.job_retained),
                });
            }
            ActivityKind::Certification => classified.certifications.push(CertificationRow {
                account,
                order,
                date: date_of(event.date.as_deref()),
                certification: event.certification.clone(),
            }),
            ActivityKind::TrainingStatus => {
                classified.training_status.push(TrainingStatusRow {
                    account,
                    order,
                    status: event.training_status.clone(),
                });
            }
            ActivityKind::Cohort => classified.cohorts.push(CohortRow {
                account,
                order,
                date: date_of(event.date.as_deref()),
                start_date: date_of(event.start_date.as_deref()),
            }),
            ActivityKind::Active | ActivityKind::Inactive => {
                classified.status_changes.push(StatusChangeRow {
                    account,
                    order,
                    date: date_of(event.date.as_deref()),
                    inactive: kind == ActivityKind::Inactive,
                });
            }
            ActivityKind::SnapFeeConfirmed => classified.snap_confirmations.push(DatedRow {
                account,
                order,
                date: date_of(event.date.as_deref()),
            }),
            ActivityKind::EarnEntry | ActivityKind::EarnExit => {
                let row = StartRow {
                    account,
                    order,
                    start_date: date_of(event.start_date.as_deref()),
                };
                if kind == ActivityKind::EarnEntry {
                    classified.earn_entries.push(row);
                } else {
                    classified.earn_exits.push(row);
                }
            }
            ActivityKind::SnapId | ActivityKind::EarnId => {
                let row = GrantIdRow {
                    account,
                    order,
                    date: date_of(event.date.as_deref()),
                    description: event.description.clone(),
                };
                if kind == ActivityKind::SnapId {
                    classified.snap_ids.push(row);
                } else {
                    classified.earn_ids.push(row);
                }
            }
            ActivityKind::ReturningClient => classified.returning.push(ReturningRow {
                account,
                order,
                date: date_of(event.date.as_deref()),
                training_program: event.training_program.clone(),
            }),
            ActivityKind::TrainUpActivity => classified.train_up_activities += 1,
        }
    }

    for (label, count) in &unknown {
        warn!(activity_type = %label, count, "dropping activities with unknown type");
    }
    for (label, count) in unknown {
        *diagnostics.dropped_unknown_types.entry(label).or_default() += count;
    }

    debug!(classified = classified.len(), "activities classified");
    classified
}

fn coerce_counted(raw: Option<&str>, diagnostics: &mut RunDiagnostics) -> Option<Timestamp> {
    let text = present(raw)?;
    let parsed = parse_timestamp(text);
    if parsed.is_none() {
        diagnostics.malformed_dates += 1;
    }
    parsed
}

fn marker(event: &ActivityEvent, needle: &str) -> bool {
    event
        .placement_retention
        .as_deref()
        .is_some_and(|text| text.contains(needle))
}

fn placement_type(event: &ActivityEvent, config: &PipelineConfig) -> PlacementType {
    if marker(event, &config.placement_markers.initial_placement) {
        PlacementType::Initial
    } else {
        PlacementType::Secondary
    }
}

fn employment_details(event: &ActivityEvent, config: &PipelineConfig) -> EmploymentDetails {
    let markers = &config.placement_markers;
    EmploymentDetails {
        full_time: Flag::from(marker(event, &markers.full_time)),
        benefits: Flag::from(marker(event, &markers.benefits)),
        temporary: Flag::from(marker(event, &markers.temporary)),
        mnd_lead: Flag::from(marker(event, &markers.mnd_lead)),
        industry_related: Flag::from(marker(event, &markers.industry_related)),
        job_hopping: Flag::from(marker(event, &markers.job_hopping)),
    }
}
