use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{classify, PlacementRow};
use crate::config::PipelineConfig;
use crate::dates::{coerce, format_timestamp, Timestamp};
use crate::model::{
    present, AccountId, CertificationAward, CertificationState, Flag, Placement, ReportingRecord,
    Snapshot,
};
use crate::reduce::ReducedActivities;
use crate::registry::{Registry, StageId};
use crate::{enrich, kpi, milestone, PipelineError};

/// Data-quality counters collected during one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunDiagnostics {
    pub dropped_unknown_types: BTreeMap<String, usize>,
    pub orphaned_activities: usize,
    pub duplicate_accounts: usize,
    pub reducer_ties: BTreeMap<String, usize>,
    pub grant_id_conflicts: BTreeMap<String, usize>,
    pub malformed_dates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub as_of: String,
    pub config_version: u32,
    pub accounts: usize,
    pub activities: usize,
    pub wage_records: usize,
    pub records: usize,
    pub stages: Vec<String>,
    #[serde(flatten)]
    pub diagnostics: RunDiagnostics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// One record per distinct account id, ordered by id.
    pub records: Vec<ReportingRecord>,
    pub report: RunReport,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    registry: Registry,
}

struct RunContext<'a> {
    snapshot: &'a Snapshot,
    reduced: ReducedActivities,
    wage_confirmed: BTreeSet<AccountId>,
    now: Timestamp,
}

impl Pipeline {
    /// Builds a pipeline with the standard stage order.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] for an invalid configuration
    /// and [`PipelineError::Registry`] for an inconsistent stage order.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_stages(config, &StageId::STANDARD)
    }

    /// Builds a pipeline with an explicit stage order.
    ///
    /// # Errors
    /// Same as [`Pipeline::new`].
    pub fn with_stages(config: PipelineConfig, order: &[StageId]) -> Result<Self, PipelineError> {
        config.validate()?;
        let registry = Registry::new(order)?;
        Ok(Self { config, registry })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Recomputes every reporting record from `snapshot` as of `now`.
    #[must_use]
    pub fn run(&self, snapshot: &Snapshot, now: Timestamp) -> PipelineOutput {
        info!(
            accounts = snapshot.accounts.len(),
            activities = snapshot.activities.len(),
            as_of = %format_timestamp(now),
            "starting reporting run"
        );

        let mut diagnostics = RunDiagnostics::default();
        let classified = classify(&snapshot.activities, &self.config, &mut diagnostics);
        let reduced = ReducedActivities::reduce(&classified, &self.config, &mut diagnostics);

        let known: BTreeSet<AccountId> = snapshot.accounts.iter().map(|account| account.id).collect();
        let orphaned = snapshot
            .activities
            .iter()
            .filter(|event| !known.contains(&event.account_id))
            .count();
        if orphaned > 0 {
            warn!(count = orphaned, "activities reference unknown accounts");
        }
        diagnostics.orphaned_activities = orphaned;

        let context = RunContext {
            snapshot,
            reduced,
            wage_confirmed: self.confirmed_wage_records(snapshot),
            now,
        };

        let mut records: BTreeMap<AccountId, ReportingRecord> = BTreeMap::new();
        for stage in self.registry.ids() {
            self.apply(stage, &context, &mut records, &mut diagnostics);
            debug!(stage = stage.as_str(), "stage applied");
        }

        let records: Vec<ReportingRecord> = records.into_values().collect();
        let report = RunReport {
            as_of: format_timestamp(now),
            config_version: self.config.config_version,
            accounts: snapshot.accounts.len(),
            activities: snapshot.activities.len(),
            wage_records: snapshot.wage_records.len(),
            records: records.len(),
            stages: self
                .registry
                .ids()
                .map(|stage| stage.as_str().to_string())
                .collect(),
            diagnostics,
        };
        info!(records = report.records, "reporting run complete");

        PipelineOutput { records, report }
    }

    fn confirmed_wage_records(&self, snapshot: &Snapshot) -> BTreeSet<AccountId> {
        snapshot
            .wage_records
            .iter()
            .filter(|record| {
                present(record.dol_confirmed.as_deref())
                    == Some(self.config.wage_record_confirmed_value.as_str())
            })
            .map(|record| record.account_id)
            .collect()
    }

    #[allow(clippy::too_many_lines)]
    fn apply(
        &self,
        stage: StageId,
        context: &RunContext<'_>,
        records: &mut BTreeMap<AccountId, ReportingRecord>,
        diagnostics: &mut RunDiagnostics,
    ) {
        let config = &self.config;
        let reduced = &context.reduced;

        match stage {
            StageId::SeedAccounts => {
                for account in &context.snapshot.accounts {
                    if records.contains_key(&account.id) {
                        warn!(account_id = %account.id, "duplicate account row ignored");
                        diagnostics.duplicate_accounts += 1;
                        continue;
                    }
                    let mut record = ReportingRecord::seed(account.clone());
                    record.intake.intake_date = coerce(account.intake_date.as_deref());
                    record.intake.training_program =
                        present(account.training_program.as_deref()).map(ToString::to_string);
                    record.case_manager = config.case_manager(account.owner_id).map(ToString::to_string);
                    records.insert(account.id, record);
                }
            }
            StageId::ReturningClients => {
                for (id, record) in records.iter_mut() {
                    let Some(visit) = reduced.returning.get(id) else {
                        continue;
                    };
                    record.intake.returning_client = Flag::Yes;
                    record.intake.returning_date = Some(visit.date);
                    record.intake.returning_training_program = visit.training_program.clone();
                    if config.apply_returning_clients {
                        record.intake.intake_date = Some(visit.date);
                        record.intake.training_program = present(visit.training_program.as_deref())
                            .map(ToString::to_string);
                    }
                }
            }
            StageId::Placements => {
                for (id, record) in records.iter_mut() {
                    record.employment.initial_placement =
                        reduced.initial_placements.get(id).map(placement_from_row);
                    record.employment.current_placement =
                        reduced.current_placements.get(id).map(placement_from_row);
                    record.employment.last_job_hop = reduced.job_hops.get(id).copied();
                    record.employment.job_hopping =
                        Flag::from(record.employment.last_job_hop.is_some());
                }
            }
            StageId::Retention => {
                for (id, record) in records.iter_mut() {
                    let contact = reduced.last_contacts.get(id);
                    record.retention.advancement = Flag::from(reduced.advancement.contains(id));
                    record.retention.last_retention_update = contact.map(|last| last.date);
                    record.retention.last_retention_status =
                        contact.and_then(|last| last.status.clone());
                    record.retention.last_date_retained = reduced.last_retained.get(id).copied();
                }
            }
            StageId::Milestones => {
                for record in records.values_mut() {
                    record.milestones = milestone::derive_milestones(record, config, context.now);
                }
            }
            StageId::Cohort => {
                for (id, record) in records.iter_mut() {
                    record.enrollment.cohort_date = reduced.cohort_dates.get(id).copied().flatten();
                }
            }
            StageId::Certifications => {
                for (id, record) in records.iter_mut() {
                    record.certifications = reduced
                        .certifications
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| no_certifications(config));
                }
            }
            StageId::TrainingStatus => {
                for (id, record) in records.iter_mut() {
                    record.enrollment.training_complete =
                        Flag::from(reduced.training_complete.contains(id));
                }
            }
            StageId::ActiveStatus => {
                for (id, record) in records.iter_mut() {
                    record.enrollment.inactive = reduced.inactive.get(id).copied().map(Flag::from);
                }
            }
            StageId::SnapEligibility => {
                for (id, record) in records.iter_mut() {
                    record.snap = reduced.snap.get(id).cloned().unwrap_or_default();
                }
            }
            StageId::EarnEnrollment => {
                for (id, record) in records.iter_mut() {
                    record.grants.earn_entry = reduced.earn_entries.get(id).copied();
                    record.grants.earn_exit = reduced.earn_exits.get(id).copied();
                }
            }
            StageId::GrantIds => {
                for (id, record) in records.iter_mut() {
                    record.grants.snap_id = reduced.snap_ids.get(id).cloned();
                    record.grants.earn_id = reduced.earn_ids.get(id).cloned();
                }
            }
            StageId::WageRecords => {
                for (id, record) in records.iter_mut() {
                    record.grants.wage_record_confirmed =
                        Flag::from(context.wage_confirmed.contains(id));
                }
            }
            StageId::Demographics => {
                for record in records.values_mut() {
                    record.demographics = enrich::demographics(record, config, context.now);
                }
            }
            StageId::Kpis => {
                for record in records.values_mut() {
                    record.kpis = kpi::derive_kpis(record, config);
                }
            }
            StageId::NewEmployment => {
                for record in records.values_mut() {
                    let (gained_new, advancement) = kpi::new_employment(record);
                    record.kpis.gained_new_employment = gained_new;
                    record.kpis.incumbent_advancement = advancement;
                }
            }
            StageId::CallDueOverride => {
                for record in records.values_mut() {
                    if record.enrollment.is_inactive() {
                        record.milestones.call_due = Flag::No;
                    }
                }
            }
            StageId::FiscalPeriod => {
                for record in records.values_mut() {
                    record.fiscal = enrich::fiscal_period(record, config);
                }
            }
            StageId::GrantFund => {
                for record in records.values_mut() {
                    record.grants.grant_fund = enrich::grant_fund(record, config);
                }
            }
            StageId::ActiveTraining => {
                kpi::mark_active_training(records.values_mut(), config, context.now);
            }
        }
    }
}

fn placement_from_row(row: &PlacementRow) -> Placement {
    Placement {
        start_date: row.start_date,
        placement_type: row.placement_type,
        employer: row.employer.clone(),
        position: row.position.clone(),
        wage: row.wage,
        hours: row.hours,
        details: row.details,
    }
}

fn no_certifications(config: &PipelineConfig) -> CertificationState {
    CertificationState {
        gained_certification: Flag::No,
        certifications: config
            .certification_types
            .iter()
            .map(|name| (name.clone(), CertificationAward::default()))
            .collect(),
    }
}
