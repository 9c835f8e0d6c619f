//! Declared reads and writes for every pipeline stage.
//!
//! [`Registry::new`] rejects a stage list in which a stage reads a field no
//! earlier stage wrote, or overwrites a field without reading it first.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::PipelineError;

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Account,
    CaseManager,
    IntakeDate,
    TrainingProgram,
    ReturningClient,
    InitialPlacement,
    CurrentPlacement,
    JobHop,
    Advancement,
    LastRetentionContact,
    LastDateRetained,
    IncumbentWorker,
    Milestones,
    CallDue,
    CohortDate,
    Certifications,
    TrainingComplete,
    Inactive,
    SnapEligibility,
    EarnDates,
    GrantIds,
    WageRecordConfirmed,
    Age,
    Cdbg,
    OutcomeKpis,
    GainedNewEmployment,
    FiscalPeriod,
    GrantFund,
    InActiveTraining,
}

impl Field {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::CaseManager => "case_manager",
            Self::IntakeDate => "intake_date",
            Self::TrainingProgram => "training_program",
            Self::ReturningClient => "returning_client",
            Self::InitialPlacement => "initial_placement",
            Self::CurrentPlacement => "current_placement",
            Self::JobHop => "job_hop",
            Self::Advancement => "advancement",
            Self::LastRetentionContact => "last_retention_contact",
            Self::LastDateRetained => "last_date_retained",
            Self::IncumbentWorker => "incumbent_worker",
            Self::Milestones => "milestones",
            Self::CallDue => "call_due",
            Self::CohortDate => "cohort_date",
            Self::Certifications => "certifications",
            Self::TrainingComplete => "training_complete",
            Self::Inactive => "inactive",
            Self::SnapEligibility => "snap_eligibility",
            Self::EarnDates => "earn_dates",
            Self::GrantIds => "grant_ids",
            Self::WageRecordConfirmed => "wage_record_confirmed",
            Self::Age => "age",
            Self::Cdbg => "cdbg",
            Self::OutcomeKpis => "outcome_kpis",
            Self::GainedNewEmployment => "gained_new_employment",
            Self::FiscalPeriod => "fiscal_period",
            Self::GrantFund => "grant_fund",
            Self::InActiveTraining => "in_active_training",
        }
    }

    /// Reporting-record columns carried by this field.
    #[must_use]
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Account => &["account"],
            Self::CaseManager => &["case_manager"],
            Self::IntakeDate => &["intake_date"],
            Self::TrainingProgram => &["training_program"],
            Self::ReturningClient => &[
                "returning_client",
                "returning_date",
                "returning_training_program",
            ],
            Self::InitialPlacement => &["initial_placement"],
            Self::CurrentPlacement => &["current_placement"],
            Self::JobHop => &["job_hopping", "last_job_hop"],
            Self::Advancement => &["advancement"],
            Self::LastRetentionContact => &["last_retention_update", "last_retention_status"],
            Self::LastDateRetained => &["last_date_retained"],
            Self::IncumbentWorker => &["incumbent_worker"],
            Self::Milestones => &[
                "retention_milestone",
                "employment_milestone",
                "contact_milestone",
            ],
            Self::CallDue => &["call_due"],
            Self::CohortDate => &["cohort_date"],
            Self::Certifications => &["gained_certification", "certifications"],
            Self::TrainingComplete => &["training_complete"],
            Self::Inactive => &["inactive"],
            Self::SnapEligibility => &["snap_initial_confirmation", "snap_months"],
            Self::EarnDates => &["earn_entry", "earn_exit"],
            Self::GrantIds => &["snap_id", "earn_id"],
            Self::WageRecordConfirmed => &["wage_record_confirmed"],
            Self::Age => &["age"],
            Self::Cdbg => &["bc_resident", "cdbg"],
            Self::OutcomeKpis => &[
                "program_completion",
                "gained_employment",
                "enrollment_satisfied",
                "enrollment_pending",
                "currently_employed",
                "active",
                "status_unknown",
                "days_to_employment",
                "completed_without_employment",
                "incumbent_wage_increase",
                "incumbent_hours_increase",
                "unreported_placement",
            ],
            Self::GainedNewEmployment => &["gained_new_employment", "incumbent_advancement"],
            Self::FiscalPeriod => &[
                "quarter",
                "fiscal_year",
                "intake_quarter",
                "intake_fiscal_year",
            ],
            Self::GrantFund => &["grant_fund"],
            Self::InActiveTraining => &["in_active_training"],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SeedAccounts,
    ReturningClients,
    Placements,
    Retention,
    Milestones,
    Cohort,
    Certifications,
    TrainingStatus,
    ActiveStatus,
    SnapEligibility,
    EarnEnrollment,
    GrantIds,
    WageRecords,
    Demographics,
    Kpis,
    NewEmployment,
    CallDueOverride,
    FiscalPeriod,
    GrantFund,
    ActiveTraining,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct StageSpec {
    pub id: StageId,
    pub reads: &'static [Field],
    pub writes: &'static [Field],
}

impl StageId {
    pub const STANDARD: [Self; 20] = [
        Self::SeedAccounts,
        Self::ReturningClients,
        Self::Placements,
        Self::Retention,
        Self::Milestones,
        Self::Cohort,
        Self::Certifications,
        Self::TrainingStatus,
        Self::ActiveStatus,
        Self::SnapEligibility,
        Self::EarnEnrollment,
        Self::GrantIds,
        Self::WageRecords,
        Self::Demographics,
        Self::Kpis,
        Self::NewEmployment,
        Self::CallDueOverride,
        Self::FiscalPeriod,
        Self::GrantFund,
        Self::ActiveTraining,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SeedAccounts => "seed_accounts",
            Self::ReturningClients => "returning_clients",
            Self::Placements => "placements",
            Self::Retention => "retention",
            Self::Milestones => "milestones",
            Self::Cohort => "cohort",
            Self::Certifications => "certifications",
            Self::TrainingStatus => "training_status",
            Self::ActiveStatus => "active_status",
            Self::SnapEligibility => "snap_eligibility",
            Self::EarnEnrollment => "earn_enrollment",
            Self::GrantIds => "grant_ids",
            Self::WageRecords => "wage_records",
            Self::Demographics => "demographics",
            Self::Kpis => "kpis",
            Self::NewEmployment => "new_employment",
            Self::CallDueOverride => "call_due_override",
            Self::FiscalPeriod => "fiscal_period",
            Self::GrantFund => "grant_fund",
            Self::ActiveTraining => "active_training",
        }
    }

    #[must_use]
    pub fn spec(self) -> StageSpec {
        use Field as F;

        let (reads, writes): (&'static [Field], &'static [Field]) = match self {
            Self::SeedAccounts => (
                &[],
                &[F::Account, F::CaseManager, F::IntakeDate, F::TrainingProgram],
            ),
            Self::ReturningClients => (
                &[F::Account, F::IntakeDate, F::TrainingProgram],
                &[F::ReturningClient, F::IntakeDate, F::TrainingProgram],
            ),
            Self::Placements => (
                &[F::Account],
                &[F::InitialPlacement, F::CurrentPlacement, F::JobHop],
            ),
            Self::Retention => (
                &[F::Account],
                &[F::Advancement, F::LastRetentionContact, F::LastDateRetained],
            ),
            Self::Milestones => (
                &[
                    F::Account,
                    F::IntakeDate,
                    F::InitialPlacement,
                    F::JobHop,
                    F::LastRetentionContact,
                    F::LastDateRetained,
                ],
                &[F::IncumbentWorker, F::Milestones, F::CallDue],
            ),
            Self::Cohort => (&[F::Account], &[F::CohortDate]),
            Self::Certifications => (&[F::Account], &[F::Certifications]),
            Self::TrainingStatus => (&[F::Account], &[F::TrainingComplete]),
            Self::ActiveStatus => (&[F::Account], &[F::Inactive]),
            Self::SnapEligibility => (&[F::Account], &[F::SnapEligibility]),
            Self::EarnEnrollment => (&[F::Account], &[F::EarnDates]),
            Self::GrantIds => (&[F::Account], &[F::GrantIds]),
            Self::WageRecords => (&[F::Account], &[F::WageRecordConfirmed]),
            Self::Demographics => (&[F::Account], &[F::Age, F::Cdbg]),
            Self::Kpis => (
                &[
                    F::Account,
                    F::IntakeDate,
                    F::TrainingProgram,
                    F::InitialPlacement,
                    F::CurrentPlacement,
                    F::LastRetentionContact,
                    F::IncumbentWorker,
                    F::CohortDate,
                    F::Certifications,
                    F::TrainingComplete,
                    F::Inactive,
                    F::WageRecordConfirmed,
                ],
                &[F::OutcomeKpis],
            ),
            Self::NewEmployment => (
                &[F::IntakeDate, F::CurrentPlacement, F::OutcomeKpis],
                &[F::GainedNewEmployment],
            ),
            Self::CallDueOverride => (&[F::CallDue, F::Inactive], &[F::CallDue]),
            Self::FiscalPeriod => (
                &[
                    F::IntakeDate,
                    F::TrainingProgram,
                    F::CohortDate,
                    F::OutcomeKpis,
                ],
                &[F::FiscalPeriod],
            ),
            Self::GrantFund => (&[F::Account, F::Cdbg, F::GrantIds], &[F::GrantFund]),
            Self::ActiveTraining => (&[F::CohortDate], &[F::InActiveTraining]),
        };

        StageSpec {
            id: self,
            reads,
            writes,
        }
    }
}

/// A validated, ordered stage list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    stages: Vec<StageSpec>,
}

impl Registry {
    /// Validates a stage order against declared reads and writes.
    ///
    /// # Errors
    /// Returns [`PipelineError::Registry`] when a stage repeats, reads a field
    /// no earlier stage wrote, or rewrites a field it does not also read.
    pub fn new(order: &[StageId]) -> Result<Self, PipelineError> {
        let mut seen = BTreeSet::new();
        let mut written: BTreeSet<Field> = BTreeSet::new();
        let mut stages = Vec::with_capacity(order.len());

        for id in order {
            if !seen.insert(*id) {
                return Err(PipelineError::Registry(format!(
                    "stage {} listed more than once",
                    id.as_str()
                )));
            }

            let spec = id.spec();
            if let Some(missing) = spec.reads.iter().find(|field| !written.contains(*field)) {
                return Err(PipelineError::Registry(format!(
                    "stage {} reads {} before any stage writes it",
                    id.as_str(),
                    missing.as_str()
                )));
            }
            if let Some(clobbered) = spec
                .writes
                .iter()
                .find(|field| written.contains(*field) && !spec.reads.contains(*field))
            {
                return Err(PipelineError::Registry(format!(
                    "stage {} overwrites {} without reading it",
                    id.as_str(),
                    clobbered.as_str()
                )));
            }

            written.extend(spec.writes.iter().copied());
            stages.push(spec);
        }

        Ok(Self { stages })
    }

    /// The standard stage order.
    ///
    /// # Errors
    /// Returns [`PipelineError::Registry`] if [`StageId::STANDARD`] is
    /// inconsistent with the declared reads and writes.
    pub fn standard() -> Result<Self, PipelineError> {
        Self::new(&StageId::STANDARD)
    }

    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn ids(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.iter().map(|spec| spec.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_is_consistent() {
        let registry = match Registry::standard() {
            Ok(registry) => registry,
            Err(err) => panic!("standard registry rejected: {err}"),
        };
        assert_eq!(registry.stages().len(), StageId::STANDARD.len());
        assert_eq!(registry.ids().last(), Some(StageId::ActiveTraining));
    }

    #[test]
    fn reading_before_writing_fails_at_construction() {
        let result = Registry::new(&[StageId::SeedAccounts, StageId::Kpis]);
        match result {
            Err(PipelineError::Registry(message)) => {
                assert!(message.contains("kpis reads"), "{message}");
            }
            other => panic!("expected registry error, got {other:?}"),
        }
    }

    #[test]
    fn call_due_override_must_follow_activity_status() {
        let mut order: Vec<StageId> = StageId::STANDARD
            .into_iter()
            .filter(|id| *id != StageId::CallDueOverride)
            .collect();
        let milestones = order
            .iter()
            .position(|id| *id == StageId::Milestones)
            .map_or(0, |index| index + 1);
        order.insert(milestones, StageId::CallDueOverride);

        assert!(matches!(
            Registry::new(&order),
            Err(PipelineError::Registry(_))
        ));
    }

    #[test]
    fn repeated_stages_are_rejected() {
        let result = Registry::new(&[StageId::SeedAccounts, StageId::Cohort, StageId::Cohort]);
        assert!(matches!(result, Err(PipelineError::Registry(_))));
    }

    #[test]
    fn every_field_lists_columns() {
        for id in StageId::STANDARD {
            for field in id.spec().writes {
                assert!(!field.columns().is_empty(), "{}", field.as_str());
            }
        }
    }
}
