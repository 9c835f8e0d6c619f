use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ActivityKind;
use crate::PipelineError;

const MAX_WINDOW_DAYS: i64 = 3_650;
const MAX_DOB_ROLLOVER_YEARS: i32 = 200;

/// Immutable pipeline configuration passed into [`crate::Pipeline::new`].
///
/// Decoding from JSON starts from [`PipelineConfig::v1`], so a payload only
/// needs to name the settings it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub config_version: u32,
    pub activity_types: ActivityVocabulary,
    pub placement_markers: PlacementMarkers,
    pub retention_markers: RetentionMarkers,
    pub training_complete_status: String,
    pub certification_types: Vec<String>,
    pub incumbent_phrases: Vec<String>,
    pub call_checkpoints_days: Vec<i64>,
    pub enrollment_exempt_program: String,
    pub cohort_programs: Vec<String>,
    pub cdbg: CdbgRules,
    pub grant_tokens: GrantTokens,
    pub wage_record_confirmed_value: String,
    pub case_managers: BTreeMap<i64, String>,
    pub active_training_window_days: i64,
    pub apply_returning_clients: bool,
    pub dob_rollover_years: i32,
}

/// CRM `type` labels for each activity kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActivityVocabulary {
    pub client_became_employed: String,
    pub retention: String,
    pub certification: String,
    pub training_status: String,
    pub cohort: String,
    pub returning_client: String,
    pub inactive: String,
    pub snap_fee_confirmed: String,
    pub snap_id: String,
    pub earn_id: String,
    pub earn_entry: String,
    pub earn_exit: String,
    pub active: String,
    pub train_up_activity: String,
    /// Alternate spellings accepted alongside the primary labels.
    pub aliases: BTreeMap<String, ActivityKind>,
}

impl ActivityVocabulary {
    #[must_use]
    pub fn label(&self, kind: ActivityKind) -> &str {
        match kind {
            ActivityKind::ClientBecameEmployed => &self.client_became_employed,
            ActivityKind::Retention => &self.retention,
            ActivityKind::Certification => &self.certification,
            ActivityKind::TrainingStatus => &self.training_status,
            ActivityKind::Cohort => &self.cohort,
            ActivityKind::ReturningClient => &self.returning_client,
            ActivityKind::Inactive => &self.inactive,
            ActivityKind::SnapFeeConfirmed => &self.snap_fee_confirmed,
            ActivityKind::SnapId => &self.snap_id,
            ActivityKind::EarnId => &self.earn_id,
            ActivityKind::EarnEntry => &self.earn_entry,
            ActivityKind::EarnExit => &self.earn_exit,
            ActivityKind::Active => &self.active,
            ActivityKind::TrainUpActivity => &self.train_up_activity,
        }
    }

    /// Exact-match lookup of a CRM `type` value against primary labels,
    /// then aliases.
    #[must_use]
    pub fn kind_of(&self, label: &str) -> Option<ActivityKind> {
        ActivityKind::ALL
            .into_iter()
            .find(|kind| self.label(*kind) == label)
            .or_else(|| self.aliases.get(label).copied())
    }
}

impl Default for ActivityVocabulary {
    fn default() -> Self {
        Self {
            client_became_employed: "Client Became Employed".to_string(),
            retention: "Retention".to_string(),
            certification: "Certification".to_string(),
            training_status: "Training Status".to_string(),
            cohort: "Cohort".to_string(),
            returning_client: "Returning Client".to_string(),
            inactive: "Inactive".to_string(),
            snap_fee_confirmed: "SNAP Fee Confirmed".to_string(),
            snap_id: "SNAP ID".to_string(),
            earn_id: "EARN ID".to_string(),
            earn_entry: "EARN Entry".to_string(),
            earn_exit: "EARN Exit".to_string(),
            active: "Active".to_string(),
            train_up_activity: "Train Up Activity".to_string(),
            // Daily exports spell the fee label in capitals.
            aliases: BTreeMap::from([(
                "SNAP FEE Confirmed".to_string(),
                ActivityKind::SnapFeeConfirmed,
            )]),
        }
    }
}

/// Substrings looked for in the `placementretention` text of placements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlacementMarkers {
    pub initial_placement: String,
    pub full_time: String,
    pub benefits: String,
    pub temporary: String,
    pub mnd_lead: String,
    pub industry_related: String,
    pub job_hopping: String,
}

impl Default for PlacementMarkers {
    fn default() -> Self {
        Self {
            initial_placement: "Initial Placement".to_string(),
            full_time: "Full Time".to_string(),
            benefits: "Benefits".to_string(),
            temporary: "Temporary".to_string(),
            mnd_lead: "MND Lead".to_string(),
            industry_related: "Industry Related".to_string(),
            job_hopping: "Job Hopping".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionMarkers {
    pub advancement: String,
    pub job_retained: String,
    pub job_not_retained: String,
}

impl Default for RetentionMarkers {
    fn default() -> Self {
        Self {
            advancement: "Retention and Advancement".to_string(),
            job_retained: "Job Retained".to_string(),
            job_not_retained: "Job Not Retained".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CdbgRules {
    pub city_substring: String,
    pub zips: BTreeSet<String>,
}

const BALTIMORE_CITY_ZIPS: [&str; 44] = [
    "21215", "21206", "21224", "21218", "21207", "21229", "21217", "21225", "21212", "21230",
    "21213", "21239", "21216", "21209", "21223", "21214", "21202", "21201", "21205", "21211",
    "21210", "21231", "21226", "21287", "21251", "21278", "21290", "21203", "21264", "21263",
    "21273", "21270", "21275", "21274", "21279", "21281", "21280", "21283", "21289", "21288",
    "21297", "21298", "21233", "21265",
];

impl Default for CdbgRules {
    fn default() -> Self {
        Self {
            city_substring: "altimor".to_string(),
            zips: BALTIMORE_CITY_ZIPS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GrantTokens {
    pub cdbg: String,
    pub snap: String,
    pub earn: String,
    pub delimiter: String,
}

impl Default for GrantTokens {
    fn default() -> Self {
        Self {
            cdbg: "CDBG".to_string(),
            snap: "SNAP".to_string(),
            earn: "EARN".to_string(),
            delimiter: "; ".to_string(),
        }
    }
}

const CASE_MANAGERS: [(i64, &str); 24] = [
    (36971, "CH"),
    (31833, "RV"),
    (20431, "SH"),
    (36966, "KD"),
    (36970, "RG"),
    (36972, "ML"),
    (36949, "VOID"),
    (19501, "MND"),
    (20433, "ST"),
    (20435, "MR"),
    (23869, "KH"),
    (31835, "MD"),
    (36943, "JE"),
    (36947, "JB"),
    (36953, "AH"),
    (36955, "SBT"),
    (36959, "JC"),
    (36961, "DH"),
    (36963, "MG"),
    (36973, "RSS Support"),
    (36974, "RB"),
    (36975, "MM"),
    (36976, "MS"),
    (36978, "VF"),
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

impl PipelineConfig {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            config_version: 1,
            activity_types: ActivityVocabulary::default(),
            placement_markers: PlacementMarkers::default(),
            retention_markers: RetentionMarkers::default(),
            training_complete_status: "Complete".to_string(),
            certification_types: strings(&[
                "Forklift", "CGSP", "DOT", "BTWT", "CDL-A", "CDL-B", "CCS", "CLP", "TWIC",
            ]),
            incumbent_phrases: strings(&["Currently employed", "Still Working"]),
            call_checkpoints_days: vec![30, 90, 180, 365, 730],
            enrollment_exempt_program: "OOO".to_string(),
            cohort_programs: strings(&["CTC", "MTDL", "CF"]),
            cdbg: CdbgRules::default(),
            grant_tokens: GrantTokens::default(),
            wage_record_confirmed_value: "Y".to_string(),
            case_managers: CASE_MANAGERS
                .iter()
                .map(|(code, initials)| (*code, (*initials).to_string()))
                .collect(),
            active_training_window_days: 21,
            apply_returning_clients: false,
            dob_rollover_years: 100,
        }
    }

    /// Validates label, checkpoint and ZIP invariants.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when a setting is empty,
    /// duplicated or out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.config_version == 0 {
            return Err(PipelineError::Configuration(
                "config_version MUST be >= 1".to_string(),
            ));
        }

        let mut labels = BTreeSet::new();
        for kind in ActivityKind::ALL {
            let label = self.activity_types.label(kind);
            if label.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "activity label for {} MUST be non-empty",
                    kind.as_str()
                )));
            }
            if !labels.insert(label) {
                return Err(PipelineError::Configuration(format!(
                    "activity label {label:?} is assigned to more than one kind"
                )));
            }
        }
        for alias in self.activity_types.aliases.keys() {
            if alias.trim().is_empty() || labels.contains(alias.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "activity alias {alias:?} is empty or shadows a primary label"
                )));
            }
        }

        let markers = &self.placement_markers;
        for (name, value) in [
            ("placement_markers.initial_placement", &markers.initial_placement),
            ("placement_markers.full_time", &markers.full_time),
            ("placement_markers.benefits", &markers.benefits),
            ("placement_markers.temporary", &markers.temporary),
            ("placement_markers.mnd_lead", &markers.mnd_lead),
            ("placement_markers.industry_related", &markers.industry_related),
            ("placement_markers.job_hopping", &markers.job_hopping),
            ("retention_markers.advancement", &self.retention_markers.advancement),
            ("retention_markers.job_retained", &self.retention_markers.job_retained),
            (
                "retention_markers.job_not_retained",
                &self.retention_markers.job_not_retained,
            ),
            ("training_complete_status", &self.training_complete_status),
            ("cdbg.city_substring", &self.cdbg.city_substring),
            ("grant_tokens.cdbg", &self.grant_tokens.cdbg),
            ("grant_tokens.snap", &self.grant_tokens.snap),
            ("grant_tokens.earn", &self.grant_tokens.earn),
            ("grant_tokens.delimiter", &self.grant_tokens.delimiter),
        ] {
            if value.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "{name} MUST be non-empty"
                )));
            }
        }

        if self.certification_types.is_empty() {
            return Err(PipelineError::Configuration(
                "certification_types MUST name at least one certification".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for name in &self.certification_types {
            if name.trim().is_empty() || !seen.insert(name.as_str()) {
                return Err(PipelineError::Configuration(format!(
                    "certification name {name:?} is empty or duplicated"
                )));
            }
        }

        if self.call_checkpoints_days.is_empty() {
            return Err(PipelineError::Configuration(
                "call_checkpoints_days MUST be non-empty".to_string(),
            ));
        }
        if self.call_checkpoints_days.iter().any(|days| *days <= 0)
            || self
                .call_checkpoints_days
                .windows(2)
                .any(|pair| pair[0] >= pair[1])
        {
            return Err(PipelineError::Configuration(
                "call_checkpoints_days MUST be positive and strictly ascending".to_string(),
            ));
        }

        if let Some(zip) = self
            .cdbg
            .zips
            .iter()
            .find(|zip| zip.len() != 5 || !zip.bytes().all(|byte| byte.is_ascii_digit()))
        {
            return Err(PipelineError::Configuration(format!(
                "cdbg zip {zip:?} MUST be five digits"
            )));
        }

        if !(0..=MAX_WINDOW_DAYS).contains(&self.active_training_window_days) {
            return Err(PipelineError::Configuration(format!(
                "active_training_window_days MUST be within 0..={MAX_WINDOW_DAYS}"
            )));
        }
        if !(1..=MAX_DOB_ROLLOVER_YEARS).contains(&self.dob_rollover_years) {
            return Err(PipelineError::Configuration(format!(
                "dob_rollover_years MUST be within 1..={MAX_DOB_ROLLOVER_YEARS}"
            )));
        }

        Ok(())
    }

    /// Decodes and validates a configuration from JSON.
    ///
    /// # Errors
    /// Returns [`PipelineError::Configuration`] when JSON decoding fails
    /// or decoded values violate configuration constraints.
    pub fn from_json(value: &Value) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            PipelineError::Configuration(format!("invalid pipeline config JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn case_manager(&self, owner_id: Option<i64>) -> Option<&str> {
        owner_id
            .and_then(|code| self.case_managers.get(&code))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_incumbent_phrase(&self, status: Option<&str>) -> bool {
        status.is_some_and(|text| self.incumbent_phrases.iter().any(|phrase| phrase == text))
    }

    #[must_use]
    pub fn is_cohort_program(&self, program: Option<&str>) -> bool {
        program.is_some_and(|code| self.cohort_programs.iter().any(|entry| entry == code))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::v1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn v1_is_valid() {
        must_ok(PipelineConfig::v1().validate());
    }

    #[test]
    fn vocabulary_matches_labels_exactly() {
        let vocabulary = ActivityVocabulary::default();
        assert_eq!(
            vocabulary.kind_of("SNAP Fee Confirmed"),
            Some(ActivityKind::SnapFeeConfirmed)
        );
        assert_eq!(
            vocabulary.kind_of("SNAP FEE Confirmed"),
            Some(ActivityKind::SnapFeeConfirmed)
        );
        assert_eq!(vocabulary.kind_of("SNAP fee confirmed"), None);
        assert_eq!(vocabulary.kind_of("cohort"), None);
        assert_eq!(vocabulary.kind_of("Cohort "), None);
    }

    #[test]
    fn rejects_alias_shadowing_primary_label() {
        let result = PipelineConfig::from_json(&json!({
            "activity_types": { "aliases": { "Cohort": "retention" } }
        }));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn rejects_out_of_range_windows() {
        let mut config = PipelineConfig::v1();
        config.active_training_window_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::v1();
        config.dob_rollover_years = i32::MAX;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::v1();
        config.active_training_window_days = 3_650;
        must_ok(config.validate());
    }

    #[test]
    fn partial_json_overrides_v1() {
        let config = must_ok(PipelineConfig::from_json(&json!({
            "call_checkpoints_days": [14, 60],
            "activity_types": { "cohort": "Cohort Enrollment" }
        })));

        assert_eq!(config.call_checkpoints_days, vec![14, 60]);
        assert_eq!(
            config.activity_types.kind_of("Cohort Enrollment"),
            Some(ActivityKind::Cohort)
        );
        assert_eq!(config.certification_types, PipelineConfig::v1().certification_types);
    }

    #[test]
    fn rejects_unordered_checkpoints() {
        let result = PipelineConfig::from_json(&json!({ "call_checkpoints_days": [90, 30] }));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn rejects_duplicate_activity_labels() {
        let result = PipelineConfig::from_json(&json!({
            "activity_types": { "active": "Inactive" }
        }));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn rejects_malformed_zip() {
        let mut config = PipelineConfig::v1();
        config.cdbg.zips.insert("2120".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn case_manager_lookup_ignores_unknown_codes() {
        let config = PipelineConfig::v1();
        assert_eq!(config.case_manager(Some(36971)), Some("CH"));
        assert_eq!(config.case_manager(Some(1)), None);
        assert_eq!(config.case_manager(None), None);
    }
}
