use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::dates::{opt_timestamp, Timestamp};

/// CRM account identifier. Extracts deliver it as a number or a numeric
/// string; both are accepted.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        lenient::integer(&value)
            .map(Self)
            .ok_or_else(|| D::Error::custom(format!("invalid account id: {value}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default, Hash)]
pub enum Flag {
    #[serde(rename = "Yes")]
    Yes,
    #[default]
    #[serde(rename = "No")]
    No,
}

impl Flag {
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::Yes
        } else {
            Self::No
        }
    }

    #[must_use]
    pub fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "Yes",
            Self::No => "No",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Yes" => Some(Self::Yes),
            "No" => Some(Self::No),
            _ => None,
        }
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}

/// The fixed activity vocabulary. Labels are configurable, the kinds are not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ClientBecameEmployed,
    Retention,
    Certification,
    TrainingStatus,
    Cohort,
    ReturningClient,
    Inactive,
    SnapFeeConfirmed,
    SnapId,
    EarnId,
    EarnEntry,
    EarnExit,
    Active,
    TrainUpActivity,
}

impl ActivityKind {
    pub const ALL: [Self; 14] = [
        Self::ClientBecameEmployed,
        Self::Retention,
        Self::Certification,
        Self::TrainingStatus,
        Self::Cohort,
        Self::ReturningClient,
        Self::Inactive,
        Self::SnapFeeConfirmed,
        Self::SnapId,
        Self::EarnId,
        Self::EarnEntry,
        Self::EarnExit,
        Self::Active,
        Self::TrainUpActivity,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientBecameEmployed => "client_became_employed",
            Self::Retention => "retention",
            Self::Certification => "certification",
            Self::TrainingStatus => "training_status",
            Self::Cohort => "cohort",
            Self::ReturningClient => "returning_client",
            Self::Inactive => "inactive",
            Self::SnapFeeConfirmed => "snap_fee_confirmed",
            Self::SnapId => "snap_id",
            Self::EarnId => "earn_id",
            Self::EarnEntry => "earn_entry",
            Self::EarnExit => "earn_exit",
            Self::Active => "active",
            Self::TrainUpActivity => "train_up_activity",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientAccount {
    pub id: AccountId,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub dob: Option<String>,
    #[serde(rename = "addresscity", default, deserialize_with = "lenient::opt_text")]
    pub address_city: Option<String>,
    #[serde(rename = "addresspostcode/zip", default, deserialize_with = "lenient::opt_text")]
    pub address_zip: Option<String>,
    #[serde(rename = "incomecategory", default, deserialize_with = "lenient::opt_text")]
    pub income_category: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub race: Option<String>,
    #[serde(rename = "grantfund", default, deserialize_with = "lenient::opt_text")]
    pub grant_fund: Option<String>,
    #[serde(rename = "originaltrainingprogram", default, deserialize_with = "lenient::opt_text")]
    pub training_program: Option<String>,
    #[serde(rename = "originalintakedate", default, deserialize_with = "lenient::opt_text")]
    pub intake_date: Option<String>,
    /// Free-text employment status at intake ("how long jobless").
    #[serde(rename = "howlongjobless", default, deserialize_with = "lenient::opt_text")]
    pub employment_status: Option<String>,
    #[serde(rename = "previouswagehr", default, deserialize_with = "lenient::opt_text")]
    pub previous_wage: Option<String>,
    #[serde(rename = "previoushoursworked", default, deserialize_with = "lenient::opt_text")]
    pub previous_hours: Option<String>,
    #[serde(rename = "ownerid", default, deserialize_with = "lenient::opt_integer")]
    pub owner_id: Option<i64>,
    #[serde(rename = "createddate", default, deserialize_with = "lenient::opt_text")]
    pub created_date: Option<String>,
    #[serde(rename = "modifieddate", default, deserialize_with = "lenient::opt_text")]
    pub modified_date: Option<String>,
    /// Remaining demographic columns, carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ClientAccount {
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            name: None,
            dob: None,
            address_city: None,
            address_zip: None,
            income_category: None,
            race: None,
            grant_fund: None,
            training_program: None,
            intake_date: None,
            employment_status: None,
            previous_wage: None,
            previous_hours: None,
            owner_id: None,
            created_date: None,
            modified_date: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    #[serde(default, deserialize_with = "lenient::opt_integer")]
    pub id: Option<i64>,
    #[serde(rename = "accountid")]
    pub account_id: AccountId,
    #[serde(rename = "type", default, deserialize_with = "lenient::opt_text")]
    pub activity_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub date: Option<String>,
    #[serde(rename = "startdate", default, deserialize_with = "lenient::opt_text")]
    pub start_date: Option<String>,
    #[serde(rename = "placementretention", default, deserialize_with = "lenient::opt_text")]
    pub placement_retention: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub employer: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub position: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub wage: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub hours: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub certification: Option<String>,
    #[serde(rename = "trainingstatus", default, deserialize_with = "lenient::opt_text")]
    pub training_status: Option<String>,
    #[serde(rename = "trainingprogram", default, deserialize_with = "lenient::opt_text")]
    pub training_program: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub description: Option<String>,
    #[serde(rename = "createddate", default, deserialize_with = "lenient::opt_text")]
    pub created_date: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ActivityEvent {
    #[must_use]
    pub fn new(account_id: AccountId, activity_type: &str) -> Self {
        Self {
            id: None,
            account_id,
            activity_type: Some(activity_type.to_string()),
            date: None,
            start_date: None,
            placement_retention: None,
            employer: None,
            position: None,
            wage: None,
            hours: None,
            certification: None,
            training_status: None,
            training_program: None,
            description: None,
            created_date: None,
            extra: BTreeMap::new(),
        }
    }
}

/// External wage-record match (state DOL extract) for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WageRecord {
    #[serde(rename = "accountid")]
    pub account_id: AccountId,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub dol_confirmed: Option<String>,
}

/// Full input snapshot for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub accounts: Vec<ClientAccount>,
    pub activities: Vec<ActivityEvent>,
    #[serde(default)]
    pub wage_records: Vec<WageRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Quarter {
    #[serde(rename = "Quarter 1")]
    Q1,
    #[serde(rename = "Quarter 2")]
    Q2,
    #[serde(rename = "Quarter 3")]
    Q3,
    #[serde(rename = "Quarter 4")]
    Q4,
}

impl Quarter {
    /// Fiscal quarter for a calendar month, with the fiscal year starting in July.
    #[must_use]
    pub fn for_month(month: u8) -> Option<Self> {
        match month {
            1..=3 => Some(Self::Q3),
            4..=6 => Some(Self::Q4),
            7..=9 => Some(Self::Q1),
            10..=12 => Some(Self::Q2),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q1 => "Quarter 1",
            Self::Q2 => "Quarter 2",
            Self::Q3 => "Quarter 3",
            Self::Q4 => "Quarter 4",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum PlacementType {
    #[serde(rename = "Initial Placement")]
    Initial,
    #[serde(rename = "Secondary Placement")]
    Secondary,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EmploymentDetails {
    pub full_time: Flag,
    pub benefits: Flag,
    pub temporary: Flag,
    pub mnd_lead: Flag,
    pub industry_related: Flag,
    pub job_hopping: Flag,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    #[serde(with = "opt_timestamp")]
    pub start_date: Option<Timestamp>,
    pub placement_type: PlacementType,
    pub employer: Option<String>,
    pub position: Option<String>,
    pub wage: Option<f64>,
    pub hours: Option<f64>,
    #[serde(flatten)]
    pub details: EmploymentDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntakeState {
    #[serde(default, with = "opt_timestamp")]
    pub intake_date: Option<Timestamp>,
    pub training_program: Option<String>,
    pub returning_client: Flag,
    #[serde(default, with = "opt_timestamp")]
    pub returning_date: Option<Timestamp>,
    pub returning_training_program: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmploymentState {
    pub initial_placement: Option<Placement>,
    pub current_placement: Option<Placement>,
    pub job_hopping: Flag,
    #[serde(default, with = "opt_timestamp")]
    pub last_job_hop: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionState {
    pub advancement: Flag,
    #[serde(default, with = "opt_timestamp")]
    pub last_retention_update: Option<Timestamp>,
    pub last_retention_status: Option<String>,
    #[serde(default, with = "opt_timestamp")]
    pub last_date_retained: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestones {
    pub incumbent_worker: Flag,
    pub retention_milestone: Option<i64>,
    pub employment_milestone: Option<i64>,
    pub contact_milestone: Option<i64>,
    pub call_due: Flag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrollmentState {
    #[serde(default, with = "opt_timestamp")]
    pub cohort_date: Option<Timestamp>,
    pub training_complete: Flag,
    /// `None` when no Active/Inactive event exists.
    pub inactive: Option<Flag>,
}

impl EnrollmentState {
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        self.inactive.is_some_and(Flag::is_yes)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificationAward {
    pub held: Flag,
    #[serde(default, with = "opt_timestamp")]
    pub date: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificationState {
    pub gained_certification: Flag,
    /// One entry per configured certification name.
    pub certifications: BTreeMap<String, CertificationAward>,
}

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Per-calendar-month presence markers, rendered as `{"Jan": "E" | "", ...}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthPresence(pub [bool; 12]);

impl MonthPresence {
    pub fn mark(&mut self, month: u8) {
        if let Some(slot) = usize::from(month)
            .checked_sub(1)
            .and_then(|index| self.0.get_mut(index))
        {
            *slot = true;
        }
    }

    #[must_use]
    pub fn contains(&self, month: u8) -> bool {
        usize::from(month)
            .checked_sub(1)
            .and_then(|index| self.0.get(index))
            .copied()
            .unwrap_or(false)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|present| **present).count()
    }
}

impl Serialize for MonthPresence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(MONTH_LABELS.len()))?;
        for (label, present) in MONTH_LABELS.iter().zip(self.0) {
            map.serialize_entry(label, if present { "E" } else { "" })?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MonthPresence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        let mut presence = Self::default();
        for (index, label) in MONTH_LABELS.iter().enumerate() {
            if raw.get(*label).is_some_and(|value| value == "E") {
                presence.0[index] = true;
            }
        }
        Ok(presence)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapEligibility {
    /// `MM-YYYY` of the earliest confirmation.
    pub snap_initial_confirmation: Option<String>,
    pub snap_months: MonthPresence,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantState {
    #[serde(default, with = "opt_timestamp")]
    pub earn_entry: Option<Timestamp>,
    #[serde(default, with = "opt_timestamp")]
    pub earn_exit: Option<Timestamp>,
    pub snap_id: Option<String>,
    pub earn_id: Option<String>,
    pub wage_record_confirmed: Flag,
    pub grant_fund: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Demographics {
    pub age: Option<i32>,
    pub bc_resident: Flag,
    /// `"CDBG"` when eligible, otherwise empty.
    pub cdbg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Kpis {
    pub program_completion: Flag,
    pub gained_employment: Flag,
    pub enrollment_satisfied: Flag,
    pub enrollment_pending: Flag,
    pub currently_employed: Flag,
    pub active: Flag,
    pub status_unknown: Flag,
    pub days_to_employment: Option<i64>,
    pub completed_without_employment: Flag,
    pub incumbent_wage_increase: Flag,
    pub incumbent_hours_increase: Flag,
    pub unreported_placement: Flag,
    pub gained_new_employment: Flag,
    pub incumbent_advancement: Flag,
    pub in_active_training: Flag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FiscalPeriod {
    pub quarter: Option<Quarter>,
    pub fiscal_year: Option<i32>,
    pub intake_quarter: Option<Quarter>,
    pub intake_fiscal_year: Option<i32>,
}

/// One denormalized row per client account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportingRecord {
    pub account: ClientAccount,
    pub case_manager: Option<String>,
    #[serde(flatten)]
    pub intake: IntakeState,
    #[serde(flatten)]
    pub employment: EmploymentState,
    #[serde(flatten)]
    pub retention: RetentionState,
    #[serde(flatten)]
    pub milestones: Milestones,
    #[serde(flatten)]
    pub enrollment: EnrollmentState,
    #[serde(flatten)]
    pub certifications: CertificationState,
    #[serde(flatten)]
    pub snap: SnapEligibility,
    #[serde(flatten)]
    pub grants: GrantState,
    #[serde(flatten)]
    pub demographics: Demographics,
    #[serde(flatten)]
    pub kpis: Kpis,
    #[serde(flatten)]
    pub fiscal: FiscalPeriod,
}

impl ReportingRecord {
    /// A record with every derived field at its null/default value.
    #[must_use]
    pub fn seed(account: ClientAccount) -> Self {
        Self {
            account,
            case_manager: None,
            intake: IntakeState::default(),
            employment: EmploymentState::default(),
            retention: RetentionState::default(),
            milestones: Milestones::default(),
            enrollment: EnrollmentState::default(),
            certifications: CertificationState::default(),
            snap: SnapEligibility::default(),
            grants: GrantState::default(),
            demographics: Demographics::default(),
            kpis: Kpis::default(),
            fiscal: FiscalPeriod::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> AccountId {
        self.account.id
    }

    #[must_use]
    pub fn has_program(&self) -> bool {
        present(self.intake.training_program.as_deref()).is_some()
    }
}

/// Returns the trimmed value when it carries any non-whitespace text.
#[must_use]
pub fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

/// Numeric coercion for wage/hours columns; blanks and junk become `None`.
#[must_use]
pub fn parse_number(value: Option<&str>) -> Option<f64> {
    present(value)
        .and_then(|text| text.trim_start_matches('$').replace(',', "").parse::<f64>().ok())
        .filter(|number| number.is_finite())
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text),
            Some(Value::Number(number)) => Some(number.to_string()),
            Some(Value::Bool(flag)) => Some(flag.to_string()),
            Some(other) => Some(other.to_string()),
        })
    }

    pub fn opt_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(integer))
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn integer(value: &Value) -> Option<i64> {
        match value {
            Value::Number(number) => number.as_i64().or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0 && float.abs() < 9.0e15)
                    .map(|float| float as i64)
            }),
            Value::String(text) => {
                let trimmed = text.trim();
                trimmed.parse::<i64>().ok().or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|float| float.fract() == 0.0 && float.abs() < 9.0e15)
                        .map(|float| float as i64)
                })
            }
            _ => None,
        }
    }
}
