//! Grouped reduce per activity type.
//!
//! Every reducer yields at most one value per account. Rows whose ordering
//! value is null never qualify; rows sharing the winning value resolve to the
//! lowest [`RowOrder`] and are counted as ties.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::aggregate::RunDiagnostics;
use crate::classify::{ClassifiedActivities, GrantIdRow, Keyed, PlacementRow};
use crate::config::PipelineConfig;
use crate::dates::Timestamp;
use crate::model::{
    present, AccountId, CertificationAward, CertificationState, Flag, MonthPresence,
    SnapEligibility,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Earliest,
    Latest,
}

#[derive(Debug)]
pub struct Selection<'a, R> {
    pub by_account: BTreeMap<AccountId, &'a R>,
    /// Accounts whose winning ordering value was shared by more than one row.
    pub tied_accounts: usize,
}

struct Candidate<'a, R, K> {
    key: K,
    row: &'a R,
    tied: bool,
}

/// Picks one representative row per account by min/max of `key`.
pub fn select_representatives<'a, R, K, I, F>(rows: I, extreme: Extreme, key: F) -> Selection<'a, R>
where
    R: Keyed + 'a,
    K: Ord,
    I: IntoIterator<Item = &'a R>,
    F: Fn(&R) -> Option<K>,
{
    let mut best: BTreeMap<AccountId, Candidate<'a, R, K>> = BTreeMap::new();

    for row in rows {
        let Some(value) = key(row) else {
            continue;
        };
        match best.get_mut(&row.account()) {
            None => {
                best.insert(
                    row.account(),
                    Candidate {
                        key: value,
                        row,
                        tied: false,
                    },
                );
            }
            Some(current) => {
                let better = match extreme {
                    Extreme::Earliest => value < current.key,
                    Extreme::Latest => value > current.key,
                };
                if better {
                    *current = Candidate {
                        key: value,
                        row,
                        tied: false,
                    };
                } else if value == current.key {
                    current.tied = true;
                    if row.order() < current.row.order() {
                        current.row = row;
                    }
                }
            }
        }
    }

    let tied_accounts = best.values().filter(|candidate| candidate.tied).count();
    Selection {
        by_account: best
            .into_iter()
            .map(|(account, candidate)| (account, candidate.row))
            .collect(),
        tied_accounts,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastContact {
    pub date: Timestamp,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturningVisit {
    pub date: Timestamp,
    pub training_program: Option<String>,
}

/// Per-account reducer output, ready to be joined onto the accumulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedActivities {
    pub initial_placements: BTreeMap<AccountId, PlacementRow>,
    pub current_placements: BTreeMap<AccountId, PlacementRow>,
    pub job_hops: BTreeMap<AccountId, Timestamp>,
    pub advancement: BTreeSet<AccountId>,
    pub last_contacts: BTreeMap<AccountId, LastContact>,
    pub last_retained: BTreeMap<AccountId, Timestamp>,
    /// Start date of the latest-dated cohort event, which may itself be null.
    pub cohort_dates: BTreeMap<AccountId, Option<Timestamp>>,
    pub certifications: BTreeMap<AccountId, CertificationState>,
    pub training_complete: BTreeSet<AccountId>,
    pub inactive: BTreeMap<AccountId, bool>,
    pub snap: BTreeMap<AccountId, SnapEligibility>,
    pub earn_entries: BTreeMap<AccountId, Timestamp>,
    pub earn_exits: BTreeMap<AccountId, Timestamp>,
    pub snap_ids: BTreeMap<AccountId, String>,
    pub earn_ids: BTreeMap<AccountId, String>,
    pub returning: BTreeMap<AccountId, ReturningVisit>,
}

impl ReducedActivities {
    pub fn reduce(
        classified: &ClassifiedActivities,
        config: &PipelineConfig,
        diagnostics: &mut RunDiagnostics,
    ) -> Self {
        let mut ties = TieLedger::default();

        let initial = select_representatives(&classified.placements, Extreme::Earliest, |row| {
            row.start_date
        });
        ties.record("initial_placement", initial.tied_accounts);
        let current = select_representatives(&classified.placements, Extreme::Latest, |row| {
            row.start_date
        });
        ties.record("current_placement", current.tied_accounts);

        let hops = select_representatives(
            classified
                .placements
                .iter()
                .filter(|row| row.details.job_hopping.is_yes()),
            Extreme::Latest,
            |row| row.start_date,
        );
        ties.record("job_hop", hops.tied_accounts);

        let contacts = select_representatives(&classified.retention, Extreme::Latest, |row| row.date);
        ties.record("last_retention_contact", contacts.tied_accounts);

        let retained = select_representatives(
            classified.retention.iter().filter(|row| row.retained),
            Extreme::Latest,
            |row| row.date,
        );
        ties.record("last_date_retained", retained.tied_accounts);

        let cohorts = select_representatives(&classified.cohorts, Extreme::Latest, |row| row.date);
        ties.record("cohort", cohorts.tied_accounts);

        let status = select_representatives(&classified.status_changes, Extreme::Latest, |row| {
            row.date
        });
        ties.record("active_status", status.tied_accounts);

        let earn_entries = select_representatives(&classified.earn_entries, Extreme::Latest, |row| {
            row.start_date
        });
        ties.record("earn_entry", earn_entries.tied_accounts);
        let earn_exits = select_representatives(&classified.earn_exits, Extreme::Latest, |row| {
            row.start_date
        });
        ties.record("earn_exit", earn_exits.tied_accounts);

        let returning = select_representatives(&classified.returning, Extreme::Latest, |row| row.date);
        ties.record("returning_client", returning.tied_accounts);

        let snap = reduce_snap(classified, &mut ties);
        let snap_ids = reduce_grant_ids("snap_id", &classified.snap_ids, &mut ties, diagnostics);
        let earn_ids = reduce_grant_ids("earn_id", &classified.earn_ids, &mut ties, diagnostics);

        ties.flush(diagnostics);

        Self {
            initial_placements: cloned(initial.by_account),
            current_placements: cloned(current.by_account),
            job_hops: dated(hops.by_account, |row| row.start_date),
            advancement: classified
                .retention
                .iter()
                .filter(|row| row.advancement)
                .map(Keyed::account)
                .collect(),
            last_contacts: contacts
                .by_account
                .into_iter()
                .filter_map(|(account, row)| {
                    Some((
                        account,
                        LastContact {
                            date: row.date?,
                            status: row.status.clone(),
                        },
                    ))
                })
                .collect(),
            last_retained: dated(retained.by_account, |row| row.date),
            cohort_dates: cohorts
                .by_account
                .into_iter()
                .map(|(account, row)| (account, row.start_date))
                .collect(),
            certifications: reduce_certifications(classified, config),
            training_complete: classified
                .training_status
                .iter()
                .filter(|row| row.status.as_deref() == Some(config.training_complete_status.as_str()))
                .map(Keyed::account)
                .collect(),
            inactive: status
                .by_account
                .into_iter()
                .map(|(account, row)| (account, row.inactive))
                .collect(),
            snap,
            earn_entries: dated(earn_entries.by_account, |row| row.start_date),
            earn_exits: dated(earn_exits.by_account, |row| row.start_date),
            snap_ids,
            earn_ids,
            returning: returning
                .by_account
                .into_iter()
                .filter_map(|(account, row)| {
                    Some((
                        account,
                        ReturningVisit {
                            date: row.date?,
                            training_program: row.training_program.clone(),
                        },
                    ))
                })
                .collect(),
        }
    }
}

#[derive(Default)]
struct TieLedger {
    counts: BTreeMap<&'static str, usize>,
}

impl TieLedger {
    fn record(&mut self, reducer: &'static str, tied_accounts: usize) {
        if tied_accounts > 0 {
            *self.counts.entry(reducer).or_default() += tied_accounts;
        }
    }

    fn flush(self, diagnostics: &mut RunDiagnostics) {
        for (reducer, count) in self.counts {
            warn!(reducer, accounts = count, "representative rows tied on ordering value");
            *diagnostics
                .reducer_ties
                .entry(reducer.to_string())
                .or_default() += count;
        }
    }
}

fn cloned<R: Clone>(selection: BTreeMap<AccountId, &R>) -> BTreeMap<AccountId, R> {
    selection
        .into_iter()
        .map(|(account, row)| (account, row.clone()))
        .collect()
}

fn dated<R>(
    selection: BTreeMap<AccountId, &R>,
    date: impl Fn(&R) -> Option<Timestamp>,
) -> BTreeMap<AccountId, Timestamp> {
    selection
        .into_iter()
        .filter_map(|(account, row)| date(row).map(|value| (account, value)))
        .collect()
}

/// Fans out one presence entry per configured certification name. Every
/// certification event counts towards `gained_certification`, matched or not.
fn reduce_certifications(
    classified: &ClassifiedActivities,
    config: &PipelineConfig,
) -> BTreeMap<AccountId, CertificationState> {
    let mut states: BTreeMap<AccountId, CertificationState> = BTreeMap::new();

    for row in &classified.certifications {
        let state = states.entry(row.account).or_insert_with(|| CertificationState {
            gained_certification: Flag::Yes,
            certifications: config
                .certification_types
                .iter()
                .map(|name| (name.clone(), CertificationAward::default()))
                .collect(),
        });

        let Some(text) = row.certification.as_deref() else {
            continue;
        };
        for name in &config.certification_types {
            if !text.contains(name.as_str()) {
                continue;
            }
            if let Some(award) = state.certifications.get_mut(name) {
                award.held = Flag::Yes;
                award.date = match (award.date, row.date) {
                    (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
                    (existing, candidate) => existing.or(candidate),
                };
            }
        }
    }

    states
}

/// Earliest dated confirmation is the representative; every dated
/// confirmation marks its calendar month.
fn reduce_snap(
    classified: &ClassifiedActivities,
    ties: &mut TieLedger,
) -> BTreeMap<AccountId, SnapEligibility> {
    let first = select_representatives(&classified.snap_confirmations, Extreme::Earliest, |row| {
        row.date
    });
    ties.record("snap_confirmation", first.tied_accounts);

    let mut months: BTreeMap<AccountId, MonthPresence> = BTreeMap::new();
    for row in &classified.snap_confirmations {
        let presence = months.entry(row.account).or_default();
        if let Some(date) = row.date {
            presence.mark(u8::from(date.month()));
        }
    }

    months
        .into_iter()
        .map(|(account, snap_months)| {
            let snap_initial_confirmation = first
                .by_account
                .get(&account)
                .and_then(|row| row.date)
                .map(|date| format!("{:02}-{:04}", u8::from(date.month()), date.year()));
            (
                account,
                SnapEligibility {
                    snap_initial_confirmation,
                    snap_months,
                },
            )
        })
        .collect()
}

/// Latest-dated non-blank description wins; undated rows rank below dated
/// ones. Accounts carrying more than one distinct description are counted.
fn reduce_grant_ids(
    reducer: &'static str,
    rows: &[GrantIdRow],
    ties: &mut TieLedger,
    diagnostics: &mut RunDiagnostics,
) -> BTreeMap<AccountId, String> {
    let chosen = select_representatives(rows, Extreme::Latest, |row| {
        present(row.description.as_deref()).map(|_| row.date)
    });
    ties.record(reducer, chosen.tied_accounts);

    let mut distinct: BTreeMap<AccountId, BTreeSet<&str>> = BTreeMap::new();
    for row in rows {
        if let Some(text) = present(row.description.as_deref()) {
            distinct.entry(row.account).or_default().insert(text);
        }
    }
    let conflicts = distinct.values().filter(|values| values.len() > 1).count();
    if conflicts > 0 {
        warn!(reducer, accounts = conflicts, "conflicting grant identifiers");
        *diagnostics
            .grant_id_conflicts
            .entry(reducer.to_string())
            .or_default() += conflicts;
    }

    chosen
        .by_account
        .into_iter()
        .filter_map(|(account, row)| {
            present(row.description.as_deref()).map(|text| (account, text.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, CertificationRow, DatedRow, RowOrder};
    use crate::dates::parse_timestamp;
    use crate::model::ActivityEvent;

    fn at(raw: &str) -> Option<Timestamp> {
        parse_timestamp(raw)
    }

    fn order(seq: usize) -> RowOrder {
        RowOrder {
            activity_id: None,
            seq,
        }
    }

    #[test]
    fn null_keys_never_qualify() {
        let rows = vec![
            DatedRow { account: AccountId(1), order: order(0), date: None },
            DatedRow { account: AccountId(2), order: order(1), date: None },
            DatedRow { account: AccountId(2), order: order(2), date: at("2024-01-01") },
        ];
        let selection = select_representatives(&rows, Extreme::Earliest, |row| row.date);
        assert!(!selection.by_account.contains_key(&AccountId(1)));
        assert_eq!(selection.by_account[&AccountId(2)].order, order(2));
    }

    #[test]
    fn ties_resolve_to_lowest_order_regardless_of_arrival() {
        let rows = vec![
            DatedRow {
                account: AccountId(1),
                order: RowOrder { activity_id: Some(40), seq: 0 },
                date: at("2024-02-01"),
            },
            DatedRow {
                account: AccountId(1),
                order: RowOrder { activity_id: Some(12), seq: 1 },
                date: at("2024-02-01"),
            },
            DatedRow {
                account: AccountId(1),
                order: RowOrder { activity_id: Some(3), seq: 2 },
                date: at("2023-12-01"),
            },
        ];
        let selection = select_representatives(&rows, Extreme::Latest, |row| row.date);
        assert_eq!(selection.by_account[&AccountId(1)].order.activity_id, Some(12));
        assert_eq!(selection.tied_accounts, 1);
    }

    #[test]
    fn a_later_winner_clears_an_earlier_tie() {
        let rows = vec![
            DatedRow { account: AccountId(1), order: order(0), date: at("2024-01-01") },
            DatedRow { account: AccountId(1), order: order(1), date: at("2024-01-01") },
            DatedRow { account: AccountId(1), order: order(2), date: at("2024-05-01") },
        ];
        let selection = select_representatives(&rows, Extreme::Latest, |row| row.date);
        assert_eq!(selection.tied_accounts, 0);
        assert_eq!(selection.by_account[&AccountId(1)].order, order(2));
    }

    #[test]
    fn certifications_fan_out_with_their_own_earliest_dates() {
        let config = PipelineConfig::v1();
        let classified = ClassifiedActivities {
            certifications: vec![
                CertificationRow {
                    account: AccountId(9),
                    order: order(0),
                    date: at("2024-04-10"),
                    certification: Some("Forklift".to_string()),
                },
                CertificationRow {
                    account: AccountId(9),
                    order: order(1),
                    date: at("2024-03-02"),
                    certification: Some("Forklift".to_string()),
                },
                CertificationRow {
                    account: AccountId(9),
                    order: order(2),
                    date: at("2024-06-20"),
                    certification: Some("CDL-A".to_string()),
                },
            ],
            ..ClassifiedActivities::default()
        };

        let states = reduce_certifications(&classified, &config);
        let state = &states[&AccountId(9)];

        assert!(state.gained_certification.is_yes());
        assert_eq!(state.certifications.len(), config.certification_types.len());
        assert!(state.certifications["Forklift"].held.is_yes());
        assert_eq!(state.certifications["Forklift"].date, at("2024-03-02"));
        assert!(state.certifications["CDL-A"].held.is_yes());
        assert_eq!(state.certifications["CDL-A"].date, at("2024-06-20"));
        assert!(!state.certifications["CDL-B"].held.is_yes());
        assert_eq!(state.certifications["CDL-B"].date, None);
    }

    #[test]
    fn snap_months_cover_every_confirmation() {
        let classified = ClassifiedActivities {
            snap_confirmations: vec![
                DatedRow { account: AccountId(4), order: order(0), date: at("2024-03-15") },
                DatedRow { account: AccountId(4), order: order(1), date: at("2024-01-09") },
                DatedRow { account: AccountId(4), order: order(2), date: at("2024-06-30") },
            ],
            ..ClassifiedActivities::default()
        };

        let mut ties = TieLedger::default();
        let snap = reduce_snap(&classified, &mut ties);
        let eligibility = &snap[&AccountId(4)];

        assert_eq!(eligibility.snap_initial_confirmation.as_deref(), Some("01-2024"));
        assert_eq!(eligibility.snap_months.count(), 3);
        for month in [1, 3, 6] {
            assert!(eligibility.snap_months.contains(month));
        }
        assert!(!eligibility.snap_months.contains(2));
    }

    #[test]
    fn grant_ids_prefer_latest_and_count_conflicts() {
        let rows = vec![
            GrantIdRow {
                account: AccountId(2),
                order: order(0),
                date: at("2024-05-01"),
                description: Some("S-100".to_string()),
            },
            GrantIdRow {
                account: AccountId(2),
                order: order(1),
                date: None,
                description: Some("S-099".to_string()),
            },
            GrantIdRow {
                account: AccountId(2),
                order: order(2),
                date: at("2024-06-01"),
                description: Some(" ".to_string()),
            },
        ];

        let mut ties = TieLedger::default();
        let mut diagnostics = RunDiagnostics::default();
        let ids = reduce_grant_ids("snap_id", &rows, &mut ties, &mut diagnostics);

        assert_eq!(ids.get(&AccountId(2)).map(String::as_str), Some("S-100"));
        assert_eq!(diagnostics.grant_id_conflicts.get("snap_id"), Some(&1));
    }

    #[test]
    fn active_status_follows_latest_event() {
        let mut inactive = ActivityEvent::new(AccountId(1), "Inactive");
        inactive.date = Some("2024-01-01".to_string());
        let mut active = ActivityEvent::new(AccountId(1), "Active");
        active.date = Some("2024-02-01".to_string());

        let config = PipelineConfig::v1();
        let mut diagnostics = RunDiagnostics::default();
        let classified = classify(&[inactive, active], &config, &mut diagnostics);
        let reduced = ReducedActivities::reduce(&classified, &config, &mut diagnostics);

        assert_eq!(reduced.inactive.get(&AccountId(1)), Some(&false));
    }

    #[test]
    fn cohort_takes_start_date_of_latest_dated_row() {
        let mut older = ActivityEvent::new(AccountId(6), "Cohort");
        older.date = Some("2024-01-01".to_string());
        older.start_date = Some("2024-01-15".to_string());
        let mut newer = ActivityEvent::new(AccountId(6), "Cohort");
        newer.date = Some("2024-03-01".to_string());
        newer.start_date = Some("2024-03-18".to_string());

        let config = PipelineConfig::v1();
        let mut diagnostics = RunDiagnostics::default();
        let classified = classify(&[newer, older], &config, &mut diagnostics);
        let reduced = ReducedActivities::reduce(&classified, &config, &mut diagnostics);

        assert_eq!(reduced.cohort_dates.get(&AccountId(6)), Some(&at("2024-03-18")));
    }
}
