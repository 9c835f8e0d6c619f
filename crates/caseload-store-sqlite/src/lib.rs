#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use caseload_core::{
    format_timestamp, now_utc, AccountId, ActivityEvent, ClientAccount, Pipeline, ReportingRecord,
    RunReport, Snapshot, Timestamp, WageRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ulid::Ulid;

const CASELOAD_MIGRATION_VERSION: i64 = 1;

const SCHEMA_CASELOAD_V1: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
  account_id INTEGER PRIMARY KEY,
  payload_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS activities (
  activity_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  activity_id INTEGER UNIQUE,
  account_id INTEGER NOT NULL,
  activity_type TEXT,
  payload_json TEXT NOT NULL,
  imported_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_account
  ON activities(account_id, activity_seq);

CREATE TRIGGER IF NOT EXISTS trg_activities_no_update
BEFORE UPDATE ON activities
BEGIN
  SELECT RAISE(FAIL, 'activities is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_activities_no_delete
BEFORE DELETE ON activities
BEGIN
  SELECT RAISE(FAIL, 'activities is append-only');
END;

CREATE TABLE IF NOT EXISTS wage_records (
  account_id INTEGER PRIMARY KEY,
  dol_confirmed TEXT,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipeline_runs (
  run_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL UNIQUE,
  recorded_at TEXT NOT NULL,
  as_of TEXT NOT NULL,
  config_version INTEGER NOT NULL,
  record_count INTEGER NOT NULL CHECK (record_count >= 0),
  report_json TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_pipeline_runs_no_update
BEFORE UPDATE ON pipeline_runs
BEGIN
  SELECT RAISE(FAIL, 'pipeline_runs is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_pipeline_runs_no_delete
BEFORE DELETE ON pipeline_runs
BEGIN
  SELECT RAISE(FAIL, 'pipeline_runs is append-only');
END;

CREATE TABLE IF NOT EXISTS reporting_records (
  account_id INTEGER PRIMARY KEY,
  run_id TEXT NOT NULL REFERENCES pipeline_runs(run_id),
  fiscal_year INTEGER,
  record_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reporting_records_fiscal_year
  ON reporting_records(fiscal_year);
";

pub struct SqliteCaseloadStore {
    conn: Connection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub accounts_upserted: usize,
    pub activities_appended: usize,
    pub activities_skipped: usize,
    pub wage_records_upserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRun {
    pub run_id: Ulid,
    pub recorded_at: String,
    pub report: RunReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStatus {
    pub contract_version: String,
    pub accounts: usize,
    pub activities: usize,
    pub wage_records: usize,
    pub reporting_records: usize,
    pub runs: usize,
    pub last_run: Option<StoredRun>,
}

impl SqliteCaseloadStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_CASELOAD_V1)
            .context("failed to apply caseload schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![CASELOAD_MIGRATION_VERSION, format_timestamp(now_utc())],
            )
            .context("failed to register caseload schema migration")?;

        Ok(())
    }

    /// Inserts or overwrites accounts by id. Later rows for the same id in
    /// one batch win.
    pub fn upsert_accounts(&mut self, accounts: &[ClientAccount]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start account transaction")?;
        let count = write_accounts(&tx, accounts, &format_timestamp(now_utc()))?;
        tx.commit().context("failed to commit account transaction")?;
        Ok(count)
    }

    /// Appends activities in input order. Rows whose CRM id is already
    /// stored are skipped; rows without an id are always appended.
    ///
    /// Returns `(appended, skipped)`.
    pub fn append_activities(&mut self, activities: &[ActivityEvent]) -> Result<(usize, usize)> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start activity transaction")?;
        let counts = write_activities(&tx, activities, &format_timestamp(now_utc()))?;
        tx.commit().context("failed to commit activity transaction")?;
        Ok(counts)
    }

    pub fn upsert_wage_records(&mut self, records: &[WageRecord]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start wage record transaction")?;
        let count = write_wage_records(&tx, records, &format_timestamp(now_utc()))?;
        tx.commit()
            .context("failed to commit wage record transaction")?;
        Ok(count)
    }

    /// Loads a whole CRM extract in one transaction: accounts upserted,
    /// activities appended, wage records upserted. Nothing is kept when any
    /// part fails.
    pub fn import_snapshot(&mut self, snapshot: &Snapshot) -> Result<ImportReport> {
        let now = format_timestamp(now_utc());
        let tx = self
            .conn
            .transaction()
            .context("failed to start import transaction")?;

        let accounts_upserted = write_accounts(&tx, &snapshot.accounts, &now)?;
        let (activities_appended, activities_skipped) =
            write_activities(&tx, &snapshot.activities, &now)?;
        let wage_records_upserted = write_wage_records(&tx, &snapshot.wage_records, &now)?;

        tx.commit().context("failed to commit import transaction")?;

        let report = ImportReport {
            accounts_upserted,
            activities_appended,
            activities_skipped,
            wage_records_upserted,
        };
        info!(
            accounts = report.accounts_upserted,
            appended = report.activities_appended,
            skipped = report.activities_skipped,
            wage_records = report.wage_records_upserted,
            "snapshot imported"
        );
        Ok(report)
    }

    /// Reads the full stored snapshot: accounts by id, activities in
    /// append order.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM accounts ORDER BY account_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut accounts = Vec::new();
        for payload in collect_rows(rows)? {
            let account: ClientAccount =
                serde_json::from_str(&payload).context("invalid stored account JSON")?;
            accounts.push(account);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT activity_seq, payload_json FROM activities ORDER BY activity_seq ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut activities = Vec::new();
        for (seq, payload) in collect_rows(rows)? {
            let event: ActivityEvent = serde_json::from_str(&payload)
                .with_context(|| format!("invalid stored activity JSON at seq {seq}"))?;
            activities.push(event);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT account_id, dol_confirmed FROM wage_records ORDER BY account_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(WageRecord {
                account_id: AccountId(row.get(0)?),
                dol_confirmed: row.get(1)?,
            })
        })?;
        let wage_records = collect_rows(rows)?;

        Ok(Snapshot {
            accounts,
            activities,
            wage_records,
        })
    }

    /// Swaps the whole reporting table for `records` and logs the run, in
    /// one transaction.
    pub fn replace_reporting_records(
        &mut self,
        records: &[ReportingRecord],
        report: &RunReport,
    ) -> Result<StoredRun> {
        let run_id = Ulid::new();
        let recorded_at = format_timestamp(now_utc());
        let report_json = serde_json::to_string(report).context("failed to serialize run report")?;
        let record_count =
            i64::try_from(records.len()).context("record count does not fit in i64")?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start reporting transaction")?;

        tx.execute(
            "INSERT INTO pipeline_runs(
                run_id, recorded_at, as_of, config_version, record_count, report_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id.to_string(),
                recorded_at,
                report.as_of,
                i64::from(report.config_version),
                record_count,
                report_json
            ],
        )
        .context("failed to record pipeline run")?;

        tx.execute("DELETE FROM reporting_records", [])
            .context("failed to clear reporting records")?;

        for record in records {
            let record_json = serde_json::to_string(record)
                .with_context(|| format!("failed to serialize record {}", record.id()))?;
            tx.execute(
                "INSERT INTO reporting_records(account_id, run_id, fiscal_year, record_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id().0,
                    run_id.to_string(),
                    record.fiscal.fiscal_year,
                    record_json
                ],
            )
            .with_context(|| format!("failed to insert reporting record {}", record.id()))?;
        }

        tx.commit()
            .context("failed to commit reporting transaction")?;

        Ok(StoredRun {
            run_id,
            recorded_at,
            report: report.clone(),
        })
    }

    /// Full recompute over the stored snapshot as of `now`.
    pub fn recompute(&mut self, pipeline: &Pipeline, now: Timestamp) -> Result<StoredRun> {
        let snapshot = self.load_snapshot()?;
        let output = pipeline.run(&snapshot, now);
        let stored = self.replace_reporting_records(&output.records, &output.report)?;
        info!(
            run_id = %stored.run_id,
            records = stored.report.records,
            "reporting records replaced"
        );
        Ok(stored)
    }

    pub fn get_record(&self, account_id: AccountId) -> Result<Option<ReportingRecord>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM reporting_records WHERE account_id = ?1",
                params![account_id.0],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read reporting record {account_id}"))?;

        payload
            .map(|json| {
                serde_json::from_str(&json)
                    .with_context(|| format!("invalid stored reporting record {account_id}"))
            })
            .transpose()
    }

    /// Stored records ordered by account id, optionally restricted to one
    /// fiscal year.
    pub fn list_records(
        &self,
        fiscal_year: Option<i32>,
        limit: Option<usize>,
    ) -> Result<Vec<ReportingRecord>> {
        let mut query = "SELECT record_json FROM reporting_records
             WHERE (?1 IS NULL OR fiscal_year = ?1)
             ORDER BY account_id ASC"
            .to_string();

        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![fiscal_year], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in collect_rows(rows)? {
            let record: ReportingRecord =
                serde_json::from_str(&json).context("invalid stored reporting record JSON")?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn last_run(&self) -> Result<Option<StoredRun>> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT run_id, recorded_at, report_json
                 FROM pipeline_runs
                 ORDER BY run_seq DESC
                 LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("failed to read last pipeline run")?;

        let Some((run_id, recorded_at, report_json)) = row else {
            return Ok(None);
        };
        let run_id = Ulid::from_string(&run_id)
            .map_err(|err| anyhow!("invalid stored run_id {run_id}: {err}"))?;
        let report: RunReport =
            serde_json::from_str(&report_json).context("invalid stored run report JSON")?;

        Ok(Some(StoredRun {
            run_id,
            recorded_at,
            report,
        }))
    }

    pub fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            contract_version: "store_status.v1".to_string(),
            accounts: self.count_rows("accounts")?,
            activities: self.count_rows("activities")?,
            wage_records: self.count_rows("wage_records")?,
            reporting_records: self.count_rows("reporting_records")?,
            runs: self.count_rows("pipeline_runs")?,
            last_run: self.last_run()?,
        })
    }

    fn count_rows(&self, table_name: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        usize::try_from(count).with_context(|| format!("invalid row count for {table_name}"))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn write_accounts(conn: &Connection, accounts: &[ClientAccount], now: &str) -> Result<usize> {
    for account in accounts {
        let payload = serde_json::to_string(account)
            .with_context(|| format!("failed to serialize account {}", account.id))?;
        conn.execute(
            "INSERT INTO accounts(account_id, payload_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
               payload_json = excluded.payload_json,
               updated_at = excluded.updated_at",
            params![account.id.0, payload, now],
        )
        .with_context(|| format!("failed to upsert account {}", account.id))?;
    }
    debug!(count = accounts.len(), "accounts upserted");
    Ok(accounts.len())
}

fn write_activities(
    conn: &Connection,
    activities: &[ActivityEvent],
    now: &str,
) -> Result<(usize, usize)> {
    let mut appended = 0_usize;
    let mut skipped = 0_usize;
    for event in activities {
        let payload = serde_json::to_string(event).with_context(|| {
            format!("failed to serialize activity for account {}", event.account_id)
        })?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO activities(
                    activity_id, account_id, activity_type, payload_json, imported_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id,
                    event.account_id.0,
                    event.activity_type,
                    payload,
                    now
                ],
            )
            .context("failed to append activity")?;
        if changed == 0 {
            skipped += 1;
        } else {
            appended += 1;
        }
    }
    debug!(appended, skipped, "activities appended");
    Ok((appended, skipped))
}

fn write_wage_records(conn: &Connection, records: &[WageRecord], now: &str) -> Result<usize> {
    for record in records {
        conn.execute(
            "INSERT INTO wage_records(account_id, dol_confirmed, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
               dol_confirmed = excluded.dol_confirmed,
               updated_at = excluded.updated_at",
            params![record.account_id.0, record.dol_confirmed, now],
        )
        .with_context(|| format!("failed to upsert wage record {}", record.account_id))?;
    }
    Ok(records.len())
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines)]

    use super::*;
    use caseload_core::{parse_timestamp, Flag, PipelineConfig};
    use proptest::prelude::*;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteCaseloadStore {
        let store = must(SqliteCaseloadStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn fixture_pipeline() -> Pipeline {
        match Pipeline::new(PipelineConfig::v1()) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture pipeline: {err}"),
        }
    }

    fn fixture_now() -> Timestamp {
        match parse_timestamp("2024-06-01T00:00:00") {
            Some(value) => value,
            None => panic!("invalid fixture timestamp"),
        }
    }

    fn account(id: i64, program: &str) -> ClientAccount {
        let mut account = ClientAccount::new(AccountId(id));
        account.name = Some(format!("Client {id}"));
        account.intake_date = Some("2023-09-05".to_string());
        account.training_program = Some(program.to_string());
        account.address_city = Some("Baltimore".to_string());
        account.address_zip = Some("21215".to_string());
        account
    }

    fn placement(id: i64, account_id: i64, start: &str) -> ActivityEvent {
        let mut event = ActivityEvent::new(AccountId(account_id), "Client Became Employed");
        event.id = Some(id);
        event.start_date = Some(start.to_string());
        event.placement_retention = Some("Initial Placement".to_string());
        event.employer = Some("Harbor Logistics".to_string());
        event.wage = Some("17.50".to_string());
        event.hours = Some("40".to_string());
        event
    }

    fn fixture_snapshot() -> Snapshot {
        let mut completed = ActivityEvent::new(AccountId(1), "Training Status");
        completed.id = Some(12);
        completed.date = Some("2023-12-01".to_string());
        completed.training_status = Some("Complete".to_string());

        Snapshot {
            accounts: vec![account(1, "Forklift"), account(2, "Culinary")],
            activities: vec![placement(11, 1, "2024-01-08"), completed],
            wage_records: vec![WageRecord {
                account_id: AccountId(1),
                dol_confirmed: Some("Y".to_string()),
            }],
        }
    }

    #[test]
    fn recompute_persists_one_record_per_account() {
        let mut store = fixture_store();
        let import = must(store.import_snapshot(&fixture_snapshot()));
        assert_eq!(import.accounts_upserted, 2);
        assert_eq!(import.activities_appended, 2);
        assert_eq!(import.activities_skipped, 0);
        assert_eq!(import.wage_records_upserted, 1);

        let stored = must(store.recompute(&fixture_pipeline(), fixture_now()));
        assert_eq!(stored.report.records, 2);

        let records = must(store.list_records(None, None));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id(), AccountId(1));
        assert_eq!(records[0].kpis.gained_employment, Flag::Yes);
        assert_eq!(records[0].grants.wage_record_confirmed, Flag::Yes);
        assert_eq!(records[1].kpis.gained_employment, Flag::No);

        let limited = must(store.list_records(None, Some(1)));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn stored_record_matches_pipeline_output() {
        let mut store = fixture_store();
        let _ = must(store.import_snapshot(&fixture_snapshot()));
        let _ = must(store.recompute(&fixture_pipeline(), fixture_now()));

        let expected = fixture_pipeline().run(&fixture_snapshot(), fixture_now());
        let stored = match must(store.get_record(AccountId(1))) {
            Some(value) => value,
            None => panic!("expected stored record for account 1"),
        };
        assert_eq!(stored, expected.records[0]);
        assert!(must(store.get_record(AccountId(99))).is_none());
    }

    #[test]
    fn recompute_is_idempotent_and_logs_each_run() {
        let mut store = fixture_store();
        let _ = must(store.import_snapshot(&fixture_snapshot()));

        let first = must(store.recompute(&fixture_pipeline(), fixture_now()));
        let before = must(store.list_records(None, None));
        let second = must(store.recompute(&fixture_pipeline(), fixture_now()));
        let after = must(store.list_records(None, None));

        assert_eq!(before, after);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.report, second.report);

        let last = match must(store.last_run()) {
            Some(value) => value,
            None => panic!("expected a stored run"),
        };
        assert_eq!(last.run_id, second.run_id);

        let status = must(store.status());
        assert_eq!(status.runs, 2);
        assert_eq!(status.reporting_records, 2);
    }

    #[test]
    fn reimport_skips_known_activity_ids_and_overwrites_accounts() {
        let mut store = fixture_store();
        let _ = must(store.import_snapshot(&fixture_snapshot()));

        let mut changed = fixture_snapshot();
        changed.accounts[1].training_program = Some("Welding".to_string());
        let mut untracked = ActivityEvent::new(AccountId(2), "Notes");
        untracked.description = Some("walk-in".to_string());
        changed.activities.push(untracked.clone());
        changed.activities.push(untracked);

        let import = must(store.import_snapshot(&changed));
        assert_eq!(import.activities_appended, 2);
        assert_eq!(import.activities_skipped, 2);

        let snapshot = must(store.load_snapshot());
        assert_eq!(snapshot.accounts.len(), 2);
        assert_eq!(
            snapshot.accounts[1].training_program.as_deref(),
            Some("Welding")
        );
        assert_eq!(snapshot.activities.len(), 4);
        assert_eq!(snapshot.activities[0].id, Some(11));
    }

    #[test]
    fn failed_import_leaves_no_partial_rows() {
        let mut store = fixture_store();
        if let Err(err) = store.connection().execute_batch(
            "CREATE TRIGGER trg_reject_wage_records
             BEFORE INSERT ON wage_records
             BEGIN
               SELECT RAISE(FAIL, 'wage records rejected');
             END;",
        ) {
            panic!("failed to install rejecting trigger: {err}");
        }

        assert!(store.import_snapshot(&fixture_snapshot()).is_err());

        let status = must(store.status());
        assert_eq!(status.accounts, 0);
        assert_eq!(status.activities, 0);
        assert_eq!(status.wage_records, 0);
    }

    #[test]
    fn append_only_trigger_blocks_updates_and_deletes() {
        let mut store = fixture_store();
        let _ = must(store.import_snapshot(&fixture_snapshot()));

        let update_result = store.connection().execute(
            "UPDATE activities SET activity_type = 'mutated' WHERE activity_id = ?1",
            params![11_i64],
        );
        assert!(update_result.is_err());

        let delete_result = store
            .connection()
            .execute("DELETE FROM activities WHERE activity_id = ?1", params![11_i64]);
        assert!(delete_result.is_err());
    }

    #[test]
    fn schema_contract_contains_expected_triggers() {
        let store = fixture_store();
        let trigger_count = match store.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='trigger'
               AND name IN (
                 'trg_activities_no_update', 'trg_activities_no_delete',
                 'trg_pipeline_runs_no_update', 'trg_pipeline_runs_no_delete'
               )",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to query trigger contract: {err}"),
        };
        assert_eq!(trigger_count, 4);
    }

    #[test]
    fn migration_is_idempotent_and_preserves_existing_data() {
        let mut store = fixture_store();
        let _ = must(store.import_snapshot(&fixture_snapshot()));
        let _ = must(store.recompute(&fixture_pipeline(), fixture_now()));

        must(store.migrate());

        let status = must(store.status());
        assert_eq!(status.accounts, 2);
        assert_eq!(status.activities, 2);
        assert_eq!(status.reporting_records, 2);
        let migrations = match store.connection().query_row(
            "SELECT COUNT(*) FROM schema_migrations",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count migrations: {err}"),
        };
        assert_eq!(migrations, 1);
    }

    #[test]
    fn fiscal_year_filter_uses_stored_column() {
        let mut store = fixture_store();
        let mut snapshot = fixture_snapshot();
        snapshot.accounts[1].intake_date = Some("2024-08-01".to_string());
        let _ = must(store.import_snapshot(&snapshot));
        let _ = must(store.recompute(&fixture_pipeline(), fixture_now()));

        let fy2024 = must(store.list_records(Some(2024), None));
        assert_eq!(fy2024.len(), 1);
        assert_eq!(fy2024[0].id(), AccountId(1));

        let fy2025 = must(store.list_records(Some(2025), None));
        assert_eq!(fy2025.len(), 1);
        assert_eq!(fy2025[0].id(), AccountId(2));
    }

    #[test]
    fn empty_store_has_no_run() {
        let store = fixture_store();
        assert!(must(store.last_run()).is_none());
        let status = must(store.status());
        assert_eq!(status.accounts, 0);
        assert!(status.last_run.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_stored_records_match_direct_run(
            account_ids in prop::collection::btree_set(1_i64..40, 1..12),
            placements in prop::collection::vec((1_i64..40, 1_u8..=12), 0..24),
        ) {
            let accounts: Vec<ClientAccount> = account_ids
                .iter()
                .map(|id| account(*id, "Forklift"))
                .collect();
            let activities: Vec<ActivityEvent> = placements
                .iter()
                .enumerate()
                .map(|(index, (account_id, month))| {
                    let id = i64::try_from(index).unwrap_or(0) + 1;
                    placement(id, *account_id, &format!("2024-{month:02}-15"))
                })
                .collect();
            let snapshot = Snapshot { accounts, activities, wage_records: Vec::new() };

            let mut store = fixture_store();
            let _ = must(store.import_snapshot(&snapshot));
            let _ = must(store.recompute(&fixture_pipeline(), fixture_now()));

            let expected = fixture_pipeline().run(&snapshot, fixture_now());
            let stored = must(store.list_records(None, None));
            prop_assert_eq!(stored.len(), account_ids.len());
            prop_assert_eq!(stored, expected.records);
        }
    }
}
