use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use wq_core::{
    Clock, ElementId, ElementStatus, EventMask, FileState, InputFile, NewElement, Progress, ProgressUpdate, StoreError,
    SystemClock, WorkQueueElement,
};
use wq_storage::{ElementStore, StoreResult};

const ELEMENT_COLUMNS: &str = "id, parent_queue_id, subscription_id, spec_ref, task, data_item, input_blocks_json,
     mask_first_event, mask_last_event, num_jobs, priority, insert_time, update_time, parent_flag,
     percent_complete, percent_success, files_processed, status, resolved_sites_json, child_queue_url,
     version, reported_version";

/// Durable element store backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

trait OrBackend<T> {
    fn or_backend(self) -> StoreResult<T>;
}

impl<T, E: Into<anyhow::Error>> OrBackend<T> for Result<T, E> {
    fn or_backend(self) -> StoreResult<T> {
        self.map_err(|e| StoreError::Backend(e.into()))
    }
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        Self::open_with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(db_path: &Path, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path).with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let init_sql = include_str!("../migrations/0001_init.sql");
        conn.execute_batch(init_sql).context("apply schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("sqlite connection lock poisoned")))
    }

    fn status_to_str(s: ElementStatus) -> &'static str {
        s.as_str()
    }

    fn str_to_status(s: &str) -> StoreResult<ElementStatus> {
        ElementStatus::from_name(s).ok_or_else(|| StoreError::Backend(anyhow!("unknown element status {s:?} in db")))
    }

    fn file_state_to_str(s: FileState) -> &'static str {
        match s {
            FileState::Available => "available",
            FileState::Acquired => "acquired",
            FileState::Completed => "completed",
            FileState::Failed => "failed",
        }
    }

    fn str_to_file_state(s: &str) -> FileState {
        match s {
            "acquired" => FileState::Acquired,
            "completed" => FileState::Completed,
            "failed" => FileState::Failed,
            _ => FileState::Available,
        }
    }

    /// Rows are read raw first; decoding happens outside the rusqlite closure so
    /// decode failures surface as store errors.
    fn read_row(r: &Row<'_>) -> rusqlite::Result<RawElement> {
        Ok(RawElement {
            id: r.get(0)?,
            parent_queue_id: r.get(1)?,
            subscription_id: r.get(2)?,
            spec_ref: r.get(3)?,
            task: r.get(4)?,
            data_item: r.get(5)?,
            input_blocks_json: r.get(6)?,
            mask_first: r.get(7)?,
            mask_last: r.get(8)?,
            num_jobs: r.get(9)?,
            priority: r.get(10)?,
            insert_time: r.get(11)?,
            update_time: r.get(12)?,
            parent_flag: r.get(13)?,
            percent_complete: r.get(14)?,
            percent_success: r.get(15)?,
            files_processed: r.get(16)?,
            status: r.get(17)?,
            resolved_sites_json: r.get(18)?,
            child_queue_url: r.get(19)?,
            version: r.get(20)?,
            reported_version: r.get(21)?,
        })
    }

    fn decode(conn: &Connection, raw: RawElement) -> StoreResult<WorkQueueElement> {
        let id = ElementId::from_str(raw.id);
        let sites = Self::load_sites(conn, &id)?;
        let mask = match (raw.mask_first, raw.mask_last) {
            (Some(first), Some(last)) => Some(EventMask {
                first_event: first as u64,
                last_event: last as u64,
            }),
            _ => None,
        };
        Ok(WorkQueueElement {
            id,
            parent_queue_id: raw.parent_queue_id.map(ElementId::from_str),
            subscription_id: raw.subscription_id,
            spec_ref: raw.spec_ref,
            task: raw.task,
            data_item: raw.data_item,
            input_blocks: serde_json::from_str(&raw.input_blocks_json).or_backend()?,
            mask,
            num_jobs: raw.num_jobs as u32,
            priority: raw.priority as i32,
            insert_time: raw.insert_time,
            update_time: raw.update_time,
            parent_flag: raw.parent_flag != 0,
            progress: Progress {
                percent_complete: raw.percent_complete.clamp(0, 100) as u8,
                percent_success: raw.percent_success.clamp(0, 100) as u8,
                files_processed: raw.files_processed.max(0) as u64,
            },
            status: Self::str_to_status(&raw.status)?,
            sites,
            resolved_sites: serde_json::from_str(&raw.resolved_sites_json).or_backend()?,
            child_queue_url: raw.child_queue_url,
            version: raw.version as u64,
            reported_version: raw.reported_version as u64,
        })
    }

    fn load_sites(conn: &Connection, id: &ElementId) -> StoreResult<BTreeMap<String, bool>> {
        let mut stmt = conn
            .prepare_cached("SELECT site_name, valid_flag FROM element_sites WHERE element_id = ?1")
            .or_backend()?;
        let rows = stmt
            .query_map([id.as_str()], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0)))
            .or_backend()?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (site, valid) = row.or_backend()?;
            out.insert(site, valid);
        }
        Ok(out)
    }

    fn write_sites(tx: &Transaction<'_>, id: &ElementId, sites: &BTreeMap<String, bool>) -> StoreResult<()> {
        tx.execute("DELETE FROM element_sites WHERE element_id = ?1", [id.as_str()])
            .or_backend()?;
        for (site, valid) in sites {
            tx.execute(
                "INSERT INTO element_sites(element_id, site_name, valid_flag) VALUES (?1, ?2, ?3)",
                params![id.as_str(), site, *valid as i64],
            )
            .or_backend()?;
        }
        Ok(())
    }

    fn query(conn: &Connection, filter: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<WorkQueueElement>> {
        let sql = format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE {filter} ORDER BY insert_time, id");
        let raws = {
            let mut stmt = conn.prepare_cached(&sql).or_backend()?;
            let rows = stmt.query_map(args, Self::read_row).or_backend()?;
            rows.collect::<rusqlite::Result<Vec<_>>>().or_backend()?
        };
        raws.into_iter().map(|raw| Self::decode(conn, raw)).collect()
    }

    fn get_in(conn: &Connection, id: &ElementId) -> StoreResult<Option<WorkQueueElement>> {
        let sql = format!("SELECT {ELEMENT_COLUMNS} FROM elements WHERE id = ?1");
        let raw = conn
            .query_row(&sql, [id.as_str()], Self::read_row)
            .optional()
            .or_backend()?;
        raw.map(|raw| Self::decode(conn, raw)).transpose()
    }

    fn require(conn: &Connection, id: &ElementId) -> StoreResult<WorkQueueElement> {
        Self::get_in(conn, id)?.ok_or_else(|| StoreError::ElementNotFound(id.clone()))
    }

    fn begin(conn: &mut Connection) -> StoreResult<Transaction<'_>> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate).or_backend()
    }
}

struct RawElement {
    id: String,
    parent_queue_id: Option<String>,
    subscription_id: Option<i64>,
    spec_ref: String,
    task: String,
    data_item: Option<String>,
    input_blocks_json: String,
    mask_first: Option<i64>,
    mask_last: Option<i64>,
    num_jobs: i64,
    priority: i64,
    insert_time: i64,
    update_time: i64,
    parent_flag: i64,
    percent_complete: i64,
    percent_success: i64,
    files_processed: i64,
    status: String,
    resolved_sites_json: String,
    child_queue_url: Option<String>,
    version: i64,
    reported_version: i64,
}

fn window_filter(since: Option<i64>, before: Option<i64>) -> (i64, i64) {
    (since.unwrap_or(i64::MIN), before.unwrap_or(i64::MAX))
}

impl ElementStore for SqliteStore {
    fn create(&self, element: NewElement) -> StoreResult<WorkQueueElement> {
        element.validate()?;
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        let key = element.dedup_key();
        let open: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM elements WHERE spec_ref = ?1 AND task = ?2 AND dedup_item = ?3
                 AND status IN ('Available', 'Negotiating', 'Acquired', 'Running')",
                params![key.spec_ref, key.task, key.data_item],
                |r| r.get(0),
            )
            .or_backend()?;
        if open > 0 {
            return Err(StoreError::DuplicateElement {
                spec_ref: key.spec_ref,
                task: key.task,
                data_item: key.data_item,
            });
        }

        let stored = WorkQueueElement::from_new(element, ElementId::new(), self.clock.now());
        let (mask_first, mask_last) = match stored.mask {
            Some(m) => (Some(m.first_event as i64), Some(m.last_event as i64)),
            None => (None, None),
        };
        tx.execute(
            &format!(
                "INSERT INTO elements({ELEMENT_COLUMNS}, dedup_item)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
            ),
            params![
                stored.id.as_str(),
                stored.parent_queue_id.as_ref().map(|p| p.as_str()),
                stored.subscription_id,
                stored.spec_ref,
                stored.task,
                stored.data_item,
                serde_json::to_string(&stored.input_blocks).or_backend()?,
                mask_first,
                mask_last,
                stored.num_jobs as i64,
                stored.priority as i64,
                stored.insert_time,
                stored.update_time,
                stored.parent_flag as i64,
                stored.progress.percent_complete as i64,
                stored.progress.percent_success as i64,
                stored.progress.files_processed as i64,
                Self::status_to_str(stored.status),
                serde_json::to_string(&stored.resolved_sites).or_backend()?,
                stored.child_queue_url,
                stored.version as i64,
                stored.reported_version as i64,
                key.data_item,
            ],
        )
        .or_backend()?;
        Self::write_sites(&tx, &stored.id, &stored.sites)?;
        tx.commit().or_backend()?;
        tracing::debug!(element = %stored.id, task = %stored.task, "element created");
        Ok(stored)
    }

    fn get(&self, id: &ElementId) -> StoreResult<Option<WorkQueueElement>> {
        let conn = self.lock()?;
        Self::get_in(&conn, id)
    }

    fn get_by_status(
        &self,
        status: ElementStatus,
        since: Option<i64>,
        before: Option<i64>,
    ) -> StoreResult<Vec<WorkQueueElement>> {
        let conn = self.lock()?;
        let (lo, hi) = window_filter(since, before);
        Self::query(
            &conn,
            "status = ?1 AND update_time >= ?2 AND update_time < ?3",
            &[&Self::status_to_str(status), &lo, &hi],
        )
    }

    fn get_by_parent(&self, parent_queue_id: &ElementId) -> StoreResult<Vec<WorkQueueElement>> {
        let conn = self.lock()?;
        Self::query(&conn, "parent_queue_id = ?1", &[&parent_queue_id.as_str()])
    }

    fn get_by_spec(&self, spec_ref: &str, task: &str) -> StoreResult<Vec<WorkQueueElement>> {
        let conn = self.lock()?;
        Self::query(&conn, "spec_ref = ?1 AND task = ?2", &[&spec_ref, &task])
    }

    fn update_status(&self, ids: &[ElementId], status: ElementStatus, child_queue_url: Option<&str>) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        for id in ids {
            let current: Option<String> = tx
                .query_row("SELECT status FROM elements WHERE id = ?1", [id.as_str()], |r| r.get(0))
                .optional()
                .or_backend()?;
            let current = current.ok_or_else(|| StoreError::ElementNotFound(id.clone()))?;
            let from = Self::str_to_status(&current)?;
            if !from.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: id.clone(),
                    from,
                    to: status,
                });
            }
        }
        let now = self.clock.now();
        for id in ids {
            tx.execute(
                "UPDATE elements SET status = ?2, update_time = ?3, version = version + 1,
                 child_queue_url = COALESCE(?4, child_queue_url)
                 WHERE id = ?1",
                params![id.as_str(), Self::status_to_str(status), now, child_queue_url],
            )
            .or_backend()?;
        }
        tx.commit().or_backend()?;
        Ok(())
    }

    fn update_progress(&self, ids: &[ElementId], values: &ProgressUpdate) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        let now = self.clock.now();
        for id in ids {
            let current = Self::require(&tx, id)?;
            if current.status.is_terminal() {
                continue;
            }
            let merged = current.progress.merge(values);
            if merged == current.progress {
                continue;
            }
            tx.execute(
                "UPDATE elements SET percent_complete = ?2, percent_success = ?3, files_processed = ?4,
                 update_time = ?5, version = version + 1 WHERE id = ?1",
                params![
                    id.as_str(),
                    merged.percent_complete as i64,
                    merged.percent_success as i64,
                    merged.files_processed as i64,
                    now
                ],
            )
            .or_backend()?;
        }
        tx.commit().or_backend()?;
        Ok(())
    }

    fn count_by_status(&self, status: ElementStatus, since: Option<i64>, before: Option<i64>) -> StoreResult<u64> {
        let conn = self.lock()?;
        let (lo, hi) = window_filter(since, before);
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM elements WHERE status = ?1 AND update_time >= ?2 AND update_time < ?3",
                params![Self::status_to_str(status), lo, hi],
                |r| r.get(0),
            )
            .or_backend()?;
        Ok(n as u64)
    }

    fn set_sites(&self, id: &ElementId, sites: &BTreeMap<String, bool>) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        Self::require(&tx, id)?;
        Self::write_sites(&tx, id, sites)?;
        tx.commit().or_backend()
    }

    fn set_resolved_sites(&self, id: &ElementId, sites: &BTreeSet<String>) -> StoreResult<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE elements SET resolved_sites_json = ?2 WHERE id = ?1",
                params![id.as_str(), serde_json::to_string(sites).or_backend()?],
            )
            .or_backend()?;
        if n == 0 {
            return Err(StoreError::ElementNotFound(id.clone()));
        }
        Ok(())
    }

    fn set_subscription(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        let current = Self::require(&tx, id)?;
        match current.subscription_id {
            Some(existing) if existing != subscription_id => {
                return Err(StoreError::InvalidElement(format!(
                    "element {id} already linked to subscription {existing}"
                )))
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "UPDATE elements SET subscription_id = ?2 WHERE id = ?1",
                    params![id.as_str(), subscription_id],
                )
                .or_backend()?;
            }
        }
        tx.commit().or_backend()
    }

    fn record_injection(&self, id: &ElementId, subscription_id: i64) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        let current = Self::require(&tx, id)?;
        if current.status != ElementStatus::Negotiating {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: current.status,
                to: ElementStatus::Acquired,
            });
        }
        if let Some(existing) = current.subscription_id.filter(|s| *s != subscription_id) {
            return Err(StoreError::InvalidElement(format!(
                "element {id} already linked to subscription {existing}"
            )));
        }
        tx.execute(
            "UPDATE elements SET subscription_id = ?2, status = ?3, update_time = ?4, version = version + 1
             WHERE id = ?1",
            params![
                id.as_str(),
                subscription_id,
                Self::status_to_str(ElementStatus::Acquired),
                self.clock.now()
            ],
        )
        .or_backend()?;
        tx.commit().or_backend()
    }

    fn get_unreported(&self) -> StoreResult<Vec<WorkQueueElement>> {
        let conn = self.lock()?;
        Self::query(&conn, "version > reported_version", &[])
    }

    fn mark_reported(&self, id: &ElementId, version: u64) -> StoreResult<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE elements SET reported_version = MAX(reported_version, MIN(?2, version)) WHERE id = ?1",
                params![id.as_str(), version as i64],
            )
            .or_backend()?;
        if n == 0 {
            return Err(StoreError::ElementNotFound(id.clone()));
        }
        Ok(())
    }

    fn add_input_files(&self, id: &ElementId, files: &[InputFile]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        Self::require(&tx, id)?;
        for f in files {
            tx.execute(
                "INSERT INTO element_files(element_id, lfn, parents_json, state) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(element_id, lfn) DO UPDATE SET parents_json = excluded.parents_json, state = excluded.state",
                params![
                    id.as_str(),
                    f.lfn,
                    serde_json::to_string(&f.parents).or_backend()?,
                    Self::file_state_to_str(f.state)
                ],
            )
            .or_backend()?;
        }
        tx.commit().or_backend()
    }

    fn input_files(&self, id: &ElementId) -> StoreResult<Vec<InputFile>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT lfn, parents_json, state FROM element_files WHERE element_id = ?1 ORDER BY rowid")
            .or_backend()?;
        let rows = stmt
            .query_map([id.as_str()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })
            .or_backend()?;
        let mut out = vec![];
        for row in rows {
            let (lfn, parents_json, state) = row.or_backend()?;
            out.push(InputFile {
                lfn,
                parents: serde_json::from_str(&parents_json).or_backend()?,
                state: Self::str_to_file_state(&state),
            });
        }
        Ok(out)
    }

    fn set_file_state(&self, id: &ElementId, lfns: &[String], state: FileState) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = Self::begin(&mut conn)?;
        Self::require(&tx, id)?;
        for lfn in lfns {
            tx.execute(
                "UPDATE element_files SET state = ?3 WHERE element_id = ?1 AND lfn = ?2",
                params![id.as_str(), lfn, Self::file_state_to_str(state)],
            )
            .or_backend()?;
        }
        tx.commit().or_backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wq_core::ManualClock;
    use wq_storage::contract::run_store_contract_suite;

    #[test]
    fn sqlite_store_contract() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SqliteStore::open_with_clock(&dir.path().join("wq.db"), clock.clone()).unwrap();
        run_store_contract_suite(&store, clock.as_ref()).unwrap();
    }

    #[test]
    fn elements_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("wq.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            let mut new = NewElement::new("MC", "/MC/Gen").with_jobs(10).with_site("T1_A", true);
            new.mask = Some(EventMask {
                first_event: 1,
                last_event: 1000,
            });
            new.data_item = Some("events:1-1000".into());
            let e = store.create(new).unwrap();
            store.update_status(&[e.id.clone()], ElementStatus::Negotiating, None).unwrap();
            e.id
        };
        let store = SqliteStore::open(&path).unwrap();
        let e = store.get(&id).unwrap().unwrap();
        assert_eq!(e.status, ElementStatus::Negotiating);
        assert_eq!(e.mask.map(|m| m.num_events()), Some(1000));
        assert_eq!(e.sites.get("T1_A"), Some(&true));
        assert_eq!(e.version, 1);
    }

    #[test]
    fn unknown_status_in_db_is_a_backend_error() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("wq.db")).unwrap();
        let e = store.create(NewElement::new("S", "/S/T")).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE elements SET status = 'Bogus' WHERE id = ?1", [e.id.as_str()])
            .unwrap();
        assert!(matches!(store.get(&e.id), Err(StoreError::Backend(_))));
    }
}
