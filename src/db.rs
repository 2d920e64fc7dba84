use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::contacts::ContactCandidate;
use crate::enrich::Enrichment;
use crate::error::ParseEnumError;
use crate::models::{
    Company, DecisionMaker, JobPosting, JobType, Market, PostingFilter, Provenance, RunLog,
    RunStatus,
};
use crate::registry::Source;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// A posting ready to be stored. Company URL and size are copied from the
/// company row at insert time.
#[derive(Debug, Clone)]
pub struct NewPosting {
    pub title: String,
    pub company_id: i64,
    pub market: Market,
    pub source_id: i64,
    pub link: String,
    pub posted_date: NaiveDate,
    pub posted_date_provenance: Provenance,
    pub location: Option<String>,
    pub job_type: JobType,
    pub is_technical: bool,
    pub category_confidence: f64,
    pub description: Option<String>,
    pub salary: Option<String>,
}

#[derive(Debug)]
pub enum PersistOutcome {
    Persisted(JobPosting),
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSource {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub active: bool,
    pub postings: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub postings_found: i64,
    pub companies_found: i64,
    pub contacts_found: i64,
    pub units_total: i64,
    pub units_done: i64,
    pub units_blocked: i64,
    pub units_failed: i64,
}

const POSTING_COLUMNS: &str = "p.id, p.title, p.company_id, c.name, p.company_url, p.company_size,
    p.market, p.source_id, s.name, p.link, p.posted_date, p.posted_date_provenance, p.location,
    p.job_type, p.is_technical, p.category_confidence, p.description, p.salary, p.created_at";

const POSTING_JOINS: &str = "FROM job_postings p
    JOIN companies c ON p.company_id = c.id
    JOIN sources s ON p.source_id = s.id";

const COMPANY_COLUMNS: &str =
    "id, name, url, size_bracket, industry, provenance, enrichment_basis, created_at";

const RUN_COLUMNS: &str = "id, status, postings_found, companies_found, contacts_found,
    units_total, units_done, units_blocked, units_failed, parameters, started_at, finished_at, error";

impl Database {
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                base_url TEXT NOT NULL,
                search_template TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                descriptor TEXT NOT NULL,
                locations TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                url TEXT,
                size_bracket TEXT,
                industry TEXT,
                provenance TEXT NOT NULL DEFAULT 'inferred'
                    CHECK (provenance IN ('observed', 'inferred', 'synthetic')),
                enrichment_basis TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS job_postings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                company_url TEXT,
                company_size TEXT,
                market TEXT NOT NULL CHECK (market IN ('US', 'GB')),
                source_id INTEGER NOT NULL REFERENCES sources(id),
                link TEXT NOT NULL,
                posted_date TEXT NOT NULL,
                posted_date_provenance TEXT NOT NULL
                    CHECK (posted_date_provenance IN ('observed', 'inferred')),
                location TEXT,
                job_type TEXT NOT NULL,
                is_technical INTEGER NOT NULL,
                category_confidence REAL NOT NULL,
                description TEXT,
                salary TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS decision_makers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                name TEXT NOT NULL,
                title TEXT NOT NULL,
                linkedin TEXT,
                email TEXT,
                phone TEXT,
                is_primary INTEGER NOT NULL DEFAULT 0,
                provenance TEXT NOT NULL CHECK (provenance IN ('observed', 'synthetic')),
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS run_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'started'
                    CHECK (status IN ('started', 'in_progress', 'completed', 'failed')),
                postings_found INTEGER NOT NULL DEFAULT 0,
                companies_found INTEGER NOT NULL DEFAULT 0,
                contacts_found INTEGER NOT NULL DEFAULT 0,
                units_total INTEGER NOT NULL DEFAULT 0,
                units_done INTEGER NOT NULL DEFAULT 0,
                units_blocked INTEGER NOT NULL DEFAULT 0,
                units_failed INTEGER NOT NULL DEFAULT 0,
                parameters TEXT NOT NULL,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                finished_at TEXT,
                error TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_postings_identity
                ON job_postings(title, company_id, source_id);
            CREATE INDEX IF NOT EXISTS idx_postings_market ON job_postings(market, is_technical);
            CREATE INDEX IF NOT EXISTS idx_postings_posted ON job_postings(posted_date);
            CREATE INDEX IF NOT EXISTS idx_contacts_company ON decision_makers(company_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_postings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobsweep init' first."));
        }
        Ok(())
    }

    // --- Source operations ---

    /// Inserts or refreshes a source row and returns its id and stored
    /// activation flag. An existing row keeps its flag, so `sources disable`
    /// survives re-syncs.
    pub fn upsert_source(&self, source: &Source) -> Result<(i64, bool)> {
        let descriptor = serde_json::to_string(&source.descriptor)?;
        let locations = serde_json::to_string(&source.locations)?;
        self.conn.execute(
            "INSERT INTO sources (name, base_url, search_template, active, descriptor, locations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                base_url = excluded.base_url,
                search_template = excluded.search_template,
                descriptor = excluded.descriptor,
                locations = excluded.locations,
                updated_at = datetime('now')",
            params![
                source.name,
                source.base_url,
                source.search_template,
                source.active,
                descriptor,
                locations
            ],
        )?;
        self.conn
            .query_row(
                "SELECT id, active FROM sources WHERE name = ?1",
                [&source.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("Failed to read back source '{}'", source.name))
    }

    /// Returns false when no source has that name.
    pub fn set_source_active(&self, name: &str, active: bool) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE sources SET active = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![active, name],
        )?;
        Ok(changed > 0)
    }

    pub fn list_sources(&self) -> Result<Vec<StoredSource>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.name, s.base_url, s.active, COUNT(p.id)
             FROM sources s
             LEFT JOIN job_postings p ON p.source_id = s.id
             GROUP BY s.id
             ORDER BY s.name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredSource {
                id: row.get(0)?,
                name: row.get(1)?,
                base_url: row.get(2)?,
                active: row.get(3)?,
                postings: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list sources")
    }

    // --- Company operations ---

    /// Returns the company called `name` (case-insensitive), creating it
    /// when absent. `enrich` runs only for a new company, inside the same
    /// transaction as the insert. The flag is true when the row was created.
    pub fn get_or_create_company<F>(&self, name: &str, enrich: F) -> Result<(Company, bool)>
    where
        F: FnOnce(&str) -> Enrichment,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("company name is empty"));
        }

        let tx = self.conn.unchecked_transaction()?;
        let existing = tx
            .query_row(
                &format!("SELECT {} FROM companies WHERE name = ?1", COMPANY_COLUMNS),
                [name],
                Self::row_to_company,
            )
            .optional()?;
        if let Some(company) = existing {
            tx.commit()?;
            return Ok((company, false));
        }

        let enrichment = enrich(name);
        tx.execute(
            "INSERT INTO companies (name, url, size_bracket, industry, provenance, enrichment_basis)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                enrichment.url,
                enrichment.size_bracket.label(),
                enrichment.industry,
                enrichment.provenance.as_str(),
                enrichment.basis_json()
            ],
        )?;
        let id = tx.last_insert_rowid();
        let company = tx.query_row(
            &format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLUMNS),
            [id],
            Self::row_to_company,
        )?;
        tx.commit()?;
        Ok((company, true))
    }

    pub fn get_company(&self, id: i64) -> Result<Option<Company>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM companies WHERE id = ?1", COMPANY_COLUMNS),
                [id],
                Self::row_to_company,
            )
            .optional()
            .context("Failed to load company")
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
        Ok(Company {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            size_bracket: parse_opt_column(row, 3)?,
            industry: row.get(4)?,
            provenance: parse_column(row, 5)?,
            enrichment_basis: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // --- Posting operations ---

    pub fn persist_posting(&self, posting: &NewPosting) -> Result<PersistOutcome> {
        let changed = self.conn.execute(
            "INSERT INTO job_postings (title, company_id, company_url, company_size, market,
                source_id, link, posted_date, posted_date_provenance, location, job_type,
                is_technical, category_confidence, description, salary)
             SELECT ?1, c.id, c.url, c.size_bracket, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
             FROM companies c WHERE c.id = ?2
             ON CONFLICT(title, company_id, source_id) DO NOTHING",
            params![
                posting.title,
                posting.company_id,
                posting.market.region_code(),
                posting.source_id,
                posting.link,
                posting.posted_date,
                posting.posted_date_provenance.as_str(),
                posting.location,
                posting.job_type.as_str(),
                posting.is_technical,
                posting.category_confidence,
                posting.description,
                posting.salary
            ],
        )?;
        if changed == 0 {
            return Ok(PersistOutcome::AlreadyExists);
        }
        let id = self.conn.last_insert_rowid();
        let stored = self
            .get_posting(id)?
            .ok_or_else(|| anyhow!("posting {} vanished after insert", id))?;
        Ok(PersistOutcome::Persisted(stored))
    }

    pub fn get_posting(&self, id: i64) -> Result<Option<JobPosting>> {
        self.conn
            .query_row(
                &format!("SELECT {} {} WHERE p.id = ?1", POSTING_COLUMNS, POSTING_JOINS),
                [id],
                Self::row_to_posting,
            )
            .optional()
            .context("Failed to load posting")
    }

    pub fn list_postings(&self, filter: &PostingFilter) -> Result<Vec<JobPosting>> {
        let mut sql = format!("SELECT {} {} WHERE 1=1", POSTING_COLUMNS, POSTING_JOINS);
        let mut values: Vec<Value> = vec![];

        if let Some(market) = filter.market {
            values.push(market.region_code().to_string().into());
            sql.push_str(&format!(" AND p.market = ?{}", values.len()));
        }
        if let Some(technical) = filter.is_technical {
            values.push(i64::from(technical).into());
            sql.push_str(&format!(" AND p.is_technical = ?{}", values.len()));
        }
        if let Some(source) = &filter.source {
            values.push(source.clone().into());
            sql.push_str(&format!(" AND s.name = ?{}", values.len()));
        }
        if let Some(since) = filter.posted_since {
            values.push(since.format("%Y-%m-%d").to_string().into());
            sql.push_str(&format!(" AND p.posted_date >= ?{}", values.len()));
        }
        sql.push_str(" ORDER BY p.posted_date DESC, p.id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_posting)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list postings")
    }

    fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        Ok(JobPosting {
            id: row.get(0)?,
            title: row.get(1)?,
            company_id: row.get(2)?,
            company_name: row.get(3)?,
            company_url: row.get(4)?,
            company_size: parse_opt_column(row, 5)?,
            market: parse_column(row, 6)?,
            source_id: row.get(7)?,
            source_name: row.get(8)?,
            link: row.get(9)?,
            posted_date: row.get(10)?,
            posted_date_provenance: parse_column(row, 11)?,
            location: row.get(12)?,
            job_type: parse_column(row, 13)?,
            is_technical: row.get(14)?,
            category_confidence: row.get(15)?,
            description: row.get(16)?,
            salary: row.get(17)?,
            created_at: row.get(18)?,
        })
    }

    // --- Decision-maker operations ---

    /// Stores `contacts` unless the company already has decision makers.
    /// Returns the number inserted.
    pub fn insert_decision_makers(&self, company_id: i64, contacts: &[ContactCandidate]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM decision_makers WHERE company_id = ?1",
            [company_id],
            |row| row.get(0),
        )?;
        if existing > 0 || contacts.is_empty() {
            return Ok(0);
        }

        for contact in contacts {
            tx.execute(
                "INSERT INTO decision_makers
                    (company_id, name, title, linkedin, email, phone, is_primary, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    company_id,
                    contact.name,
                    contact.title,
                    contact.linkedin,
                    contact.email,
                    contact.phone,
                    contact.is_primary,
                    contact.provenance.as_str()
                ],
            )?;
        }
        tx.commit()?;
        Ok(contacts.len())
    }

    pub fn decision_makers_for(&self, company_id: i64) -> Result<Vec<DecisionMaker>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, name, title, linkedin, email, phone, is_primary, provenance,
                    created_at
             FROM decision_makers WHERE company_id = ?1
             ORDER BY is_primary DESC, id",
        )?;
        let rows = stmt.query_map([company_id], |row| {
            Ok(DecisionMaker {
                id: row.get(0)?,
                company_id: row.get(1)?,
                name: row.get(2)?,
                title: row.get(3)?,
                linkedin: row.get(4)?,
                email: row.get(5)?,
                phone: row.get(6)?,
                is_primary: row.get(7)?,
                provenance: parse_column(row, 8)?,
                created_at: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list decision makers")
    }

    // --- Run log operations ---

    pub fn create_run(&self, parameters_json: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO run_logs (status, parameters) VALUES ('started', ?1)",
            [parameters_json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_run_status(&self, id: i64, status: RunStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE run_logs SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    pub fn update_run_counts(&self, id: i64, counts: &RunCounts) -> Result<()> {
        self.conn.execute(
            "UPDATE run_logs SET postings_found = ?1, companies_found = ?2, contacts_found = ?3,
                units_total = ?4, units_done = ?5, units_blocked = ?6, units_failed = ?7
             WHERE id = ?8",
            params![
                counts.postings_found,
                counts.companies_found,
                counts.contacts_found,
                counts.units_total,
                counts.units_done,
                counts.units_blocked,
                counts.units_failed,
                id
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, id: i64, status: RunStatus, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE run_logs SET status = ?1, error = ?2, finished_at = datetime('now')
             WHERE id = ?3",
            params![status.as_str(), error, id],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: i64) -> Result<Option<RunLog>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM run_logs WHERE id = ?1", RUN_COLUMNS),
                [id],
                Self::row_to_run,
            )
            .optional()
            .context("Failed to load run")
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunLog>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_logs ORDER BY id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([limit as i64], Self::row_to_run)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list runs")
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<RunLog> {
        Ok(RunLog {
            id: row.get(0)?,
            status: parse_column(row, 1)?,
            postings_found: row.get(2)?,
            companies_found: row.get(3)?,
            contacts_found: row.get(4)?,
            units_total: row.get(5)?,
            units_done: row.get(6)?,
            units_blocked: row.get(7)?,
            units_failed: row.get(8)?,
            parameters: row.get(9)?,
            started_at: row.get(10)?,
            finished_at: row.get(11)?,
            error: row.get(12)?,
        })
    }
}

fn parse_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        t.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::CompanyEnricher;
    use crate::registry::SourceRegistry;
    use std::cell::Cell;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn source_id(db: &Database, name: &str) -> i64 {
        let registry = SourceRegistry::builtin();
        db.upsert_source(registry.get(name).unwrap()).unwrap().0
    }

    fn posting(title: &str, company_id: i64, source_id: i64) -> NewPosting {
        NewPosting {
            title: title.to_string(),
            company_id,
            market: Market::Usa,
            source_id,
            link: format!("https://jobs.example.com/{}", title.replace(' ', "-")),
            posted_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            posted_date_provenance: Provenance::Observed,
            location: Some("Remote".into()),
            job_type: JobType::Remote,
            is_technical: true,
            category_confidence: 0.8,
            description: None,
            salary: Some("$120k".into()),
        }
    }

    #[test]
    fn test_init_is_idempotent_and_required() {
        let fresh = Database::open_in_memory().unwrap();
        assert!(fresh.ensure_initialized().is_err());
        fresh.init().unwrap();
        fresh.init().unwrap();
        fresh.ensure_initialized().unwrap();
    }

    #[test]
    fn test_open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobsweep.db");
        let db = Database::open_at(&path).unwrap();
        db.init().unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), &path);
    }

    #[test]
    fn test_company_enriched_once() {
        let db = db();
        let enricher = CompanyEnricher::with_seed(9);
        let calls = Cell::new(0);
        let enrich = |name: &str| {
            calls.set(calls.get() + 1);
            enricher.enrich(name)
        };

        let (first, created) = db.get_or_create_company("Acme Robotics", enrich).unwrap();
        assert!(created);
        assert_eq!(first.provenance, Provenance::Inferred);
        assert!(first.size_bracket.is_some());
        assert!(first.enrichment_basis.as_deref().unwrap().contains("\"slug\""));

        for name in ["acme robotics", "  ACME Robotics "] {
            let (again, created) = db
                .get_or_create_company(name, |n| {
                    calls.set(calls.get() + 1);
                    enricher.enrich(n)
                })
                .unwrap();
            assert!(!created);
            assert_eq!(again.id, first.id);
            assert_eq!(again.url, first.url);
        }
        assert_eq!(calls.get(), 1);
        assert!(db.get_or_create_company("   ", |n| enricher.enrich(n)).is_err());
    }

    #[test]
    fn test_posting_identity_is_unique() {
        let db = db();
        let enricher = CompanyEnricher::with_seed(1);
        let (company, _) = db.get_or_create_company("Initech", |n| enricher.enrich(n)).unwrap();
        let indeed = source_id(&db, "Indeed US");
        let dice = source_id(&db, "Dice");

        let first = db.persist_posting(&posting("Rust Engineer", company.id, indeed)).unwrap();
        let PersistOutcome::Persisted(stored) = first else {
            panic!("expected a new posting");
        };
        assert_eq!(stored.company_name, "Initech");
        assert_eq!(stored.company_url, company.url);
        assert_eq!(stored.company_size, company.size_bracket);
        assert_eq!(stored.market, Market::Usa);
        assert_eq!(stored.source_name, "Indeed US");
        assert_eq!(stored.job_type, JobType::Remote);

        // Same title, company and source: nothing written.
        let again = db.persist_posting(&posting("Rust Engineer", company.id, indeed)).unwrap();
        assert!(matches!(again, PersistOutcome::AlreadyExists));

        // Another source is another posting.
        let other = db.persist_posting(&posting("Rust Engineer", company.id, dice)).unwrap();
        assert!(matches!(other, PersistOutcome::Persisted(_)));

        assert_eq!(db.list_postings(&PostingFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_list_postings_filters() {
        let db = db();
        let enricher = CompanyEnricher::with_seed(1);
        let (company, _) = db.get_or_create_company("Hooli", |n| enricher.enrich(n)).unwrap();
        let reed = source_id(&db, "Reed");

        let mut uk = posting("Marketing Manager", company.id, reed);
        uk.market = Market::Uk;
        uk.is_technical = false;
        uk.posted_date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        db.persist_posting(&uk).unwrap();
        db.persist_posting(&posting("Data Engineer", company.id, reed)).unwrap();

        let only_uk = db
            .list_postings(&PostingFilter {
                market: Some(Market::Uk),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_uk.len(), 1);
        assert_eq!(only_uk[0].title, "Marketing Manager");

        let technical = db
            .list_postings(&PostingFilter {
                is_technical: Some(true),
                source: Some("reed".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(technical.len(), 1);
        assert_eq!(technical[0].title, "Data Engineer");

        let recent = db
            .list_postings(&PostingFilter {
                posted_since: NaiveDate::from_ymd_opt(2024, 2, 15),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);

        let limited = db
            .list_postings(&PostingFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited[0].title, "Data Engineer");
    }

    #[test]
    fn test_decision_makers_inserted_only_once() {
        let db = db();
        let enricher = CompanyEnricher::with_seed(1);
        let (company, _) = db.get_or_create_company("Globex", |n| enricher.enrich(n)).unwrap();
        let contact = |name: &str, primary: bool| ContactCandidate {
            name: name.to_string(),
            title: "CTO".into(),
            linkedin: None,
            email: Some("x@globex.com".into()),
            phone: None,
            is_primary: primary,
            provenance: Provenance::Observed,
        };

        let inserted = db
            .insert_decision_makers(company.id, &[contact("Hank Scorpio", true), contact("Frank Grimes", false)])
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(
            db.insert_decision_makers(company.id, &[contact("Homer Simpson", true)]).unwrap(),
            0
        );

        let stored = db.decision_makers_for(company.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].is_primary);
        assert_eq!(stored[0].first_and_last(), ("Hank", "Scorpio"));
        assert_eq!(stored[0].provenance, Provenance::Observed);
    }

    #[test]
    fn test_source_upsert_keeps_stored_flag() {
        let db = db();
        let mut registry = SourceRegistry::builtin();
        registry.sync(&db).unwrap();
        let total = registry.sources().len();
        assert_eq!(db.list_sources().unwrap().len(), total);

        assert!(db.set_source_active("glassdoor", false).unwrap());
        assert!(!db.set_source_active("No Such Board", false).unwrap());

        // A fresh registry says active, the database says otherwise.
        let mut registry = SourceRegistry::builtin();
        registry.sync(&db).unwrap();
        let glassdoor = registry.get("Glassdoor").unwrap();
        assert!(!glassdoor.active);
        assert!(glassdoor.id.is_some());
        assert_eq!(db.list_sources().unwrap().len(), total);
    }

    #[test]
    fn test_run_log_lifecycle() {
        let db = db();
        let id = db.create_run(r#"{"keywords":"rust"}"#).unwrap();
        let run = db.get_run(id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
        assert!(run.finished_at.is_none());

        db.set_run_status(id, RunStatus::InProgress).unwrap();
        let counts = RunCounts {
            postings_found: 6,
            companies_found: 3,
            contacts_found: 7,
            units_total: 3,
            units_done: 3,
            ..Default::default()
        };
        db.update_run_counts(id, &counts).unwrap();
        db.finish_run(id, RunStatus::Completed, None).unwrap();

        let run = db.get_run(id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.postings_found, 6);
        assert_eq!(run.units_done, 3);
        assert!(run.finished_at.is_some());

        let second = db.create_run("{}").unwrap();
        db.finish_run(second, RunStatus::Failed, Some("cancelled by operator")).unwrap();
        let runs = db.list_runs(10).unwrap();
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].error.as_deref(), Some("cancelled by operator"));
        assert!(db.get_run(999).unwrap().is_none());
    }
}
