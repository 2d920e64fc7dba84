//! Flat row projection of postings joined with their company contacts, and
//! the CSV writer built on it.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::categorizer::Category;
use crate::db::Database;
use crate::models::{DecisionMaker, JobPosting, Market, PostingFilter};

/// One output row. Field order matches [`HEADERS`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub field: String,
    pub posted_date: String,
    pub job_title: String,
    pub company: String,
    pub company_url: String,
    pub company_size: String,
    pub job_link: String,
    pub job_portal: String,
    pub location: String,
    pub dm_first_name: String,
    pub dm_last_name: String,
    pub dm_title: String,
    pub linkedin: String,
    pub email: String,
    pub phone: String,
    pub contact_provenance: String,
}

/// One row per contact, or a single row with blank contact fields when
/// the company has none.
pub fn rows_for(posting: &JobPosting, contacts: &[DecisionMaker]) -> Vec<ExportRow> {
    let base = ExportRow {
        field: Category {
            is_technical: posting.is_technical,
            confidence: posting.category_confidence,
        }
        .label()
        .to_string(),
        posted_date: posting.posted_date.format("%Y-%m-%d").to_string(),
        job_title: posting.title.clone(),
        company: posting.company_name.clone(),
        company_url: posting.company_url.clone().unwrap_or_default(),
        company_size: posting
            .company_size
            .map(|s| s.label().to_string())
            .unwrap_or_default(),
        job_link: posting.link.clone(),
        job_portal: posting.source_name.clone(),
        location: posting.location.clone().unwrap_or_default(),
        dm_first_name: String::new(),
        dm_last_name: String::new(),
        dm_title: String::new(),
        linkedin: String::new(),
        email: String::new(),
        phone: String::new(),
        contact_provenance: String::new(),
    };

    if contacts.is_empty() {
        return vec![base];
    }
    contacts
        .iter()
        .map(|dm| {
            let (first, last) = dm.first_and_last();
            ExportRow {
                dm_first_name: first.to_string(),
                dm_last_name: last.to_string(),
                dm_title: dm.title.clone(),
                linkedin: dm.linkedin.clone().unwrap_or_default(),
                email: dm.email.clone().unwrap_or_default(),
                phone: dm.phone.clone().unwrap_or_default(),
                contact_provenance: dm.provenance.to_string(),
                ..base.clone()
            }
        })
        .collect()
}

pub fn collect_rows(db: &Database, filter: &PostingFilter) -> Result<Vec<ExportRow>> {
    let postings = db.list_postings(filter)?;
    let mut contacts: HashMap<i64, Vec<DecisionMaker>> = HashMap::new();
    let mut rows = vec![];
    for posting in &postings {
        if !contacts.contains_key(&posting.company_id) {
            let found = db.decision_makers_for(posting.company_id)?;
            contacts.insert(posting.company_id, found);
        }
        let company_contacts = contacts
            .get(&posting.company_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        rows.extend(rows_for(posting, company_contacts));
    }
    Ok(rows)
}

/// Writes a header and `rows`. The header is written even with no rows.
pub fn write_csv<W: Write>(writer: W, rows: &[ExportRow]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    csv_writer.write_record(HEADERS)?;
    for row in rows {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub const HEADERS: [&str; 16] = [
    "Field",
    "Posted Date",
    "Job Title",
    "Company",
    "Company URL",
    "Company Size",
    "Job Link",
    "Job Portal",
    "Location",
    "Decision-Maker First Name",
    "Last Name",
    "Title",
    "LinkedIn",
    "Email",
    "Phone",
    "Contact Provenance",
];

/// Exports matching postings to `path`. Returns the number of rows written.
pub fn export_to_path(db: &Database, filter: &PostingFilter, path: &Path) -> Result<usize> {
    let rows = collect_rows(db, filter)?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(file, &rows)?;
    info!(path = %path.display(), rows = rows.len(), "exported");
    Ok(rows.len())
}

/// One file per market and category next to `path`, e.g. `jobs_usa_technical.csv`.
/// Combinations excluded by `filter` are skipped.
pub fn export_split(db: &Database, filter: &PostingFilter, path: &Path) -> Result<Vec<(PathBuf, usize)>> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jobs".to_string());
    let dir = path.parent().unwrap_or(Path::new(""));

    let mut written = vec![];
    for market in Market::ALL {
        if filter.market.is_some_and(|m| m != market) {
            continue;
        }
        for technical in [true, false] {
            if filter.is_technical.is_some_and(|t| t != technical) {
                continue;
            }
            let part = PostingFilter {
                market: Some(market),
                is_technical: Some(technical),
                ..filter.clone()
            };
            let category = if technical { "technical" } else { "non_technical" };
            let file = dir.join(format!(
                "{}_{}_{}.csv",
                stem,
                market.label().to_lowercase(),
                category
            ));
            let count = export_to_path(db, &part, &file)?;
            written.push((file, count));
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::ContactCandidate;
    use crate::db::NewPosting;
    use crate::enrich::CompanyEnricher;
    use crate::models::{JobType, Provenance, SizeBracket};
    use crate::registry::SourceRegistry;
    use chrono::NaiveDate;

    fn posting() -> JobPosting {
        JobPosting {
            id: 1,
            title: "Backend Engineer".into(),
            company_id: 7,
            company_name: "Acme".into(),
            company_url: Some("https://www.acme.com".into()),
            company_size: Some(SizeBracket::Small),
            market: Market::Usa,
            source_id: 1,
            source_name: "Dice".into(),
            link: "https://www.dice.com/job/1".into(),
            posted_date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            posted_date_provenance: Provenance::Observed,
            location: Some("Austin, TX".into()),
            job_type: JobType::FullTime,
            is_technical: true,
            category_confidence: 0.9,
            description: None,
            salary: None,
            created_at: String::new(),
        }
    }

    fn contact(name: &str, title: &str, provenance: Provenance) -> DecisionMaker {
        DecisionMaker {
            id: 0,
            company_id: 7,
            name: name.into(),
            title: title.into(),
            linkedin: None,
            email: Some("someone@acme.com".into()),
            phone: None,
            is_primary: false,
            provenance,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_one_row_per_contact() {
        let contacts = vec![
            contact("Jane Doe", "CTO", Provenance::Observed),
            contact("Mary Anne Smith", "CEO", Provenance::Observed),
            contact("Bob Lee", "VP Engineering", Provenance::Synthetic),
        ];
        let rows = rows_for(&posting(), &contacts);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.job_title == "Backend Engineer" && r.field == "Technical"));
        assert_eq!(rows[1].dm_first_name, "Mary");
        assert_eq!(rows[1].dm_last_name, "Anne Smith");
        assert_eq!(rows[2].contact_provenance, "synthetic");
        assert_eq!(rows[0].company_size, "51-200");
        assert_eq!(rows[0].posted_date, "2024-05-06");
    }

    #[test]
    fn test_no_contacts_gives_one_blank_row() {
        let rows = rows_for(&posting(), &[]);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.company, "Acme");
        for blank in [&row.dm_first_name, &row.dm_last_name, &row.dm_title, &row.email, &row.phone] {
            assert!(blank.is_empty());
        }
    }

    #[test]
    fn test_csv_columns_in_order() {
        let mut out = vec![];
        write_csv(&mut out, &rows_for(&posting(), &[])).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert_eq!(header, HEADERS.join(","));
        assert!(header.contains(",Location,Decision-Maker First Name,Last Name,Title,LinkedIn,Email,Phone,Contact Provenance"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("Technical,2024-05-06,Backend Engineer,Acme,https://www.acme.com,51-200,"));
        assert!(row.contains("\"Austin, TX\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_split_export_writes_each_market_and_category() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let mut registry = SourceRegistry::builtin();
        registry.sync(&db).unwrap();
        let reed = registry.get("Reed").unwrap().id.unwrap();
        let enricher = CompanyEnricher::with_seed(3);
        let (company, _) = db.get_or_create_company("Acme", |n| enricher.enrich(n)).unwrap();
        db.insert_decision_makers(
            company.id,
            &[ContactCandidate {
                name: "Jane Doe".into(),
                title: "CTO".into(),
                linkedin: None,
                email: None,
                phone: None,
                is_primary: true,
                provenance: Provenance::Observed,
            }],
        )
        .unwrap();

        for (title, market, technical) in [
            ("Rust Engineer", Market::Uk, true),
            ("Brand Manager", Market::Uk, false),
            ("Go Developer", Market::Usa, true),
        ] {
            db.persist_posting(&NewPosting {
                title: title.into(),
                company_id: company.id,
                market,
                source_id: reed,
                link: "https://www.reed.co.uk/jobs/1".into(),
                posted_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                posted_date_provenance: Provenance::Inferred,
                location: None,
                job_type: JobType::FullTime,
                is_technical: technical,
                category_confidence: 0.8,
                description: None,
                salary: None,
            })
            .unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let written = export_split(&db, &PostingFilter::default(), &dir.path().join("jobs.csv")).unwrap();
        assert_eq!(written.len(), 4);
        let counts: HashMap<String, usize> = written
            .iter()
            .map(|(p, n)| (p.file_name().unwrap().to_string_lossy().into_owned(), *n))
            .collect();
        assert_eq!(counts["jobs_uk_technical.csv"], 1);
        assert_eq!(counts["jobs_uk_non_technical.csv"], 1);
        assert_eq!(counts["jobs_usa_technical.csv"], 1);
        assert_eq!(counts["jobs_usa_non_technical.csv"], 0);

        let empty = std::fs::read_to_string(dir.path().join("jobs_usa_non_technical.csv")).unwrap();
        assert_eq!(empty.lines().count(), 1);

        let only_uk = PostingFilter {
            market: Some(Market::Uk),
            ..Default::default()
        };
        assert_eq!(export_split(&db, &only_uk, &dir.path().join("uk.csv")).unwrap().len(), 2);
    }
}
