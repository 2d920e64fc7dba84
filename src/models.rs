use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "USA", alias = "US", alias = "usa")]
    Usa,
    #[serde(rename = "UK", alias = "GB", alias = "uk")]
    Uk,
}

impl Market {
    pub const ALL: [Market; 2] = [Market::Usa, Market::Uk];

    pub fn label(&self) -> &'static str {
        match self {
            Market::Usa => "USA",
            Market::Uk => "UK",
        }
    }

    /// Two-letter region code stored on postings.
    pub fn region_code(&self) -> &'static str {
        match self {
            Market::Usa => "US",
            Market::Uk => "GB",
        }
    }
}

impl FromStr for Market {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usa" | "us" | "united states" => Ok(Market::Usa),
            "uk" | "gb" | "united kingdom" => Ok(Market::Uk),
            _ => Err(ParseEnumError::new("market", s)),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
    Remote,
    Hybrid,
    OnSite,
    Freelance,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullTime => "full_time",
            JobType::PartTime => "part_time",
            JobType::Contract => "contract",
            JobType::Temporary => "temporary",
            JobType::Internship => "internship",
            JobType::Remote => "remote",
            JobType::Hybrid => "hybrid",
            JobType::OnSite => "on_site",
            JobType::Freelance => "freelance",
        }
    }
}

impl FromStr for JobType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "full_time" | "fulltime" => Ok(JobType::FullTime),
            "part_time" | "parttime" => Ok(JobType::PartTime),
            "contract" => Ok(JobType::Contract),
            "temporary" | "temp" => Ok(JobType::Temporary),
            "internship" | "intern" => Ok(JobType::Internship),
            "remote" => Ok(JobType::Remote),
            "hybrid" => Ok(JobType::Hybrid),
            "on_site" | "onsite" => Ok(JobType::OnSite),
            "freelance" => Ok(JobType::Freelance),
            _ => Err(ParseEnumError::new("job type", s)),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stored value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Observed,
    Inferred,
    Synthetic,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Observed => "observed",
            Provenance::Inferred => "inferred",
            Provenance::Synthetic => "synthetic",
        }
    }
}

impl FromStr for Provenance {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observed" => Ok(Provenance::Observed),
            "inferred" => Ok(Provenance::Inferred),
            "synthetic" => Ok(Provenance::Synthetic),
            _ => Err(ParseEnumError::new("provenance", s)),
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Company headcount bracket. Variants are declared smallest first so the
/// derived ordering follows headcount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeBracket {
    #[serde(rename = "1-50")]
    Micro,
    #[serde(rename = "51-200")]
    Small,
    #[serde(rename = "201-500")]
    Medium,
    #[serde(rename = "501-1000")]
    Large,
    #[serde(rename = "1001-5000")]
    Enterprise,
    #[serde(rename = "5001-50000")]
    Giant,
}

impl SizeBracket {
    pub const ALL: [SizeBracket; 6] = [
        SizeBracket::Micro,
        SizeBracket::Small,
        SizeBracket::Medium,
        SizeBracket::Large,
        SizeBracket::Enterprise,
        SizeBracket::Giant,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SizeBracket::Micro => "1-50",
            SizeBracket::Small => "51-200",
            SizeBracket::Medium => "201-500",
            SizeBracket::Large => "501-1000",
            SizeBracket::Enterprise => "1001-5000",
            SizeBracket::Giant => "5001-50000",
        }
    }

    /// Maps an enrichment size score onto a bracket. Every integer lands in
    /// exactly one bracket.
    pub fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=2 => SizeBracket::Micro,
            3..=4 => SizeBracket::Small,
            5 => SizeBracket::Medium,
            6 => SizeBracket::Large,
            7..=8 => SizeBracket::Enterprise,
            _ => SizeBracket::Giant,
        }
    }
}

impl FromStr for SizeBracket {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SizeBracket::ALL
            .into_iter()
            .find(|b| b.label() == s.trim())
            .ok_or_else(|| ParseEnumError::new("size bracket", s))
    }
}

impl fmt::Display for SizeBracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(RunStatus::Started),
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(ParseEnumError::new("run status", s)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub size_bracket: Option<SizeBracket>,
    pub industry: Option<String>,
    pub provenance: Provenance,
    pub enrichment_basis: Option<String>, // JSON
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: i64,
    pub title: String,
    pub company_id: i64,
    pub company_name: String, // denormalized for convenience
    pub company_url: Option<String>,
    pub company_size: Option<SizeBracket>,
    pub market: Market,
    pub source_id: i64,
    pub source_name: String,
    pub link: String,
    pub posted_date: NaiveDate,
    pub posted_date_provenance: Provenance,
    pub location: Option<String>,
    pub job_type: JobType,
    pub is_technical: bool,
    pub category_confidence: f64,
    pub description: Option<String>,
    pub salary: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionMaker {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub title: String,
    pub linkedin: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_primary: bool,
    pub provenance: Provenance,
    pub created_at: String,
}

impl DecisionMaker {
    /// Splits the stored name at the first space.
    pub fn first_and_last(&self) -> (&str, &str) {
        split_name(&self.name)
    }
}

pub fn split_name(name: &str) -> (&str, &str) {
    let name = name.trim();
    match name.split_once(' ') {
        Some((first, last)) => (first, last.trim()),
        None => (name, ""),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub id: i64,
    pub status: RunStatus,
    pub postings_found: i64,
    pub companies_found: i64,
    pub contacts_found: i64,
    pub units_total: i64,
    pub units_done: i64,
    pub units_blocked: i64,
    pub units_failed: i64,
    pub parameters: String, // JSON
    pub started_at: String,
    pub finished_at: Option<String>,
    pub error: Option<String>,
}

/// Keywords as supplied by the caller: one comma-separated string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keywords {
    One(String),
    Many(Vec<String>),
}

impl Keywords {
    /// Splits on commas, trims, and drops blanks and case-insensitive repeats.
    pub fn to_list(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Keywords::One(s) => s.split(',').collect(),
            Keywords::Many(v) => v.iter().flat_map(|s| s.split(',')).collect(),
        };
        let mut seen = std::collections::HashSet::new();
        raw.into_iter()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .filter(|k| seen.insert(k.to_lowercase()))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFilter {
    All,
    Named(String),
}

impl FromStr for SourceFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Ok(SourceFilter::All)
        } else {
            Ok(SourceFilter::Named(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParameters {
    pub keywords: Keywords,
    pub market: Market,
    /// `None` means "All": the job type is inferred from each posting.
    #[serde(default)]
    pub job_type: Option<JobType>,
    pub is_technical: bool,
    pub hours_back: u32,
    #[serde(default = "default_source_filter")]
    pub source_filter: SourceFilter,
}

fn default_source_filter() -> SourceFilter {
    SourceFilter::All
}

/// Query over stored postings, used by listing and export.
#[derive(Debug, Clone, Default)]
pub struct PostingFilter {
    pub market: Option<Market>,
    pub is_technical: Option<bool>,
    pub source: Option<String>,
    pub posted_since: Option<NaiveDate>,
    pub limit: Option<usize>,
}
