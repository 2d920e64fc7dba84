use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db::Database;
use crate::error::RunError;
use crate::models::{Market, SourceFilter};
use crate::portals;

/// CSS selectors used to pull postings out of a source's result page.
/// Any selector may be a comma list; the first non-empty match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDescriptor {
    pub container: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub salary: Option<String>,
}

/// Values substituted for `{location}` in a search template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketLocations {
    pub usa: String,
    pub uk: String,
}

impl Default for MarketLocations {
    fn default() -> Self {
        Self {
            usa: "United States".to_string(),
            uk: "United Kingdom".to_string(),
        }
    }
}

impl MarketLocations {
    pub fn for_market(&self, market: Market) -> &str {
        match market {
            Market::Usa => &self.usa,
            Market::Uk => &self.uk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub base_url: String,
    /// URL with `{keyword}`, `{location}`, `{days}`, `{hours}` and
    /// `{seconds}` placeholders.
    pub search_template: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub descriptor: ExtractionDescriptor,
    #[serde(default)]
    pub locations: MarketLocations,
    #[serde(skip)]
    pub id: Option<i64>,
}

fn default_active() -> bool {
    true
}

/// One keyword searched on one market over a time window.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keyword: String,
    pub market: Market,
    pub hours_back: u32,
}

impl Source {
    pub fn search_url(&self, query: &SearchQuery) -> String {
        let hours = query.hours_back.max(1);
        let days = hours.div_ceil(24);
        self.search_template
            .replace("{keyword}", &urlencoding::encode(query.keyword.trim()))
            .replace(
                "{location}",
                &urlencoding::encode(self.locations.for_market(query.market)),
            )
            .replace("{days}", &days.to_string())
            .replace("{hours}", &hours.to_string())
            .replace("{seconds}", &(u64::from(hours) * 3600).to_string())
    }
}

#[derive(Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<Source>,
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: portals::builtin_sources(),
        }
    }

    pub fn from_sources(sources: Vec<Source>) -> Self {
        let mut registry = Self { sources: vec![] };
        registry.merge(sources);
        registry
    }

    /// Built-in table, then the optional sources file, then inline
    /// `[[sources]]` from settings. Later entries replace earlier ones by name.
    pub fn from_settings(settings: &Settings) -> Result<Self, RunError> {
        let mut registry = Self::builtin();
        if let Some(path) = &settings.sources_file {
            registry.merge(Self::read_file(path)?);
        }
        registry.merge(settings.sources.clone());
        registry.validate()?;
        Ok(registry)
    }

    fn read_file(path: &Path) -> Result<Vec<Source>, RunError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RunError::Registry(format!("{}: {}", path.display(), e)))?;
        let file: SourcesFile = toml::from_str(&text)
            .map_err(|e| RunError::Registry(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), count = file.sources.len(), "read sources file");
        Ok(file.sources)
    }

    pub fn merge(&mut self, overrides: Vec<Source>) {
        for source in overrides {
            match self
                .sources
                .iter_mut()
                .find(|s| s.name.eq_ignore_ascii_case(&source.name))
            {
                Some(existing) => *existing = source,
                None => self.sources.push(source),
            }
        }
    }

    fn validate(&self) -> Result<(), RunError> {
        if self.sources.is_empty() {
            return Err(RunError::Registry("no sources configured".into()));
        }
        for source in &self.sources {
            if url::Url::parse(&source.base_url).is_err() {
                return Err(RunError::Registry(format!(
                    "source '{}' has an invalid base URL '{}'",
                    source.name, source.base_url
                )));
            }
            if !source.search_template.contains("{keyword}") {
                return Err(RunError::Registry(format!(
                    "search template for '{}' has no {{keyword}} placeholder",
                    source.name
                )));
            }
        }
        Ok(())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Closest known source name, for "did you mean" hints.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let wanted = name.trim().to_lowercase();
        self.sources
            .iter()
            .map(|s| (strsim::jaro_winkler(&wanted, &s.name.to_lowercase()), &s.name))
            .filter(|(score, _)| *score >= 0.75)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, name)| name.clone())
    }

    /// Sources a run should visit.
    pub fn resolve(&self, filter: &SourceFilter) -> Result<Vec<Source>, RunError> {
        match filter {
            SourceFilter::All => {
                let active: Vec<Source> = self.sources.iter().filter(|s| s.active).cloned().collect();
                if active.is_empty() {
                    return Err(RunError::Registry("no active sources".into()));
                }
                Ok(active)
            }
            SourceFilter::Named(name) => match self.get(name) {
                Some(source) => {
                    if !source.active {
                        warn!(source = %source.name, "source is disabled but was requested by name");
                    }
                    Ok(vec![source.clone()])
                }
                None => Err(RunError::UnknownSource {
                    name: name.clone(),
                    suggestion: self.suggest(name),
                }),
            },
        }
    }

    /// Upserts every source into the database and picks up stored ids and
    /// activation flags.
    pub fn sync(&mut self, db: &Database) -> Result<()> {
        for source in &mut self.sources {
            let (id, active) = db.upsert_source(source)?;
            source.id = Some(id);
            source.active = active;
        }
        info!(count = self.sources.len(), "synced source registry");
        Ok(())
    }
}
