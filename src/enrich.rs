//! Inferred company metadata: website, headcount bracket and industry.
//!
//! Nothing here is looked up; every value is a heuristic guess derived from
//! the company name and a random source, and is stored with provenance
//! `inferred` plus the inputs that produced it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::{Provenance, SizeBracket};

const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "llc", "ltd", "corp", "corporation", "group", "holdings", "technologies", "solutions",
    "systems", "international", "worldwide", "global", "enterprises", "company", "co", "partners",
    "associates",
];

const TLDS: &[(&str, u32)] = &[
    (".com", 60),
    (".io", 10),
    (".co", 10),
    (".ai", 5),
    (".org", 5),
    (".net", 5),
    (".tech", 3),
    (".dev", 2),
];

/// `{n}` is the slug, `{t}` the TLD.
const URL_SHAPES: &[(&str, u32)] = &[
    ("https://www.{n}{t}", 70),
    ("https://{n}{t}", 10),
    ("https://get{n}{t}", 5),
    ("https://{n}hq{t}", 5),
    ("https://www.{n}app{t}", 10),
];

const ENTERPRISE_INDICATORS: &[&str] =
    &["global", "international", "worldwide", "holdings", "group", "corp"];
const STARTUP_INDICATORS: &[&str] = &[
    "labs", "ai", "tech", "digital", "innovations", "io", "robotics", "crypto", "blockchain",
    "systems", "software", "analytics",
];
const SMB_INDICATORS: &[&str] = &["services", "consulting", "agency", "studio", "partners", "associates"];

const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Technology", &["tech", "software", "digital", "cyber", "systems", "solutions", "code", "data", "info"]),
    ("AI & ML", &["ai", "machine", "learning", "neural", "intelligence", "deep", "cognitive"]),
    ("Finance", &["finance", "capital", "bank", "invest", "wealth", "money", "financial", "pay"]),
    ("Healthcare", &["health", "care", "medical", "pharma", "bio", "life", "therapeutic", "clinic"]),
    ("Marketing", &["marketing", "market", "media", "ads", "advertising", "seo", "brand", "content"]),
    ("E-commerce", &["shop", "commerce", "retail", "buy", "store", "goods", "marketplace"]),
    ("Education", &["edu", "learn", "academy", "school", "university", "college", "training"]),
    ("Manufacturing", &["mfg", "manufacturing", "factory", "production", "industrial", "make"]),
    ("Consulting", &["consult", "consulting", "advisory", "partners", "associates", "group"]),
    ("Real Estate", &["realty", "property", "estate", "housing", "home", "land", "space"]),
    ("Energy", &["energy", "power", "solar", "renewable", "electric", "oil", "gas"]),
    ("Transportation", &["transport", "logistics", "delivery", "shipping", "freight", "fleet"]),
    ("Hospitality", &["hotel", "hospitality", "travel", "tourism", "leisure", "vacation"]),
    (
        "Media & Entertainment",
        &["media", "entertainment", "game", "gaming", "stream", "video", "audio", "music"],
    ),
    ("Food & Beverage", &["food", "beverage", "restaurant", "catering", "kitchen", "meal", "drink"]),
];

const GENERAL_INDUSTRIES: &[&str] = &[
    "Technology",
    "Software Development",
    "Information Technology",
    "Financial Services",
    "Healthcare",
    "Retail",
    "E-commerce",
    "Marketing",
    "Consulting",
    "Manufacturing",
    "Education",
    "Telecommunications",
    "Media",
    "Entertainment",
    "Hospitality",
    "Transportation",
    "Real Estate",
    "Construction",
    "Energy",
    "Agriculture",
];

/// The inputs behind an enrichment, persisted as JSON next to the company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentBasis {
    pub slug: String,
    pub url_shape: Option<String>,
    pub tld: Option<String>,
    pub enterprise_indicators: Vec<String>,
    pub startup_indicators: Vec<String>,
    pub smb_indicators: Vec<String>,
    pub size_baseline: i32,
    pub size_score: i32,
    /// `Industry:keyword` pairs that matched the name.
    pub industry_matches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub url: Option<String>,
    pub size_bracket: SizeBracket,
    pub industry: String,
    pub provenance: Provenance,
    pub basis: EnrichmentBasis,
}

impl Enrichment {
    pub fn basis_json(&self) -> String {
        serde_json::to_string(&self.basis).unwrap_or_else(|_| "{}".to_string())
    }

    /// Domain part of the inferred URL, e.g. `acme.com`.
    #[cfg(test)]
    pub fn domain(&self) -> Option<String> {
        self.url.as_deref().and_then(domain_of)
    }
}

pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// Produces enrichments. Each company name gets its own random stream
/// derived from the enricher seed, so results do not depend on the order
/// in which companies are seen.
#[derive(Debug, Clone)]
pub struct CompanyEnricher {
    seed: u64,
}

impl CompanyEnricher {
    pub fn new() -> Self {
        Self {
            seed: rand::thread_rng().r#gen(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    pub fn enrich(&self, name: &str) -> Enrichment {
        let mut rng = StdRng::seed_from_u64(self.seed ^ name_hash(name));
        enrich_with(name, &mut rng)
    }
}

impl Default for CompanyEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable FNV-1a hash of the normalised name, used to derive per-company
/// random streams.
pub fn name_hash(name: &str) -> u64 {
    let text = name.trim().to_lowercase();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Enrich `name` drawing from `rng`. The draw order is fixed: size
/// baseline, TLD, URL shape, then industry.
pub fn enrich_with<R: Rng>(name: &str, rng: &mut R) -> Enrichment {
    let lower = name.to_lowercase();
    let words = name_words(&lower);

    let enterprise = matched(ENTERPRISE_INDICATORS, &words);
    let startup = matched(STARTUP_INDICATORS, &words);
    let smb = matched(SMB_INDICATORS, &words);
    let baseline = rng.gen_range(1..=10);
    let score = baseline + 3 * enterprise.len() as i32 - 2 * smb.len() as i32 + startup.len() as i32;

    let slug = company_slug(name);
    let (url, url_shape, tld) = if slug.is_empty() {
        (None, None, None)
    } else {
        let tld = weighted_pick(rng, TLDS);
        let shape = weighted_pick(rng, URL_SHAPES);
        let url = shape.replace("{n}", &slug).replace("{t}", tld);
        (Some(url), Some(shape.to_string()), Some(tld.to_string()))
    };

    let (industry, industry_matches) = infer_industry(&words, rng);

    Enrichment {
        url,
        size_bracket: SizeBracket::from_score(score),
        industry,
        provenance: Provenance::Inferred,
        basis: EnrichmentBasis {
            slug,
            url_shape,
            tld,
            enterprise_indicators: enterprise,
            startup_indicators: startup,
            smb_indicators: smb,
            size_baseline: baseline,
            size_score: score,
            industry_matches,
        },
    }
}

fn name_words(lower: &str) -> Vec<&str> {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Short keywords must match a whole word; longer ones may prefix a word
/// ("invest" matches "investments").
fn keyword_hits(keyword: &str, words: &[&str]) -> bool {
    if keyword.len() <= 3 {
        words.iter().any(|w| *w == keyword)
    } else {
        words.iter().any(|w| w.starts_with(keyword))
    }
}

fn matched(indicators: &[&str], words: &[&str]) -> Vec<String> {
    indicators
        .iter()
        .filter(|k| keyword_hits(k, words))
        .map(|k| k.to_string())
        .collect()
}

/// Lowercase alphanumeric slug with trailing corporate suffix words removed.
pub fn company_slug(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut words = name_words(&lower);
    while words.len() > 1 && words.last().is_some_and(|w| CORPORATE_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.concat()
}

fn weighted_pick<'a, R: Rng>(rng: &mut R, table: &[(&'a str, u32)]) -> &'a str {
    let total: u32 = table.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total.max(1));
    for (value, weight) in table {
        if roll < *weight {
            return value;
        }
        roll -= weight;
    }
    table.first().map(|(v, _)| *v).unwrap_or_default()
}

fn infer_industry<R: Rng>(words: &[&str], rng: &mut R) -> (String, Vec<String>) {
    let mut scored: Vec<(&str, usize)> = vec![];
    let mut matches = vec![];
    for (industry, keywords) in INDUSTRY_KEYWORDS {
        let hits: Vec<&str> = keywords.iter().copied().filter(|k| keyword_hits(k, words)).collect();
        if !hits.is_empty() {
            matches.extend(hits.iter().map(|k| format!("{}:{}", industry, k)));
            scored.push((industry, hits.len()));
        }
    }
    // Stable sort keeps declaration order among equal scores.
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let industry = match scored.as_slice() {
        [] => GENERAL_INDUSTRIES[rng.gen_range(0..GENERAL_INDUSTRIES.len())].to_string(),
        [(only, _)] => only.to_string(),
        [(first, _), (second, _), ..] => {
            if rng.gen_bool(0.5) {
                format!("{} & {}", first, second)
            } else {
                first.to_string()
            }
        }
    };
    (industry, matches)
}
