use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

use crate::models::JobType;
use crate::registry::Source;

const DESCRIPTION_SELECTORS: &[&str] = &[
    "div.job-snippet",
    "div.summary",
    "div.job-description",
    "span.summary",
    r#"div[data-testid="job-description"]"#,
    "div.job-snippet-container",
];

const SALARY_SELECTORS: &[&str] = &[
    "span.salaryText",
    "div.salary",
    r#"span[data-testid="salary"]"#,
    "div.job-salary",
    "span.salary",
    r#"div[data-test="salary"]"#,
    "span.salary-snippet",
    "div.salary-snippet",
];

const MAX_DESCRIPTION_CHARS: usize = 500;

static SALARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:[$£€]\s?\d[\d,]*(?:\.\d{1,2})?\s?[kK]?(?:\s?(?:-|–|to)\s?[$£€]?\s?\d[\d,]*(?:\.\d{1,2})?\s?[kK]?)?(?:\s*(?:per|a|/)\s*(?:year|annum|hour|month|day|yr|hr))?|\d[\d,]*(?:\.\d{1,2})?(?:\s?-\s?\d[\d,]*(?:\.\d{1,2})?)?\s?(?:USD|GBP|EUR|per\s+year|per\s+annum|per\s+hour|per\s+month))",
    )
    .unwrap()
});

/// A count followed by its unit, e.g. "3 hours", "30+ days", "5h".
static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\+?\s*(minutes?|mins?|hours?|hrs?|days?|weeks?|wks?|months?|mo|m|h|d|w)\b").unwrap()
});

/// A unit without a count, read as one: "an hour ago", "a day ago".
static SINGLE_UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\ban?\s+(minute|hour|day|week|month)\b").unwrap());

static FRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:just posted|just now|today|new|moments ago)\b").unwrap()
});

static YESTERDAY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\byesterday\b").unwrap());

/// Counts above this (in any unit) are treated as noise.
const MAX_RELATIVE_COUNT: i64 = 100_000;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A posting as lifted from a results page, before any enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    /// Absolute URL, already resolved against the source's base URL.
    pub link: Option<String>,
    pub date_text: Option<String>,
    pub description: Option<String>,
    pub salary: Option<String>,
    pub source: String,
}

/// Applies the source's descriptor to `document`. Bad selectors or markup
/// give an empty list.
pub fn extract(document: &str, source: &Source) -> Vec<RawCandidate> {
    let descriptor = &source.descriptor;
    let container = match Selector::parse(&descriptor.container) {
        Ok(sel) => sel,
        Err(e) => {
            debug!(source = %source.name, selector = %descriptor.container, "bad container selector: {:?}", e);
            return vec![];
        }
    };

    let html = Html::parse_document(document);
    let base = Url::parse(&source.base_url).ok();
    let mut seen = HashSet::new();
    let mut candidates = vec![];

    for card in html.select(&container) {
        let Some(title) = first_text(&card, &descriptor.title) else {
            continue;
        };
        let Some(company) = first_text(&card, &descriptor.company) else {
            continue;
        };
        if !seen.insert((title.to_lowercase(), company.to_lowercase())) {
            continue;
        }

        let location = descriptor.location.as_deref().and_then(|s| first_text(&card, s));
        let link = find_link(&card, descriptor.link.as_deref())
            .and_then(|href| resolve_link(base.as_ref(), &href));
        let date_text = descriptor.date.as_deref().and_then(|s| first_date_text(&card, s));

        let description = match descriptor.description.as_deref() {
            Some(sel) => first_text(&card, sel),
            None => None,
        }
        .or_else(|| DESCRIPTION_SELECTORS.iter().find_map(|s| first_text(&card, s)))
        .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS));

        let salary = extract_salary(&card, descriptor.salary.as_deref());

        candidates.push(RawCandidate {
            title,
            company,
            location,
            link,
            date_text,
            description,
            salary,
            source: source.name.clone(),
        });
    }

    debug!(source = %source.name, count = candidates.len(), "extracted candidates");
    candidates
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

fn element_text(el: &ElementRef) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Text of the first element matching any selector in the comma list, tried
/// in list order. Falls back to the `title` attribute for icon-only nodes.
fn first_text(scope: &ElementRef, selectors: &str) -> Option<String> {
    for part in selectors.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Ok(sel) = Selector::parse(part) else {
            continue;
        };
        for el in scope.select(&sel) {
            let text = element_text(&el);
            if !text.is_empty() {
                return Some(text);
            }
            if let Some(attr) = el.value().attr("title") {
                let attr = collapse_whitespace(attr);
                if !attr.is_empty() {
                    return Some(attr);
                }
            }
        }
    }
    None
}

/// Prefers a machine-readable `datetime` attribute over visible text.
fn first_date_text(scope: &ElementRef, selectors: &str) -> Option<String> {
    for part in selectors.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Ok(sel) = Selector::parse(part) else {
            continue;
        };
        if let Some(el) = scope.select(&sel).next() {
            if let Some(dt) = el.value().attr("datetime") {
                return Some(dt.trim().to_string());
            }
            let text = element_text(&el);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn find_link(card: &ElementRef, selectors: Option<&str>) -> Option<String> {
    let anchor = Selector::parse("a[href]").ok()?;

    if let Some(selectors) = selectors {
        for part in selectors.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Ok(sel) = Selector::parse(part) else {
                continue;
            };
            for el in card.select(&sel) {
                if let Some(href) = el.value().attr("href") {
                    return Some(href.to_string());
                }
                if let Some(inner) = el.select(&anchor).next() {
                    return inner.value().attr("href").map(str::to_string);
                }
                // Title spans often sit inside the anchor.
                let mut parent = el.parent();
                while let Some(node) = parent {
                    if let Some(p) = ElementRef::wrap(node) {
                        if p.value().name() == "a" {
                            if let Some(href) = p.value().attr("href") {
                                return Some(href.to_string());
                            }
                        }
                        if p.id() == card.id() {
                            break;
                        }
                    }
                    parent = node.parent();
                }
            }
        }
    }

    if let Some(href) = card.value().attr("href") {
        return Some(href.to_string());
    }
    card.select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn resolve_link(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()),
    }
}

fn extract_salary(card: &ElementRef, selectors: Option<&str>) -> Option<String> {
    let from_selectors = selectors
        .and_then(|s| first_text(card, s))
        .or_else(|| {
            SALARY_SELECTORS
                .iter()
                .filter_map(|s| first_text(card, s))
                .find(|t| t.contains(['$', '£', '€']) || t.to_lowercase().contains("salary"))
        });
    if from_selectors.is_some() {
        return from_selectors;
    }

    let text = element_text(card);
    SALARY_RE.find(&text).map(|m| m.as_str().trim().to_string())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Interprets relative ("3 hours ago", "30+ days ago", "just posted") and
/// absolute date text. Returns `None` when nothing usable is found.
pub fn parse_posted_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if let Some(absolute) = parse_absolute(text.trim()) {
        return Some(absolute);
    }

    if FRESH_RE.is_match(&lower) {
        return Some(now);
    }
    if YESTERDAY_RE.is_match(&lower) {
        return now.checked_sub_signed(TimeDelta::days(1));
    }

    let (count, unit) = match RELATIVE_RE.captures(&lower) {
        Some(caps) => (caps[1].parse::<i64>().ok()?, caps[2].to_string()),
        None => {
            let caps = SINGLE_UNIT_RE.captures(&lower)?;
            (1, caps[1].to_string())
        }
    };
    if count > MAX_RELATIVE_COUNT {
        return None;
    }

    let delta = match unit.as_str() {
        "minute" | "minutes" | "min" | "mins" | "m" => TimeDelta::try_minutes(count),
        "hour" | "hours" | "hr" | "hrs" | "h" => TimeDelta::try_hours(count),
        "day" | "days" | "d" => TimeDelta::try_days(count),
        "week" | "weeks" | "wk" | "wks" | "w" => TimeDelta::try_weeks(count),
        "month" | "months" | "mo" => TimeDelta::try_days(count.checked_mul(30)?),
        _ => None,
    }?;
    now.checked_sub_signed(delta)
}

fn parse_absolute(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    for fmt in ["%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%B %d, %Y", "%b %d, %Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return date.and_hms_opt(12, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }
    None
}

static JOB_TYPE_RULES: LazyLock<Vec<(Regex, JobType)>> = LazyLock::new(|| {
    [
        (r"\bhybrid\b|\bpart[- ]remote\b|\bsome remote\b|\b\d-\d days? (?:in|on)[- ]site\b", JobType::Hybrid),
        (r"\bremote\b|\bwork from home\b|\bwfh\b|\bdistributed\b|\bvirtual\b", JobType::Remote),
        (r"\bfreelance\b|\bgig\b|\bproject[- ]based\b", JobType::Freelance),
        (r"\bcontract\b|\bcontractor\b|\bconsultant\b|\bfixed[- ]term\b", JobType::Contract),
        (r"\bintern\b|\binternship\b|\bplacement\b|\bgraduate scheme\b", JobType::Internship),
        (r"\btemporary\b|\btemp\b|\bseasonal\b", JobType::Temporary),
        (r"\bpart[- ]time\b", JobType::PartTime),
        (r"\bon[- ]site\b|\bonsite\b|\bin[- ]office\b", JobType::OnSite),
    ]
    .into_iter()
    .filter_map(|(pattern, job_type)| Regex::new(&format!("(?i){}", pattern)).ok().map(|re| (re, job_type)))
    .collect()
});

/// Job type from posting text when the run did not pin one. Rules are
/// checked in order; nothing matching means full time.
pub fn infer_job_type(candidate: &RawCandidate) -> JobType {
    let text = format!(
        "{} {} {}",
        candidate.title,
        candidate.location.as_deref().unwrap_or_default(),
        candidate.description.as_deref().unwrap_or_default()
    );
    JOB_TYPE_RULES
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, job_type)| *job_type)
        .unwrap_or(JobType::FullTime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::registry::{ExtractionDescriptor, MarketLocations};

    fn source(descriptor: ExtractionDescriptor) -> Source {
        Source {
            name: "Test Board".into(),
            base_url: "https://board.example.com".into(),
            search_template: "https://board.example.com/jobs?q={keyword}".into(),
            active: true,
            descriptor,
            locations: MarketLocations::default(),
            id: None,
        }
    }

    fn indeed_like() -> ExtractionDescriptor {
        ExtractionDescriptor {
            container: "div[data-jk]".into(),
            title: "h2.jobTitle a span[title]".into(),
            company: "span.companyName".into(),
            location: Some("div.companyLocation".into()),
            link: Some("h2.jobTitle a".into()),
            date: Some("span.date".into()),
            description: None,
            salary: None,
        }
    }

    const INDEED_PAGE: &str = r#"
        <html><body>
          <div data-jk="1">
            <h2 class="jobTitle"><a href="/viewjob?jk=1"><span title="Python Developer">Python   Developer</span></a></h2>
            <span class="companyName">Acme Corp</span>
            <div class="companyLocation">Austin, TX</div>
            <span class="date">Posted 3 days ago</span>
            <div class="job-snippet">Build <b>APIs</b> in Python and Django.</div>
            <div class="salary-snippet">$120,000 - $140,000 a year</div>
          </div>
          <div data-jk="2">
            <h2 class="jobTitle"><a href="https://elsewhere.example.org/job/2"><span title="Data Engineer"></span></a></h2>
            <span class="companyName">Globex</span>
          </div>
          <div data-jk="3">
            <h2 class="jobTitle"><a href="/viewjob?jk=3"><span>Orphan role</span></a></h2>
          </div>
          <div data-jk="4">
            <h2 class="jobTitle"><a href="/viewjob?jk=4"><span title="Python Developer">Python Developer</span></a></h2>
            <span class="companyName">acme corp</span>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_extracts_cards_and_skips_incomplete() {
        let candidates = extract(INDEED_PAGE, &source(indeed_like()));
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.title, "Python Developer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location.as_deref(), Some("Austin, TX"));
        assert_eq!(first.link.as_deref(), Some("https://board.example.com/viewjob?jk=1"));
        assert_eq!(first.date_text.as_deref(), Some("Posted 3 days ago"));
        assert_eq!(first.description.as_deref(), Some("Build APIs in Python and Django."));
        assert_eq!(first.salary.as_deref(), Some("$120,000 - $140,000 a year"));
        assert_eq!(first.source, "Test Board");
    }

    #[test]
    fn test_title_attribute_fallback_and_absolute_links() {
        let candidates = extract(INDEED_PAGE, &source(indeed_like()));
        let second = &candidates[1];
        assert_eq!(second.title, "Data Engineer");
        assert_eq!(second.link.as_deref(), Some("https://elsewhere.example.org/job/2"));
        assert_eq!(second.location, None);
    }

    #[test]
    fn test_comma_list_tries_selectors_in_order() {
        let page = r#"
            <ul><li class="card">
              <h3 class="base-search-card__title">Backend Engineer</h3>
              <h4 class="base-search-card__subtitle">Initech</h4>
              <a class="base-card__full-link" href="/jobs/view/99">view</a>
              <time datetime="2024-05-01">2 weeks ago</time>
            </li></ul>
        "#;
        let descriptor = ExtractionDescriptor {
            container: "li.card".into(),
            title: "a.job-title-link, h3.base-search-card__title".into(),
            company: "h4.base-search-card__subtitle, .job-search-card__subtitle".into(),
            location: None,
            link: Some("a.job-title-link, a.base-card__full-link".into()),
            date: Some("time".into()),
            description: None,
            salary: None,
        };
        let candidates = extract(page, &source(descriptor));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Backend Engineer");
        assert_eq!(candidates[0].link.as_deref(), Some("https://board.example.com/jobs/view/99"));
        assert_eq!(candidates[0].date_text.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_link_falls_back_to_first_anchor() {
        let page = r#"<div class="job"><h2>QA Lead</h2><p class="co">Hooli</p><a href="apply/7">Apply</a></div>"#;
        let descriptor = ExtractionDescriptor {
            container: "div.job".into(),
            title: "h2".into(),
            company: "p.co".into(),
            location: None,
            link: None,
            date: None,
            description: None,
            salary: None,
        };
        let candidates = extract(page, &source(descriptor));
        assert_eq!(candidates[0].link.as_deref(), Some("https://board.example.com/apply/7"));
    }

    #[test]
    fn test_invalid_selector_or_garbage_yields_nothing() {
        let mut descriptor = indeed_like();
        descriptor.container = "div[[[".into();
        assert!(extract(INDEED_PAGE, &source(descriptor)).is_empty());

        assert!(extract("<<<not html at all", &source(indeed_like())).is_empty());
        assert!(extract("", &source(indeed_like())).is_empty());
    }

    #[test]
    fn test_salary_from_card_text() {
        let page = r#"<div class="job"><h2>Analyst</h2><span class="co">Umbrella</span>
            <p>Pays £45,000 - £55,000 per year plus bonus</p></div>"#;
        let descriptor = ExtractionDescriptor {
            container: "div.job".into(),
            title: "h2".into(),
            company: ".co".into(),
            location: None,
            link: None,
            date: None,
            description: None,
            salary: None,
        };
        let candidates = extract(page, &source(descriptor));
        assert_eq!(candidates[0].salary.as_deref(), Some("£45,000 - £55,000 per year"));
    }

    #[test]
    fn test_description_is_capped() {
        let long = "word ".repeat(400);
        let page = format!(
            r#"<div class="job"><h2>Writer</h2><span class="co">Initrode</span><div class="summary">{}</div></div>"#,
            long
        );
        let descriptor = ExtractionDescriptor {
            container: "div.job".into(),
            title: "h2".into(),
            company: ".co".into(),
            location: None,
            link: None,
            date: None,
            description: None,
            salary: None,
        };
        let candidates = extract(&page, &source(descriptor));
        let desc = candidates[0].description.as_deref().unwrap();
        assert!(desc.chars().count() <= MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_parse_relative_dates() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(parse_posted_at("3 hours ago", now), Some(now - Duration::hours(3)));
        assert_eq!(parse_posted_at("Posted 2 days ago", now), Some(now - Duration::days(2)));
        assert_eq!(parse_posted_at("1 week ago", now), Some(now - Duration::weeks(1)));
        assert_eq!(parse_posted_at("30+ days ago", now), Some(now - Duration::days(30)));
        assert_eq!(parse_posted_at("Just posted", now), Some(now));
        assert_eq!(parse_posted_at("Today", now), Some(now));
        assert_eq!(parse_posted_at("5h", now), Some(now - Duration::hours(5)));
        assert_eq!(parse_posted_at("", now), None);
        assert_eq!(parse_posted_at("Featured", now), None);
        assert_eq!(parse_posted_at("an hour ago", now), Some(now - Duration::hours(1)));
        assert_eq!(parse_posted_at("Yesterday", now), Some(now - Duration::days(1)));
        assert_eq!(parse_posted_at("2 months ago", now), Some(now - Duration::days(60)));
    }

    #[test]
    fn test_count_is_read_next_to_its_unit() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(
            parse_posted_at("Ref 20240612 posted 2 days ago", now),
            Some(now - Duration::days(2))
        );
        assert_eq!(parse_posted_at("renewed 5 days ago", now), Some(now - Duration::days(5)));
        assert_eq!(parse_posted_at("New", now), Some(now));
    }

    #[test]
    fn test_huge_counts_are_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        assert_eq!(parse_posted_at("999999999999 days ago", now), None);
        assert_eq!(parse_posted_at("99999999999999999999999 hours ago", now), None);
        assert_eq!(parse_posted_at("100001 weeks ago", now), None);
    }

    #[test]
    fn test_parse_absolute_dates() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let parsed = parse_posted_at("2024-06-10", now).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());

        let parsed = parse_posted_at("2024-06-14T08:30:00Z", now).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 6, 14, 8, 30, 0).unwrap());

        let parsed = parse_posted_at("June 3, 2024", now).unwrap();
        assert_eq!(parsed.date_naive(), NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
    }

    fn candidate(title: &str, location: Option<&str>, description: Option<&str>) -> RawCandidate {
        RawCandidate {
            title: title.into(),
            company: "Acme".into(),
            location: location.map(Into::into),
            link: None,
            date_text: None,
            description: description.map(Into::into),
            salary: None,
            source: "x".into(),
        }
    }

    #[test]
    fn test_infer_job_type() {
        assert_eq!(infer_job_type(&candidate("Rust Engineer", Some("Remote"), None)), JobType::Remote);
        assert_eq!(
            infer_job_type(&candidate("Designer", Some("London"), Some("Hybrid, 2 days remote"))),
            JobType::Hybrid
        );
        assert_eq!(infer_job_type(&candidate("Contract Java Developer", None, None)), JobType::Contract);
        assert_eq!(infer_job_type(&candidate("Freelance Copywriter", None, None)), JobType::Freelance);
        assert_eq!(infer_job_type(&candidate("Summer Intern", None, None)), JobType::Internship);
        assert_eq!(infer_job_type(&candidate("Part-time Bookkeeper", None, None)), JobType::PartTime);
        assert_eq!(infer_job_type(&candidate("Accountant", Some("Leeds"), None)), JobType::FullTime);
        // "Remoteness" is not "remote".
        assert_eq!(infer_job_type(&candidate("Remoteness Analyst", None, None)), JobType::FullTime);
    }
}
