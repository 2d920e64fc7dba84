//! Decision-maker discovery for a company.
//!
//! Contacts are read from the company's own site when possible. When
//! nothing usable is found, and the fallback is enabled, a small set of
//! placeholder contacts is generated and tagged `synthetic`.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::config::ContactSettings;
use crate::enrich::{company_slug, domain_of, name_hash};
use crate::extractor::collapse_whitespace;
use crate::fetcher::Fetcher;
use crate::models::{Company, Market, Provenance, SizeBracket};

const MAX_CONTACTS: usize = 5;

const TEAM_LINK_WORDS: &[&str] = &[
    "team", "about", "about-us", "leadership", "management", "our-team", "people", "staff",
];

const CONTAINER_SELECTOR: &str = ".team-member, .team_member, .team_item, .team-item, .person, \
     .member, .employee, .staff, .executive, .leader, .leadership, .person-card, .bio, .profile, \
     [data-team-member], [data-member]";
const NAME_SELECTOR: &str = ".name, .team-name, .team-member-name, h3, h4";
const TITLE_SELECTOR: &str = ".title, .position, .role, .job-title, .job_title, p";

const C_LEVEL_TITLES: &[&str] = &[
    "CEO", "CTO", "CFO", "COO", "CMO", "CIO", "CHRO", "CCO", "CDO", "CSO", "CPO",
];

/// Words that show a "name" is really navigation or boilerplate.
const GENERIC_WORDS: &[&str] = &[
    "contact", "us", "touch", "support", "info", "customer", "service", "help", "desk", "address",
    "phone", "email", "mobile", "office", "headquarters", "inquiry", "sales", "admin", "webmaster",
    "career", "careers", "job", "jobs", "opening", "team", "staff", "member", "department",
    "feedback", "question", "faq", "home", "about", "product", "privacy", "policy", "terms",
    "copyright", "rights", "reserved", "sitemap", "login", "register", "sign", "up", "our", "meet",
    "the", "read", "more", "view", "profile", "leadership", "management", "board",
];

const FIRST_NAMES: &[&str] = &[
    "John", "Sarah", "Michael", "Emily", "David", "Lisa", "James", "Anna", "Robert", "Maria",
    "Chris", "Jennifer", "Mark", "Jessica", "Daniel", "Ashley", "Matthew", "Amanda", "Anthony",
    "Stephanie", "Ryan", "Nicole", "Kevin", "Lauren", "Brian", "Michelle", "Jason", "Kimberly",
    "William", "Elizabeth", "Richard", "Patricia", "Charles", "Susan", "Thomas", "Linda",
    "Christopher", "Barbara", "Paul", "Helen", "Andrew", "Sandra", "Joshua", "Donna", "George",
    "Sharon", "Timothy", "Carol", "Edward", "Laura",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Jones", "Brown", "Davis", "Miller", "Wilson", "Moore",
    "Taylor", "Anderson", "Thomas", "Jackson", "White", "Harris", "Martin", "Thompson", "Garcia",
    "Martinez", "Robinson", "Clark", "Rodriguez", "Lewis", "Lee", "Walker", "Hall", "Allen",
    "Young", "Hernandez", "King", "Wright", "Lopez", "Hill", "Scott", "Green", "Adams", "Baker",
    "Gonzalez", "Nelson", "Carter", "Mitchell", "Perez", "Roberts", "Turner", "Phillips",
    "Campbell", "Parker", "Evans", "Edwards", "Collins",
];

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());

/// "Jane Smith, CEO" or "CEO Jane Smith".
static C_LEVEL_RES: LazyLock<Vec<(&'static str, Regex, Regex)>> = LazyLock::new(|| {
    C_LEVEL_TITLES
        .iter()
        .map(|title| {
            let after = Regex::new(&format!(r"\b([A-Z][a-z]+ [A-Z][a-z]+),?\s+{}\b", title)).unwrap();
            let before = Regex::new(&format!(r"\b{}\s+([A-Z][a-z]+ [A-Z][a-z]+)\b", title)).unwrap();
            (*title, after, before)
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq)]
pub struct ContactCandidate {
    pub name: String,
    pub title: String,
    pub linkedin: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_primary: bool,
    pub provenance: Provenance,
}

pub struct ContactFinder {
    fetcher: Arc<Fetcher>,
    settings: ContactSettings,
    seed: u64,
}

impl ContactFinder {
    pub fn new(fetcher: Arc<Fetcher>, settings: ContactSettings) -> Self {
        Self::with_seed(fetcher, settings, rand::thread_rng().r#gen())
    }

    pub fn with_seed(fetcher: Arc<Fetcher>, settings: ContactSettings, seed: u64) -> Self {
        Self {
            fetcher,
            settings,
            seed,
        }
    }

    /// Contacts for `company`: observed ones from its site, else synthetic
    /// ones when the fallback is enabled. May be empty.
    pub async fn extract_for(&self, company: &Company, market: Market) -> Vec<ContactCandidate> {
        if self.settings.live_extraction {
            let observed = self.extract_live(company).await;
            if !observed.is_empty() {
                info!(company = %company.name, count = observed.len(), "observed contacts");
                return observed;
            }
        }
        if !self.settings.synthetic_fallback {
            return vec![];
        }
        let mut rng = StdRng::seed_from_u64(self.seed ^ name_hash(&company.name));
        let generated = synthetic_contacts(company, market, &mut rng);
        debug!(company = %company.name, count = generated.len(), "synthetic contacts");
        generated
    }

    async fn extract_live(&self, company: &Company) -> Vec<ContactCandidate> {
        let Some(root_url) = company.url.as_deref() else {
            return vec![];
        };
        let Some(gate_key) = domain_of(root_url) else {
            return vec![];
        };
        let attempts = self.settings.fetch_attempts;

        let root = self.fetcher.fetch_url(&gate_key, root_url, attempts).await;
        if !root.is_ok() {
            debug!(company = %company.name, url = root_url, status = ?root.status, "company site unavailable");
            return vec![];
        }

        let mut raw = scan_page(&root.document);
        for link in team_links(&root.document, root_url, self.settings.max_team_pages) {
            let page = self.fetcher.fetch_url(&gate_key, &link, attempts).await;
            if page.is_ok() {
                raw.extend(scan_page(&page.document));
            }
        }
        finalize_observed(raw)
    }
}

/// Up to `limit` distinct same-site links that look like team or about pages.
pub fn team_links(document: &str, base_url: &str, limit: usize) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return vec![];
    };
    let html = Html::parse_document(document);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return vec![];
    };

    let mut seen = HashSet::new();
    let mut links = vec![];
    for anchor in html.select(&anchors) {
        if links.len() >= limit {
            break;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let text = anchor.text().collect::<String>().to_lowercase();
        let href_lower = href.to_lowercase();
        let hit = TEAM_LINK_WORDS
            .iter()
            .any(|w| href_lower.contains(w) || text.contains(w));
        if !hit {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.host_str() != base.host_str() || resolved == base {
            continue;
        }
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}

fn first_text(el: &ElementRef, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
}

/// Unvalidated candidates from team containers and C-level mentions.
pub fn scan_page(document: &str) -> Vec<ContactCandidate> {
    let html = Html::parse_document(document);
    let (Ok(containers), Ok(names), Ok(titles), Ok(linkedin), Ok(mailto), Ok(tel)) = (
        Selector::parse(CONTAINER_SELECTOR),
        Selector::parse(NAME_SELECTOR),
        Selector::parse(TITLE_SELECTOR),
        Selector::parse(r#"a[href*="linkedin.com"]"#),
        Selector::parse(r#"a[href^="mailto:"]"#),
        Selector::parse(r#"a[href^="tel:"]"#),
    ) else {
        return vec![];
    };

    let mut found = vec![];
    for el in html.select(&containers) {
        let Some(name) = first_text(&el, &names) else {
            continue;
        };
        let title = first_text(&el, &titles).unwrap_or_default();
        let text = el.text().collect::<Vec<_>>().join(" ");
        let email = el
            .select(&mailto)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|h| h.trim_start_matches("mailto:").to_string())
            .or_else(|| EMAIL_RE.find(&text).map(|m| m.as_str().to_string()));

        found.push(ContactCandidate {
            name,
            title,
            linkedin: el
                .select(&linkedin)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string),
            email,
            phone: el
                .select(&tel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|h| h.trim_start_matches("tel:").trim().to_string()),
            is_primary: false,
            provenance: Provenance::Observed,
        });
    }

    let body = collapse_whitespace(&html.root_element().text().collect::<Vec<_>>().join(" "));
    for (title, after, before) in C_LEVEL_RES.iter() {
        for re in [after, before] {
            for caps in re.captures_iter(&body) {
                found.push(ContactCandidate {
                    name: caps[1].to_string(),
                    title: title.to_string(),
                    linkedin: None,
                    email: None,
                    phone: None,
                    is_primary: false,
                    provenance: Provenance::Observed,
                });
            }
        }
    }
    found
}

/// Two or three capitalised words, none of them boilerplate.
pub fn is_plausible_name(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 || words.len() > 3 {
        return false;
    }
    words.iter().all(|w| {
        let bare = w.trim_end_matches(['.', ',']);
        let starts_upper = bare.chars().next().is_some_and(char::is_uppercase);
        let has_lower = bare.chars().any(char::is_lowercase);
        let letters = bare.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-');
        starts_upper && has_lower && letters && !GENERIC_WORDS.contains(&bare.to_lowercase().as_str())
    })
}

fn finalize_observed(raw: Vec<ContactCandidate>) -> Vec<ContactCandidate> {
    let mut seen = HashSet::new();
    let mut contacts: Vec<ContactCandidate> = raw
        .into_iter()
        .map(|mut c| {
            c.name = collapse_whitespace(&c.name);
            c.title = collapse_whitespace(&c.title);
            c
        })
        .filter(|c| is_plausible_name(&c.name))
        .filter(|c| !c.title.is_empty() && c.title.len() <= 80 && c.title != c.name)
        .filter(|c| seen.insert(c.name.to_lowercase()))
        .take(MAX_CONTACTS)
        .collect();
    if let Some(first) = contacts.first_mut() {
        first.is_primary = true;
    }
    contacts
}

/// Contact count range and title pool for a size bracket.
fn synthetic_plan(bracket: Option<SizeBracket>) -> (usize, usize, &'static [&'static str]) {
    match bracket {
        Some(SizeBracket::Micro) => (
            1,
            2,
            &["CEO", "Founder", "Co-Founder", "CTO", "Technical Lead", "Head of Engineering"],
        ),
        Some(SizeBracket::Small) => (
            2,
            3,
            &["CEO", "CTO", "Co-Founder", "Engineering Manager", "VP Engineering", "Technical Director"],
        ),
        Some(SizeBracket::Medium) => (
            2,
            4,
            &["VP Engineering", "Engineering Manager", "Director of Engineering", "Head of Technology"],
        ),
        Some(SizeBracket::Large) => (
            3,
            4,
            &["Director of Engineering", "Engineering Manager", "Development Manager", "Technical Lead"],
        ),
        _ => (
            2,
            3,
            &["Engineering Manager", "Technical Lead", "Team Lead", "Development Manager"],
        ),
    }
}

pub fn synthetic_contacts<R: Rng>(company: &Company, market: Market, rng: &mut R) -> Vec<ContactCandidate> {
    let (min, max, titles) = synthetic_plan(company.size_bracket);
    let count = rng.gen_range(min..=max).min(titles.len());
    let domain = company
        .url
        .as_deref()
        .and_then(domain_of)
        .unwrap_or_else(|| format!("{}.com", company_slug(&company.name)));

    let mut used_names = HashSet::new();
    let mut contacts = vec![];
    for (i, title) in titles.choose_multiple(rng, count).enumerate() {
        let (first, last) = loop {
            let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
            if used_names.insert((first, last)) {
                break (first, last);
            }
        };
        contacts.push(ContactCandidate {
            name: format!("{} {}", first, last),
            title: title.to_string(),
            linkedin: Some(format!(
                "https://www.linkedin.com/in/{}-{}-{:06x}",
                first.to_lowercase(),
                last.to_lowercase(),
                rng.gen_range(0..0x100_0000u32)
            )),
            email: Some(synthetic_email(first, last, &domain, rng)),
            phone: Some(synthetic_phone(market, rng)),
            is_primary: i == 0,
            provenance: Provenance::Synthetic,
        });
    }
    contacts
}

fn synthetic_email<R: Rng>(first: &str, last: &str, domain: &str, rng: &mut R) -> String {
    let (f, l) = (first.to_lowercase(), last.to_lowercase());
    let initial = f.chars().next().unwrap_or('x');
    let local = match rng.gen_range(0..5) {
        0 => format!("{}.{}", f, l),
        1 => format!("{}{}", initial, l),
        2 => f.clone(),
        3 => format!("{}.{}", l, f),
        _ => format!("{}-{}", f, l),
    };
    format!("{}@{}", local, domain)
}

fn synthetic_phone<R: Rng>(market: Market, rng: &mut R) -> String {
    match market {
        Market::Usa => {
            let (area, exchange, line) = (
                rng.gen_range(200..=999),
                rng.gen_range(200..=999),
                rng.gen_range(1000..=9999),
            );
            if rng.gen_bool(0.5) {
                format!("+1-{}-{}-{}", area, exchange, line)
            } else {
                format!("({}) {}-{}", area, exchange, line)
            }
        }
        Market::Uk => {
            let (area, a, b) = (
                rng.gen_range(20..=79),
                rng.gen_range(1000..=9999),
                rng.gen_range(1000..=9999),
            );
            if rng.gen_bool(0.5) {
                format!("+44 {} {} {}", area, a, b)
            } else {
                format!("0{} {} {}", area, a, b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::TransportResponse;
    use crate::fetcher::testing::{ScriptedTransport, fetcher};

    fn company(name: &str, url: Option<&str>, bracket: Option<SizeBracket>) -> Company {
        Company {
            id: 1,
            name: name.to_string(),
            url: url.map(str::to_string),
            size_bracket: bracket,
            industry: None,
            provenance: Provenance::Inferred,
            enrichment_basis: None,
            created_at: String::new(),
        }
    }

    const HOME: &str = r#"<html><body>
        <nav><a href="/careers">Careers</a><a href="/about-us">About us</a><a href="/team">Our Team</a>
        <a href="https://elsewhere.com/team">Partner team</a></nav>
        <p>Founded in 2015 by Jane Doe, CEO of the company.</p>
    </body></html>"#;

    const TEAM: &str = r#"<html><body>
        <div class="team-member">
            <h3>Alan Turing</h3><p class="title">CTO</p>
            <a href="https://www.linkedin.com/in/alan-turing">LinkedIn</a>
            <a href="mailto:alan@acme.com">Email</a>
        </div>
        <div class="team-member"><h3>Contact Us</h3><p>Get in touch</p></div>
        <div class="person"><h4>Grace   Hopper</h4><span class="role">VP Engineering</span></div>
        <div class="person"><h4>Alan Turing</h4><span class="role">CTO</span></div>
    </body></html>"#;

    #[test]
    fn test_plausible_names() {
        assert!(is_plausible_name("Jane Doe"));
        assert!(is_plausible_name("Mary Anne O'Neil"));
        assert!(!is_plausible_name("Jane"));
        assert!(!is_plausible_name("Contact Us"));
        assert!(!is_plausible_name("Meet The Team"));
        assert!(!is_plausible_name("JANE DOE"));
        assert!(!is_plausible_name("Jane Doe Smith Jones"));
        // "us" is banned as a word, not as a substring.
        assert!(is_plausible_name("Justin Russo"));
    }

    #[test]
    fn test_team_links_same_site_only() {
        let links = team_links(HOME, "https://www.acme.com", 2);
        assert_eq!(
            links,
            vec!["https://www.acme.com/about-us", "https://www.acme.com/team"]
        );
        assert_eq!(team_links(HOME, "https://www.acme.com", 1).len(), 1);
    }

    #[test]
    fn test_scan_page_and_finalize() {
        let contacts = finalize_observed(scan_page(TEAM));
        let names: Vec<_> = contacts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alan Turing", "Grace Hopper"]);

        let alan = &contacts[0];
        assert!(alan.is_primary);
        assert_eq!(alan.title, "CTO");
        assert_eq!(alan.linkedin.as_deref(), Some("https://www.linkedin.com/in/alan-turing"));
        assert_eq!(alan.email.as_deref(), Some("alan@acme.com"));
        assert_eq!(alan.phone, None);
        assert!(contacts.iter().all(|c| c.provenance == Provenance::Observed));
        assert!(!contacts[1].is_primary);
    }

    #[test]
    fn test_c_level_mentions() {
        let found = scan_page("<p>Our CTO Linus Torvalds and Ada Lovelace, CFO lead the way.</p>");
        let contacts = finalize_observed(found);
        assert!(contacts.iter().any(|c| c.name == "Linus Torvalds" && c.title == "CTO"));
        assert!(contacts.iter().any(|c| c.name == "Ada Lovelace" && c.title == "CFO"));
    }

    #[test]
    fn test_observed_contacts_capped() {
        let mut page = String::from("<html><body>");
        for (first, last) in FIRST_NAMES.iter().zip(LAST_NAMES).take(8) {
            page.push_str(&format!(
                r#"<div class="staff"><h3>{} {}</h3><p>Director</p></div>"#,
                first, last
            ));
        }
        page.push_str("</body></html>");
        assert_eq!(finalize_observed(scan_page(&page)).len(), MAX_CONTACTS);
    }

    #[test]
    fn test_synthetic_counts_and_titles_follow_bracket() {
        for (bracket, min, max) in [
            (SizeBracket::Micro, 1, 2),
            (SizeBracket::Small, 2, 3),
            (SizeBracket::Medium, 2, 4),
            (SizeBracket::Large, 3, 4),
            (SizeBracket::Enterprise, 2, 3),
            (SizeBracket::Giant, 2, 3),
        ] {
            let (_, _, pool) = synthetic_plan(Some(bracket));
            for seed in 0..25 {
                let mut rng = StdRng::seed_from_u64(seed);
                let c = company("Acme Labs", Some("https://www.acmelabs.io"), Some(bracket));
                let contacts = synthetic_contacts(&c, Market::Usa, &mut rng);
                assert!((min..=max).contains(&contacts.len()), "{bracket:?}: {}", contacts.len());

                let titles: HashSet<_> = contacts.iter().map(|c| c.title.as_str()).collect();
                assert_eq!(titles.len(), contacts.len(), "titles must be unique");
                assert!(titles.iter().all(|t| pool.contains(t)));

                assert!(contacts[0].is_primary);
                assert_eq!(contacts.iter().filter(|c| c.is_primary).count(), 1);
                for contact in &contacts {
                    assert_eq!(contact.provenance, Provenance::Synthetic);
                    assert!(contact.email.as_deref().unwrap().ends_with("@acmelabs.io"));
                    assert!(contact.linkedin.as_deref().unwrap().starts_with("https://www.linkedin.com/in/"));
                    assert!(is_plausible_name(&contact.name));
                }
            }
        }
    }

    #[test]
    fn test_synthetic_phone_matches_market() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let us = synthetic_phone(Market::Usa, &mut rng);
            assert!(us.starts_with("+1-") || us.starts_with('('), "{us}");
            let uk = synthetic_phone(Market::Uk, &mut rng);
            assert!(uk.starts_with("+44 ") || uk.starts_with('0'), "{uk}");
        }
    }

    #[test]
    fn test_synthetic_email_without_url_uses_slug() {
        let mut rng = StdRng::seed_from_u64(2);
        let c = company("Initech LLC", None, None);
        let contacts = synthetic_contacts(&c, Market::Uk, &mut rng);
        assert!(contacts.iter().all(|c| c.email.as_deref().unwrap().ends_with("@initech.com")));
    }

    #[tokio::test]
    async fn test_live_extraction_follows_team_links() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .route("https://www.acme.com/about-us", vec![Ok(TransportResponse::new(200, TEAM))])
                .route("https://www.acme.com/team", vec![Ok(TransportResponse::new(404, ""))])
                .route("https://www.acme.com", vec![Ok(TransportResponse::new(200, HOME))]),
        );
        let finder = ContactFinder::with_seed(Arc::new(fetcher(transport.clone(), 2)), ContactSettings::default(), 1);

        let c = company("Acme", Some("https://www.acme.com"), Some(SizeBracket::Small));
        let contacts = finder.extract_for(&c, Market::Usa).await;

        let names: Vec<_> = contacts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Jane Doe", "Alan Turing", "Grace Hopper"]);
        assert!(contacts.iter().all(|c| c.provenance == Provenance::Observed));
        // Observed contacts never get invented phone numbers.
        assert!(contacts.iter().all(|c| c.phone.is_none()));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_site_falls_back_to_synthetic() {
        let transport = Arc::new(
            ScriptedTransport::new().route("https://www.acme.com", vec![Ok(TransportResponse::new(403, ""))]),
        );
        let finder = ContactFinder::with_seed(Arc::new(fetcher(transport.clone(), 5)), ContactSettings::default(), 1);
        let c = company("Acme", Some("https://www.acme.com"), Some(SizeBracket::Micro));

        let contacts = finder.extract_for(&c, Market::Uk).await;
        assert!(!contacts.is_empty());
        assert!(contacts.iter().all(|c| c.provenance == Provenance::Synthetic));
        // Site fetches use the lower contact attempt budget.
        assert_eq!(transport.calls(), 2);

        // Same seed and company give the same placeholders.
        assert_eq!(finder.extract_for(&c, Market::Uk).await, contacts);
    }

    #[tokio::test]
    async fn test_fallback_can_be_disabled() {
        let transport = Arc::new(ScriptedTransport::new());
        let settings = ContactSettings {
            live_extraction: false,
            synthetic_fallback: false,
            ..ContactSettings::default()
        };
        let finder = ContactFinder::with_seed(Arc::new(fetcher(transport.clone(), 2)), settings, 1);
        let c = company("Acme", Some("https://www.acme.com"), None);
        assert!(finder.extract_for(&c, Market::Usa).await.is_empty());
        assert_eq!(transport.calls(), 0);
    }
}
