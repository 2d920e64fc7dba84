//! Built-in job portal table.

use crate::registry::{ExtractionDescriptor, MarketLocations, Source};

/// container, title, company, location, link, date
type Selectors<'a> = [&'a str; 6];

fn portal(name: &str, base_url: &str, search_template: &str, sel: Selectors) -> Source {
    Source {
        name: name.to_string(),
        base_url: base_url.to_string(),
        search_template: search_template.to_string(),
        active: true,
        descriptor: ExtractionDescriptor {
            container: sel[0].to_string(),
            title: sel[1].to_string(),
            company: sel[2].to_string(),
            location: Some(sel[3].to_string()),
            link: Some(sel[4].to_string()),
            date: Some(sel[5].to_string()),
            description: None,
            salary: None,
        },
        locations: MarketLocations::default(),
        id: None,
    }
}

/// Boards that share the common `div.job` card layout and a `?q=` search.
fn generic(name: &str, base_url: &str, search_url: &str, heading: &str) -> Source {
    portal(
        name,
        base_url,
        &format!("{}?q={{keyword}}", search_url),
        ["div.job", heading, "div.company", "div.location", heading, "div.date"],
    )
}

fn with_locations(mut source: Source, usa: &str, uk: &str) -> Source {
    source.locations = MarketLocations {
        usa: usa.to_string(),
        uk: uk.to_string(),
    };
    source
}

/// Salary snippets on the boards that show them on result cards.
const SALARY_SELECTORS: &[(&str, &str)] = &[
    ("Indeed UK", "div.salary-snippet, span.salaryText"),
    ("Indeed US", "div.salary-snippet, span.salaryText"),
    ("LinkedIn Jobs", "span.salary, .job-search-card__salary"),
    ("Glassdoor", "div.salary, span.salaryText"),
    ("ZipRecruiter", "div.job_salary"),
    ("Dice", "span.salary"),
];

pub fn builtin_sources() -> Vec<Source> {
    let mut sources = portal_table();
    for source in &mut sources {
        if let Some((_, selector)) = SALARY_SELECTORS.iter().find(|(name, _)| *name == source.name) {
            source.descriptor.salary = Some(selector.to_string());
        }
    }
    sources
}

fn portal_table() -> Vec<Source> {
    let indeed = [
        "div[data-jk]",
        "h2.jobTitle a span[title]",
        "span.companyName",
        "div.companyLocation",
        "h2.jobTitle a",
        "span.date",
    ];

    vec![
        with_locations(
            portal(
                "Indeed UK",
                "https://uk.indeed.com",
                "https://uk.indeed.com/jobs?q={keyword}&l={location}&sort=date&fromage={days}",
                indeed,
            ),
            "United States",
            "London, UK",
        ),
        with_locations(
            portal(
                "Indeed US",
                "https://www.indeed.com",
                "https://www.indeed.com/jobs?q={keyword}&l={location}&sort=date&fromage={days}",
                indeed,
            ),
            "United States",
            "London, UK",
        ),
        with_locations(
            portal(
                "LinkedIn Jobs",
                "https://www.linkedin.com/jobs",
                "https://www.linkedin.com/jobs/search?keywords={keyword}&location={location}&sortBy=DD&f_TPR=r{seconds}",
                [
                    "div.jobs-search-results-list li, .jobs-search-results__list-item, .base-search-card",
                    "a.job-title-link, h3.base-search-card__title",
                    "h4.base-search-card__subtitle, .job-search-card__subtitle",
                    "span.job-search-card__location, .job-search-card__location",
                    "a.job-title-link, a.base-card__full-link, h3.base-search-card__title a",
                    "time, .job-search-card__listdate",
                ],
            ),
            "United States",
            "London, England, United Kingdom",
        ),
        portal(
            "CV-Library",
            "https://www.cv-library.co.uk",
            "https://www.cv-library.co.uk/jobs?q={keyword}&posted={days}",
            ["div.job", "h2 a", "div.job__company", "div.job__location", "h2 a", "div.job__date"],
        ),
        generic("Adzuna", "https://www.adzuna.com", "https://www.adzuna.com/search", "h3 a"),
        generic("Totaljobs", "https://www.totaljobs.com", "https://www.totaljobs.com/jobs", "h2 a"),
        portal(
            "Reed",
            "https://www.reed.co.uk",
            "https://www.reed.co.uk/jobs?keywords={keyword}&datecreatedoffset=LastWeek",
            [
                "article.job-result",
                "h3 a",
                "div.job-result__company",
                "div.job-result__location",
                "h3 a",
                "div.job-result__date",
            ],
        ),
        generic("Talent", "https://www.talent.com", "https://www.talent.com/jobs", "h3 a"),
        with_locations(
            portal(
                "Glassdoor",
                "https://www.glassdoor.com",
                "https://www.glassdoor.com/Job/jobs.htm?sc.keyword={keyword}&sortBy=date_desc&fromAge={days}&locId={location}",
                [
                    "li.react-job-listing",
                    r#"div[data-test="job-title"]"#,
                    r#"div[data-test="employer-name"]"#,
                    r#"div[data-test="job-location"]"#,
                    r#"a[data-test="job-link"]"#,
                    r#"div[data-test="job-age"]"#,
                ],
            ),
            "1",
            "2671304",
        ),
        portal(
            "ZipRecruiter",
            "https://www.ziprecruiter.com",
            "https://www.ziprecruiter.com/jobs-search?search={keyword}&location={location}&days={days}",
            ["div.job_content", "a.job_link", "a.company_link", "div.job_location", "a.job_link", "div.job_date"],
        ),
        generic("CWjobs", "https://www.cwjobs.co.uk", "https://www.cwjobs.co.uk/jobs", "h2 a"),
        generic("Jobsora", "https://www.jobsora.com", "https://www.jobsora.com/jobs", "h3 a"),
        generic(
            "WelcometotheJungle",
            "https://www.welcometothejungle.com",
            "https://www.welcometothejungle.com/en/jobs",
            "h3 a",
        ),
        generic("IT Job Board", "https://www.itjobboard.co.uk", "https://www.itjobboard.co.uk/jobs", "h2 a"),
        generic("Trueup", "https://www.trueup.io", "https://www.trueup.io/jobs", "h3 a"),
        generic("Redefined", "https://www.redefined.co.uk", "https://www.redefined.co.uk/jobs", "h2 a"),
        portal(
            "We Work Remotely",
            "https://weworkremotely.com",
            "https://weworkremotely.com/remote-jobs/search?term={keyword}",
            ["li.feature", "a.title, span.title", "span.company", "span.region", "a", "span.date"],
        ),
        generic("AngelList", "https://angel.co", "https://angel.co/jobs", "h3 a"),
        generic("Jobspresso", "https://jobspresso.co", "https://jobspresso.co/jobs", "h3 a"),
        generic("Grabjobs", "https://www.grabjobs.co.uk", "https://www.grabjobs.co.uk/jobs", "h2 a"),
        portal(
            "Remote OK",
            "https://remoteok.io",
            "https://remoteok.io/remote-jobs?q={keyword}",
            [
                "tr.job",
                "td.company_and_position a h2, td.company_and_position a",
                "td.company_and_position span, td.company_and_position h3",
                "td.location, div.location",
                "td.company_and_position a",
                "td.date, time",
            ],
        ),
        generic("Working Nomads", "https://www.workingnomads.com", "https://www.workingnomads.com/jobs", "h3 a"),
        generic("WorkInStartups", "https://www.workinstartups.com", "https://www.workinstartups.com/jobs", "h2 a"),
        generic("Jobtensor", "https://www.jobtensor.com", "https://www.jobtensor.com/jobs", "h3 a"),
        generic("Jora", "https://au.jora.com", "https://au.jora.com/jobs", "h3 a"),
        generic("SEOJobs.com", "https://www.seojobs.com", "https://www.seojobs.com/jobs", "h2 a"),
        portal(
            "CareerBuilder",
            "https://www.careerbuilder.com",
            "https://www.careerbuilder.com/jobs?keywords={keyword}&location={location}&posted={days}",
            [
                "div.data-results-content-parent",
                "a.data-results-content",
                "div.data-details span:first-child, div.data-details",
                "div.data-details span:nth-child(2), div.data-details",
                "a.data-results-content",
                "div.data-results-publish-time",
            ],
        ),
        portal(
            "Dice",
            "https://www.dice.com",
            "https://www.dice.com/jobs?q={keyword}&location={location}",
            ["div.job", "h3 a", "div.company", "div.location", "h3 a", "div.date"],
        ),
        generic("Escape The City", "https://www.escapethecity.org", "https://www.escapethecity.org/jobs", "h2 a"),
        generic("Jooble", "https://jooble.org", "https://jooble.org/jobs", "h3 a"),
        generic("Otta", "https://www.otta.com", "https://www.otta.com/jobs", "h3 a"),
        generic("Remote.co", "https://remote.co", "https://remote.co/remote-jobs", "h3 a"),
        generic("SEL Jobs", "https://www.seljobs.com", "https://www.seljobs.com/jobs", "h2 a"),
        generic("FlexJobs", "https://www.flexjobs.com", "https://www.flexjobs.com/search", "h3 a"),
        generic("Dynamite Jobs", "https://www.dynamitejobs.com", "https://www.dynamitejobs.com/jobs", "h3 a"),
        portal(
            "SimplyHired",
            "https://www.simplyhired.com",
            "https://www.simplyhired.com/search?q={keyword}&l={location}&t={days}",
            [
                "div.SerpJob-jobCard, [data-testid=\"searchSerpJob\"]",
                "a.SerpJob-link, h2 a",
                "span.JobPosting-labelWithIcon, [data-testid=\"companyName\"]",
                "span.jobposting-location, [data-testid=\"searchSerpJobLocation\"]",
                "a.SerpJob-link, h2 a",
                "time, [data-testid=\"searchSerpJobDateStamp\"]",
            ],
        ),
        generic("Remotive", "https://remotive.com", "https://remotive.com/remote-jobs", "h3 a"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_case_insensitively() {
        let sources = builtin_sources();
        let names: HashSet<String> = sources.iter().map(|s| s.name.to_lowercase()).collect();
        assert_eq!(names.len(), sources.len());
    }

    #[test]
    fn test_every_selector_parses() {
        for source in builtin_sources() {
            let d = &source.descriptor;
            let mut selectors = vec![&d.container, &d.title, &d.company];
            selectors.extend(d.location.iter());
            selectors.extend(d.link.iter());
            selectors.extend(d.date.iter());
            selectors.extend(d.salary.iter());
            for sel in selectors {
                assert!(
                    scraper::Selector::parse(sel).is_ok(),
                    "{}: bad selector {}",
                    source.name,
                    sel
                );
            }
        }
    }

    #[test]
    fn test_generic_portals_share_card_layout() {
        let sources = builtin_sources();
        let jooble = sources.iter().find(|s| s.name == "Jooble").unwrap();
        assert_eq!(jooble.descriptor.container, "div.job");
        assert_eq!(jooble.search_template, "https://jooble.org/jobs?q={keyword}");
        assert_eq!(jooble.descriptor.salary, None);
    }

    #[test]
    fn test_major_portals_carry_salary_selectors() {
        let sources = builtin_sources();
        for name in ["Indeed UK", "Indeed US", "LinkedIn Jobs", "Glassdoor", "ZipRecruiter", "Dice"] {
            let source = sources.iter().find(|s| s.name == name).unwrap();
            assert!(source.descriptor.salary.is_some(), "{name}");
        }
    }
}
