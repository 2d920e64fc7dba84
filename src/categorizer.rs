//! Technical / non-technical classification of postings from vocabulary
//! matches in the title and description.

use regex::Regex;
use std::sync::LazyLock;

const TECHNICAL_TERMS: &[&str] = &[
    // Languages
    "python", "java", "javascript", "typescript", "c#", "c++", "ruby", "php", "golang", "go",
    "rust", "swift", "kotlin", "scala", "perl", "r language", "dart", "flutter", "objective-c",
    "shell", "powershell", "bash", "sql", "html", "css", "sass", "less", "xml", "json", "yaml",
    // Development roles
    "developer", "software engineer", "programmer", "coder", "software developer",
    "web developer", "front-end", "frontend", "back-end", "backend", "full-stack", "full stack",
    "mobile developer", "ios developer", "android developer", "game developer", "app developer",
    "software architect", "solutions architect",
    // Disciplines
    "devops", "sre", "site reliability", "devsecops", "cloud engineer", "database", "dba",
    "data engineer", "data scientist", "data analyst", "machine learning", "ml", "ai engineer",
    "nlp", "computer vision", "data mining", "big data", "etl developer", "hadoop", "spark",
    "qa engineer", "quality assurance", "automation", "test engineer", "security engineer",
    "infosec", "cybersecurity", "penetration tester",
    // Infrastructure
    "systems administrator", "sysadmin", "network administrator", "network engineer",
    "cloud architect", "aws", "azure", "gcp", "kubernetes", "docker", "terraform", "ansible",
    "chef", "puppet",
    // Frameworks
    "react", "angular", "vue", "node", "express", "django", "flask", "rails", "laravel",
    "spring", "hibernate", "bootstrap", "tailwind", "jquery", "tensorflow", "pytorch", "keras",
    "scikit-learn", "pandas",
    // Seniority and generic markers
    "senior", "staff", "principal", "lead", "head of", "director of", "engineer", "engineering",
    "technical", "technology", "development",
];

const NON_TECHNICAL_TERMS: &[&str] = &[
    // Marketing
    "marketing", "marketing manager", "marketing coordinator", "seo", "sem", "content",
    "social media", "brand", "digital marketing", "growth", "acquisition", "email marketing",
    "performance marketing", "marketing automation", "crm", "inbound",
    // Sales and business
    "sales", "sales manager", "account", "business development", "account executive",
    "sales representative", "account manager", "customer success", "client manager",
    "business analyst", "sales operations",
    // Design
    "graphic design", "ui design", "ux design", "product design", "visual design", "web design",
    "illustration", "motion design",
    // Content and communications
    "content writer", "copywriter", "editor", "content strategist", "technical writer",
    "communications", "pr", "public relations", "journalist", "content creator",
    // People
    "recruiter", "talent acquisition", "hr", "hr manager", "human resources",
    "people operations", "office manager", "talent", "recruiting",
    // Management and operations
    "operations", "project manager", "product manager", "program manager", "scrum master",
    "agile coach", "operations manager", "delivery manager",
    // Finance and legal
    "finance", "accounting", "legal", "compliance", "financial analyst", "controller",
    "bookkeeper", "paralegal",
    // Support
    "customer support", "customer service", "help desk", "technical support", "service desk",
    "customer care", "customer experience",
];

const SKILL_PATTERNS: &[&str] = &[
    r"(proficient|experience|skilled|knowledge)\s+in\s+([^.]+)(python|java|javascript|sql)",
    r"(aws|azure|cloud)\s+experience",
    r"programming\s+(skills|experience)",
    r"(front|back)[\s-]end\s+development",
    r"database\s+(design|administration)",
    r"software\s+development\s+lifecycle",
];

const TECHNICAL_TIE_BREAKERS: &[&str] = &["developer", "engineer", "programmer", "devops"];
const NON_TECHNICAL_TIE_BREAKERS: &[&str] = &["marketing", "sales", "manager", "coordinator"];

const TECHNICAL_SUGGESTIONS: &[&str] = &[
    "Software Engineer",
    "Full Stack Developer",
    "Python Developer",
    "JavaScript Developer",
    "Frontend Developer",
    "Backend Developer",
    "DevOps Engineer",
    "Data Scientist",
    "Machine Learning Engineer",
    "Cloud Engineer",
    "React Developer",
    "Java Developer",
    "QA Engineer",
    "Web Developer",
    "Mobile Developer",
];

const NON_TECHNICAL_SUGGESTIONS: &[&str] = &[
    "Marketing Manager",
    "SEO Specialist",
    "Digital Marketing",
    "Content Writer",
    "Social Media Manager",
    "Sales Representative",
    "Account Manager",
    "Business Analyst",
    "Product Manager",
    "Customer Success Manager",
    "HR Specialist",
    "Recruiter",
    "UX Designer",
    "UI Designer",
    "Operations Manager",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Category {
    pub is_technical: bool,
    pub confidence: f64,
}

impl Category {
    fn new(is_technical: bool, confidence: f64) -> Self {
        Self {
            is_technical,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn label(&self) -> &'static str {
        if self.is_technical {
            "Technical"
        } else {
            "Non-Technical"
        }
    }
}

struct Vocabulary {
    technical: Vec<Regex>,
    non_technical: Vec<Regex>,
    skills: Vec<Regex>,
}

/// Matches `term` as a whole word. `+` and `#` count as word characters so
/// "c++" and "c#" do not match inside longer tokens.
fn term_regex(term: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)(?:^|[^\w+#]){}(?:$|[^\w+#])", regex::escape(term))).ok()
}

static VOCABULARY: LazyLock<Vocabulary> = LazyLock::new(|| Vocabulary {
    technical: TECHNICAL_TERMS.iter().filter_map(|t| term_regex(t)).collect(),
    non_technical: NON_TECHNICAL_TERMS.iter().filter_map(|t| term_regex(t)).collect(),
    skills: SKILL_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
        .collect(),
});

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().filter(|re| re.is_match(text)).count()
}

fn contains_word(text: &str, words: &[&str]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| words.iter().any(|w| token.starts_with(w)))
}

pub fn categorize_title(title: &str) -> Category {
    let vocab = &*VOCABULARY;
    let technical = count_matches(&vocab.technical, title);
    let non_technical = count_matches(&vocab.non_technical, title);

    if technical != non_technical {
        // 0.5 + 0.1 per point of margin
        let margin = technical.abs_diff(non_technical) as f64;
        return Category::new(technical > non_technical, ((5.0 + margin) / 10.0).min(1.0));
    }

    let lower = title.to_lowercase();
    if contains_word(&lower, TECHNICAL_TIE_BREAKERS) {
        Category::new(true, 0.8)
    } else if contains_word(&lower, NON_TECHNICAL_TIE_BREAKERS) {
        Category::new(false, 0.8)
    } else {
        Category::new(true, 0.55)
    }
}

pub fn categorize_description(description: &str) -> Category {
    if description.trim().is_empty() {
        return Category::new(true, 0.5);
    }
    let vocab = &*VOCABULARY;
    let technical = count_matches(&vocab.technical, description)
        + count_matches(&vocab.skills, description);
    let non_technical = count_matches(&vocab.non_technical, description);

    if technical == non_technical {
        return Category::new(true, 0.5);
    }
    // 0.6 + 0.05 per point of margin
    let margin = technical.abs_diff(non_technical) as f64;
    Category::new(technical > non_technical, ((12.0 + margin) / 20.0).min(1.0))
}

/// Verdict for a posting. With a description the title and description
/// verdicts are blended; on disagreement the more confident side wins at a
/// discount.
pub fn categorize(title: &str, description: Option<&str>) -> Category {
    let by_title = categorize_title(title);
    let Some(description) = description.filter(|d| !d.trim().is_empty()) else {
        return by_title;
    };
    let by_description = categorize_description(description);

    if by_title.is_technical == by_description.is_technical {
        Category::new(
            by_title.is_technical,
            by_title.confidence * 0.6 + by_description.confidence * 0.4,
        )
    } else if by_title.confidence > by_description.confidence {
        Category::new(by_title.is_technical, by_title.confidence * 0.8)
    } else {
        Category::new(by_description.is_technical, by_description.confidence * 0.7)
    }
}

/// Canonical search terms for runs started without keywords.
pub fn suggested_keywords(is_technical: bool) -> &'static [&'static str] {
    if is_technical {
        TECHNICAL_SUGGESTIONS
    } else {
        NON_TECHNICAL_SUGGESTIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_titles() {
        let c = categorize("Senior Software Engineer", None);
        assert!(c.is_technical);
        assert!(c.confidence >= 0.7, "confidence {}", c.confidence);

        let c = categorize("Marketing Manager", None);
        assert!(!c.is_technical);
        assert!(c.confidence >= 0.7, "confidence {}", c.confidence);
    }

    #[test]
    fn test_verdict_is_stable() {
        let first = categorize("Python Developer", Some("Experience in Django and SQL"));
        for _ in 0..10 {
            assert_eq!(categorize("Python Developer", Some("Experience in Django and SQL")), first);
        }
    }

    #[test]
    fn test_word_boundaries() {
        // "go" must not fire inside "good" or "google".
        let c = categorize_title("Good Googler");
        assert_eq!(c, Category::new(true, 0.55));

        assert!(term_regex("c++").unwrap().is_match("Senior C++ developer"));
        assert!(!term_regex("c").is_some_and(|re| re.is_match("c++")));
        assert!(term_regex("go").unwrap().is_match("Go / Rust engineer"));
        assert!(!term_regex("go").unwrap().is_match("algorithms"));
    }

    #[test]
    fn test_title_tie_breakers() {
        // One technical term and one non-technical term.
        let c = categorize_title("Sales Engineer");
        assert_eq!(c, Category::new(true, 0.8));

        // No vocabulary at all.
        let c = categorize_title("Barista");
        assert_eq!(c, Category::new(true, 0.55));

        let c = categorize_title("Events Coordinator");
        assert_eq!(c, Category::new(false, 0.8));
    }

    #[test]
    fn test_description_scoring() {
        let c = categorize_description(
            "Programming experience with Python and AWS. Knowledge in backend systems and SQL.",
        );
        assert!(c.is_technical);
        assert!(c.confidence > 0.6);

        assert_eq!(categorize_description("   "), Category::new(true, 0.5));
        assert_eq!(categorize_description("We make coffee."), Category::new(true, 0.5));
    }

    #[test]
    fn test_combination_rules() {
        let title = categorize_title("Senior Software Engineer");
        let desc_text = "Own social media, brand and content strategy for our marketing team";
        let desc = categorize_description(desc_text);
        assert!(title.is_technical);
        assert!(!desc.is_technical);

        let combined = categorize("Senior Software Engineer", Some(desc_text));
        if title.confidence > desc.confidence {
            assert_eq!(combined, Category::new(true, title.confidence * 0.8));
        } else {
            assert_eq!(combined, Category::new(false, desc.confidence * 0.7));
        }

        let agree = categorize("Python Developer", Some("Python, Django and Docker"));
        let t = categorize_title("Python Developer");
        let d = categorize_description("Python, Django and Docker");
        assert!(agree.is_technical);
        assert!((agree.confidence - (t.confidence * 0.6 + d.confidence * 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_blank_description_uses_title_only() {
        assert_eq!(categorize("Recruiter", Some("")), categorize_title("Recruiter"));
    }

    #[test]
    fn test_suggested_keywords() {
        assert!(suggested_keywords(true).contains(&"Python Developer"));
        assert!(suggested_keywords(false).contains(&"Marketing Manager"));
    }
}
