//! Deterministic structural extractor
//!
//! Reads markdown-ish BRD text without a model. Bullets (`-`, `*`, `+`, `1.`)
//! become requirements; headings select functional or non-functional sections;
//! `FR1:`/`NFR-2:` prefixes override the section. A bullet splits into title
//! and description at the first `: ` or ` - `. Documents without bullets fall
//! back to one requirement per prose line.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use brdflow_utils::error::ParseError;
use brdflow_utils::types::RequirementKind;

use crate::types::{BrdParser, ParseRequest, ParseResult, Requirement};

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.+?)\s*#*\s*$").unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+\u{2022}]|\d+[.)])\s+(.+)$").unwrap()
});
static ID_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(n?fr)[-_ ]?\d*\s*[:.)\-]\s*").unwrap()
});

const NFR_KEYWORDS: &[&str] = &[
    "performance",
    "latency",
    "response time",
    "respond within",
    "availability",
    "uptime",
    "security",
    "secure",
    "encrypt",
    "scalab",
    "reliab",
    "accessib",
    "compliance",
    "gdpr",
    "throughput",
    "concurrent users",
];

const EXPLICIT_CONFIDENCE: f64 = 0.8;
const INFERRED_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Unknown,
    Functional,
    NonFunctional,
}

fn section_for(heading: &str) -> Section {
    let h = heading.to_lowercase();
    if h.contains("non-functional")
        || h.contains("non functional")
        || h.contains("nonfunctional")
        || h.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == "nfr")
        || h.contains("quality attribute")
    {
        Section::NonFunctional
    } else if h.contains("functional") || h.contains("requirement") || h.contains("feature") {
        Section::Functional
    } else {
        Section::Unknown
    }
}

fn looks_non_functional(text: &str) -> bool {
    let t = text.to_lowercase();
    NFR_KEYWORDS.iter().any(|k| t.contains(k))
}

/// Split `Title: description` or `Title - description`.
fn split_title(text: &str) -> (String, String) {
    let cut = [": ", " - ", " \u{2014} "]
        .iter()
        .filter_map(|sep| text.find(sep).map(|idx| (idx, sep.len())))
        .min_by_key(|(idx, _)| *idx);
    let (title, description) = match cut {
        Some((idx, len)) => (&text[..idx], &text[idx + len..]),
        None => (text, ""),
    };
    (
        title.trim().trim_end_matches('.').trim().to_string(),
        description.trim().to_string(),
    )
}

struct Candidate {
    text: String,
    section: Section,
}

/// Structural/bullet-based extractor. Never calls out of process.
#[derive(Debug, Clone, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Extract requirements synchronously.
    ///
    /// # Errors
    ///
    /// [`ParseError::EmptyDocument`] when the text holds no statement at all.
    pub fn extract(&self, text: &str) -> Result<ParseResult, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let mut title = None;
        let mut section = Section::Unknown;
        let mut bullets: Vec<Candidate> = Vec::new();
        let mut prose: Vec<Candidate> = Vec::new();
        let mut subheadings: Vec<Candidate> = Vec::new();
        let mut last_was_bullet = false;

        for line in text.lines() {
            if line.trim().is_empty() {
                last_was_bullet = false;
                continue;
            }
            if let Some(caps) = HEADING.captures(line) {
                let text = caps[2].trim().to_string();
                if title.is_none() {
                    title = Some(text);
                } else {
                    section = section_for(&text);
                    subheadings.push(Candidate {
                        text,
                        section: Section::Unknown,
                    });
                }
                last_was_bullet = false;
                continue;
            }
            if let Some(caps) = BULLET.captures(line) {
                bullets.push(Candidate {
                    text: caps[1].trim().to_string(),
                    section,
                });
                last_was_bullet = true;
                continue;
            }
            // Indented continuation of the previous bullet
            if last_was_bullet && line.starts_with(char::is_whitespace) {
                if let Some(prev) = bullets.last_mut() {
                    prev.text.push(' ');
                    prev.text.push_str(line.trim());
                }
                continue;
            }
            last_was_bullet = false;
            prose.push(Candidate {
                text: line.trim().to_string(),
                section,
            });
        }

        let candidates = if !bullets.is_empty() {
            bullets
        } else if !prose.is_empty() {
            prose
        } else {
            subheadings
        };
        if candidates.is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let mut explicit = 0usize;
        let requirements: Vec<Requirement> = candidates
            .into_iter()
            .filter_map(|c| {
                let (body, prefix_kind) = match ID_PREFIX.captures(&c.text) {
                    Some(caps) => {
                        let kind = if caps[1].eq_ignore_ascii_case("nfr") {
                            RequirementKind::Nfr
                        } else {
                            RequirementKind::Fr
                        };
                        (c.text[caps[0].len()..].to_string(), Some(kind))
                    }
                    None => (c.text.clone(), None),
                };
                let (title, description) = split_title(&body);
                if title.is_empty() {
                    return None;
                }

                let section_kind = match c.section {
                    Section::Functional => Some(RequirementKind::Fr),
                    Section::NonFunctional => Some(RequirementKind::Nfr),
                    Section::Unknown => None,
                };
                let (kind, confidence) = match prefix_kind.or(section_kind) {
                    Some(kind) => {
                        explicit += 1;
                        (kind, EXPLICIT_CONFIDENCE)
                    }
                    None if looks_non_functional(&body) => (RequirementKind::Nfr, INFERRED_CONFIDENCE),
                    None => (RequirementKind::Fr, INFERRED_CONFIDENCE),
                };
                Some(Requirement::new(title, description, kind, confidence))
            })
            .collect();

        if requirements.is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        let semantic_score = 0.5 + 0.4 * (explicit as f64 / requirements.len() as f64);
        tracing::debug!(
            requirements = requirements.len(),
            explicit,
            semantic_score,
            "Heuristic extraction complete"
        );

        Ok(ParseResult {
            requirements,
            title,
            semantic_score,
        })
    }
}

#[async_trait]
impl BrdParser for HeuristicExtractor {
    async fn parse(&self, request: &ParseRequest) -> Result<ParseResult, ParseError> {
        self.extract(&request.text)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_BRD: &str = "\
# Online Store

## Functional Requirements
- FR1: User registration: create an account with email; verify the email address
- FR2: Product search
- FR3: Shopping cart: keep items between sessions
- FR4: Checkout

## Non-Functional Requirements
- NFR1: Page load: pages render within 2 seconds
- NFR2: Security - all traffic uses TLS
";

    #[test]
    fn test_sections_and_prefixes() {
        let result = HeuristicExtractor::new().extract(SHOP_BRD).unwrap();
        assert_eq!(result.title.as_deref(), Some("Online Store"));
        let kinds: Vec<_> = result.requirements.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequirementKind::Fr,
                RequirementKind::Fr,
                RequirementKind::Fr,
                RequirementKind::Fr,
                RequirementKind::Nfr,
                RequirementKind::Nfr,
            ]
        );

        let first = &result.requirements[0];
        assert_eq!(first.title, "User registration");
        assert_eq!(
            first.description,
            "create an account with email; verify the email address"
        );
        assert_eq!(result.requirements[1].description, "");
        assert_eq!(result.requirements[5].title, "Security");
        assert!((result.semantic_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_overrides_section() {
        let text = "# Doc\n## Functional\n- NFR-1: Uptime of 99.9%\n";
        let result = HeuristicExtractor::new().extract(text).unwrap();
        assert_eq!(result.requirements[0].kind, RequirementKind::Nfr);
        assert_eq!(result.requirements[0].title, "Uptime of 99.9%");
    }

    #[test]
    fn test_keywords_classify_when_unmarked() {
        let text = "* Users can export reports\n* Response time under 300ms for search\n";
        let result = HeuristicExtractor::new().extract(text).unwrap();
        assert_eq!(result.title, None);
        assert_eq!(result.requirements[0].kind, RequirementKind::Fr);
        assert_eq!(result.requirements[1].kind, RequirementKind::Nfr);
        assert!((result.semantic_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_prose_fallback_and_continuations() {
        let prose = "# Notes\nThe system lets managers approve leave.\nStaff see their balance.\n";
        let result = HeuristicExtractor::new().extract(prose).unwrap();
        assert_eq!(result.requirements.len(), 2);
        assert_eq!(result.requirements[0].title, "The system lets managers approve leave");

        let wrapped = "- Reporting: monthly totals\n  grouped by team\n";
        let result = HeuristicExtractor::new().extract(wrapped).unwrap();
        assert_eq!(result.requirements[0].description, "monthly totals grouped by team");
    }

    #[test]
    fn test_empty_document() {
        assert!(matches!(
            HeuristicExtractor::new().extract("  \n\t\n"),
            Err(ParseError::EmptyDocument)
        ));
        assert!(matches!(
            HeuristicExtractor::new().extract("# Only a title\n"),
            Err(ParseError::EmptyDocument)
        ));
    }
}
