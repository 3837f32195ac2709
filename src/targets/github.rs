//! Job boards run as GitHub issue trackers, one issue per posting.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{absolutize, Query, RenderedPage, Target};
use crate::config::GithubSettings;
use crate::record::{canonical_url, collapse_whitespace, Fields, KeyRule, Record};

pub const NAME: &str = "github";
const COLUMNS: &[&str] = &["repo", "title", "company", "location", "labels", "posted", "url"];

static ROW: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.js-issue-row, [data-testid='list-view-item']").unwrap()
});
static TITLE_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[data-hovercard-type='issue'], a[data-testid='issue-pr-title-link']").unwrap()
});
static LABEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.IssueLabel, span.IssueLabel").unwrap());
static TIME: LazyLock<Selector> = LazyLock::new(|| Selector::parse("relative-time").unwrap());
static NEXT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a.next_page, a[rel='next'], a[aria-label='Next Page']").unwrap()
});

static BRACKETS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*((?:\[[^\]]*\]\s*)+)").unwrap());
static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]").unwrap());
static COMPANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.+?)\s+(?:@|at|na|no)\s+(.+)$").unwrap());
static WORKPLACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(remot[eo]|h[íi]brido|hybrid|presencial|on-?site)$").unwrap()
});

pub struct GithubIssues {
    repos: Vec<String>,
    state: String,
}

impl GithubIssues {
    pub fn new(settings: &GithubSettings) -> Self {
        GithubIssues {
            repos: settings.repos.clone(),
            state: settings.state.clone(),
        }
    }
}

impl Target for GithubIssues {
    fn name(&self) -> &str {
        NAME
    }

    fn columns(&self) -> &[&'static str] {
        COLUMNS
    }

    fn key_rule(&self) -> KeyRule {
        KeyRule::CanonicalUrl("url")
    }

    fn queries(&self) -> Vec<Query> {
        self.repos
            .iter()
            .map(|repo| Query {
                id: format!("{}:{}:{}", NAME, repo, self.state),
                context: vec![("repo", repo.clone())],
            })
            .collect()
    }

    fn page_url(&self, query: &Query, page: u32) -> String {
        let repo = query
            .context
            .iter()
            .find(|(k, _)| *k == "repo")
            .map(|(_, v)| v.as_str())
            .unwrap_or_default();
        format!(
            "https://github.com/{}/issues?page={}&q=is%3Aissue+is%3A{}",
            repo, page, self.state
        )
    }

    fn ready_selector(&self) -> &str {
        "div.js-issue-row, [data-testid='list-view-item'], .blankslate"
    }

    fn extract(&self, page: &RenderedPage, query: &Query) -> Vec<Record> {
        let doc = Html::parse_document(&page.html);
        let mut records = Vec::new();

        for (i, row) in doc.select(&ROW).enumerate() {
            match parse_row(row, &page.url, query) {
                Some(record) => records.push(record),
                None => warn!(target_name = NAME, url = %page.url, row = i + 1, "malformed issue row skipped"),
            }
        }
        records
    }

    fn has_next_page(&self, html: &str) -> bool {
        let doc = Html::parse_document(html);
        let enabled = doc.select(&NEXT).any(|a| {
            let classes = a.value().attr("class").unwrap_or_default();
            a.value().attr("href").is_some()
                && a.value().attr("aria-disabled") != Some("true")
                && !classes.split_whitespace().any(|c| c == "disabled")
        });
        enabled
    }
}

fn parse_row(row: ElementRef<'_>, page_url: &str, query: &Query) -> Option<Record> {
    let link = row.select(&TITLE_LINK).next()?;
    let href = link.value().attr("href")?;
    let url = absolutize(page_url, href)?;
    let raw_title = collapse_whitespace(&link.text().collect::<String>());
    if raw_title.is_empty() {
        return None;
    }

    let labels: Vec<String> = row
        .select(&LABEL)
        .map(|l| collapse_whitespace(&l.text().collect::<String>()))
        .filter(|l| !l.is_empty())
        .collect();
    let posted = row
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
        .map(|dt| dt.format("%Y-%m-%d").to_string());

    let parts = split_title(&raw_title);
    let location = parts.location.or_else(|| {
        labels
            .iter()
            .find(|l| WORKPLACE_RE.is_match(l))
            .cloned()
    });

    let mut fields = Fields::new();
    for (name, value) in &query.context {
        fields = fields.set(name, Some(value.clone()));
    }
    fields
        .set("title", Some(parts.role))
        .set("company", parts.company)
        .set("location", location)
        .set("labels", Some(labels.join("; ")))
        .set("posted", posted)
        .set("url", Some(canonical_url(&url)))
        .build(KeyRule::CanonicalUrl("url"))
}

#[derive(Debug, PartialEq, Eq)]
struct TitleParts {
    role: String,
    company: Option<String>,
    location: Option<String>,
}

/// Split `[Location] Role @ Company` style issue titles.
fn split_title(title: &str) -> TitleParts {
    let (location, rest) = match BRACKETS_RE.captures(title) {
        Some(caps) => {
            let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let first = BRACKET_RE
                .captures(prefix)
                .map(|c| collapse_whitespace(&c[1]))
                .filter(|s| !s.is_empty());
            (first, title[caps.get(0).map(|m| m.end()).unwrap_or(0)..].trim())
        }
        None => (None, title.trim()),
    };

    match COMPANY_RE.captures(rest) {
        Some(caps) => TitleParts {
            role: caps[1].trim().to_string(),
            company: Some(caps[2].trim().to_string()),
            location,
        },
        None => TitleParts {
            role: rest.to_string(),
            company: None,
            location,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UNKNOWN;

    fn target() -> GithubIssues {
        GithubIssues::new(&GithubSettings {
            repos: vec!["frontendbr/vagas".into()],
            state: "open".into(),
        })
    }

    fn fixture(name: &str) -> RenderedPage {
        RenderedPage {
            url: "https://github.com/frontendbr/vagas/issues?page=1&q=is%3Aissue+is%3Aopen".into(),
            page_number: 1,
            html: std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap(),
        }
    }

    #[test]
    fn page_urls_are_numbered() {
        let t = target();
        let q = &t.queries()[0];
        assert_eq!(q.id, "github:frontendbr/vagas:open");
        assert_eq!(
            t.page_url(q, 3),
            "https://github.com/frontendbr/vagas/issues?page=3&q=is%3Aissue+is%3Aopen"
        );
    }

    #[test]
    fn extracts_issue_rows() {
        let t = target();
        let q = &t.queries()[0];
        let records = t.extract(&fixture("github_issues"), q);
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.get("title"), "Desenvolvedor Front-end Pleno");
        assert_eq!(first.get("company"), "Acme Tecnologia");
        assert_eq!(first.get("location"), "São Paulo");
        assert_eq!(first.get("labels"), "CLT; Pleno");
        assert_eq!(first.get("posted"), "2024-05-02");
        assert_eq!(first.get("repo"), "frontendbr/vagas");
        assert_eq!(first.key(), "https://github.com/frontendbr/vagas/issues/101");
    }

    #[test]
    fn missing_fields_become_unknown() {
        let t = target();
        let q = &t.queries()[0];
        let records = t.extract(&fixture("github_issues"), q);

        // No company suffix, no date, location only from a label.
        let third = &records[2];
        assert_eq!(third.get("company"), UNKNOWN);
        assert_eq!(third.get("posted"), UNKNOWN);
        assert_eq!(third.get("location"), "Remoto");
    }

    #[test]
    fn malformed_row_is_skipped_not_fatal() {
        let t = target();
        let q = &t.queries()[0];
        let records = t.extract(&fixture("github_issues"), q);
        // The fixture has four rows; one lacks a title link.
        assert!(records.iter().all(|r| r.key().contains("/issues/")));
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn keys_are_deterministic() {
        let t = target();
        let q = &t.queries()[0];
        let page = fixture("github_issues");
        let a: Vec<String> = t.extract(&page, q).iter().map(|r| r.key().to_string()).collect();
        let b: Vec<String> = t.extract(&page, q).iter().map(|r| r.key().to_string()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn next_page_detection() {
        let t = target();
        assert!(t.has_next_page(&fixture("github_issues").html));
        assert!(!t.has_next_page(
            r#"<div class="pagination"><span class="next_page disabled">Next</span></div>"#
        ));
        assert!(!t.has_next_page(
            r#"<a class="next_page disabled" aria-disabled="true" href="?page=9">Next</a>"#
        ));
    }

    #[test]
    fn title_splitting() {
        assert_eq!(
            split_title("[Remoto] [Sênior] Engenheiro de Software @ Foo"),
            TitleParts {
                role: "Engenheiro de Software".into(),
                company: Some("Foo".into()),
                location: Some("Remoto".into()),
            }
        );
        assert_eq!(
            split_title("Frontend Developer at Bar Inc"),
            TitleParts {
                role: "Frontend Developer".into(),
                company: Some("Bar Inc".into()),
                location: None,
            }
        );
        assert_eq!(split_title("Vaga React").company, None);
    }
}
