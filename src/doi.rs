//! DOI and arXiv identifier normalization plus preprint-namespace detection.
//!
//! Every DOI that enters the store goes through [`normalize_doi`] so that the
//! unique index on `doi_norm` compares like with like: lowercase, no URL
//! scheme or resolver host, no `doi:` prefix.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// DOI prefix minted by arXiv for its own deposits.
pub const ARXIV_DOI_PREFIX: &str = "10.48550";

/// DOI prefix shared by bioRxiv and medRxiv (Cold Spring Harbor).
pub const BIORXIV_DOI_PREFIX: &str = "10.1101";

/// DOI prefix used by Preprints.org.
pub const PREPRINTS_ORG_DOI_PREFIX: &str = "10.20944";

#[allow(clippy::expect_used)]
static ARXIV_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d{4}\.\d{4,5}|[a-z\-]+(?:\.[a-z]{2})?/\d{7})(?:v\d+)?$")
        .expect("static arXiv id regex is valid")
});

/// Preprint platform a record was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreprintPlatform {
    /// arXiv (identifier or `10.48550` DOI).
    Arxiv,
    /// bioRxiv or medRxiv (`10.1101` DOI; the server is resolved at fetch time).
    Biorxiv,
    /// Preprints.org (`10.20944` DOI).
    PreprintsOrg,
}

impl PreprintPlatform {
    /// Returns the platform tag stored in `research_articles.preprint_platform`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Biorxiv => "biorxiv",
            Self::PreprintsOrg => "preprints.org",
        }
    }
}

impl fmt::Display for PreprintPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalizes a DOI into its canonical stored form.
///
/// Accepts bare DOIs, `doi:` prefixed strings, and `https://doi.org/` /
/// `https://dx.doi.org/` URLs. Returns `None` when the remainder does not
/// look like a DOI (`10.` prefix with a registrant/suffix split).
#[must_use]
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut value = raw.trim();

    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
    ] {
        if let Some(rest) = strip_prefix_ignore_case(value, prefix) {
            value = rest;
            break;
        }
    }
    if let Some(rest) = strip_prefix_ignore_case(value, "doi:") {
        value = rest;
    }

    let value = value.trim().trim_matches('/');
    if !value.starts_with("10.") || !value.contains('/') {
        return None;
    }

    Some(value.to_lowercase())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Returns true if the input matches the arXiv identifier grammar
/// (new-style `2301.01234v2` or old-style `math.GT/0309136`).
#[must_use]
pub fn is_arxiv_id(candidate: &str) -> bool {
    ARXIV_ID_RE.is_match(candidate.trim())
}

/// Extracts a bare arXiv identifier from a `10.48550/arXiv.<id>` DOI.
#[must_use]
pub fn arxiv_id_from_doi(doi_norm: &str) -> Option<String> {
    let rest = doi_norm.strip_prefix("10.48550/")?;
    let id = rest.strip_prefix("arxiv.").unwrap_or(rest);
    let id = id.trim();
    is_arxiv_id(id).then(|| id.to_string())
}

/// Detects the preprint platform for a record from its identifiers.
///
/// An explicit arXiv id wins over the DOI namespace; otherwise the DOI
/// prefix decides.
#[must_use]
pub fn detect_platform(doi_norm: Option<&str>, arxiv_id: Option<&str>) -> Option<PreprintPlatform> {
    if arxiv_id.is_some_and(is_arxiv_id) {
        return Some(PreprintPlatform::Arxiv);
    }

    let doi = doi_norm?;
    if doi.starts_with(ARXIV_DOI_PREFIX) {
        Some(PreprintPlatform::Arxiv)
    } else if doi.starts_with(BIORXIV_DOI_PREFIX) {
        Some(PreprintPlatform::Biorxiv)
    } else if doi.starts_with(PREPRINTS_ORG_DOI_PREFIX) {
        Some(PreprintPlatform::PreprintsOrg)
    } else {
        None
    }
}

/// Path-safe rendering of a normalized DOI for filenames (`/` becomes `_`).
#[must_use]
pub fn doi_path_safe(doi_norm: &str) -> String {
    doi_norm.replace('/', "_")
}
