//! Candidate resolution: ranked (url, source) pairs for one record.
//!
//! The resolver is a pure function over fields already cached on the record;
//! it performs no I/O. Ranks: repository/preprint copies first, then the
//! Unpaywall OA location, then a license-gated publisher URL.

use url::Url;

use crate::store::{PdfCandidate, ResearchArticle};

/// Builds the ordered, deduplicated candidate list for a record.
#[must_use]
pub fn resolve_candidates(article: &ResearchArticle) -> Vec<PdfCandidate> {
    let mut candidates: Vec<PdfCandidate> = Vec::new();

    // Rank 1: repository and preprint copies.
    if let Some(url) = &article.manual_url_repository {
        candidates.push(PdfCandidate {
            url: url.clone(),
            source: "manual-repository".to_string(),
            license: None,
        });
    }
    if let Some(arxiv_id) = &article.arxiv_id {
        candidates.push(PdfCandidate {
            url: format!("https://arxiv.org/pdf/{arxiv_id}.pdf"),
            source: "arxiv".to_string(),
            license: None,
        });
    }
    if article.preprint_platform.as_deref() == Some("biorxiv") {
        if let Some(doi) = &article.doi_norm {
            candidates.push(PdfCandidate {
                url: format!("https://www.biorxiv.org/content/{doi}v1.full.pdf"),
                source: "biorxiv".to_string(),
                license: None,
            });
        }
    }

    // Rank 2: Unpaywall's best OA location.
    let is_oa = article
        .oa_status
        .as_deref()
        .is_some_and(|status| !status.eq_ignore_ascii_case("closed"));
    if is_oa {
        if let Some(url) = &article.oa_pdf_url {
            candidates.push(PdfCandidate {
                url: url.clone(),
                source: "unpaywall".to_string(),
                license: article.oa_license.clone(),
            });
        }
    }

    // Rank 3: publisher copy, only when a permissible license is advertised.
    let permissible = article
        .oa_license
        .as_deref()
        .is_some_and(|license| license.to_lowercase().starts_with("cc-"));
    if permissible {
        if let Some(url) = &article.manual_url_publisher {
            candidates.push(PdfCandidate {
                url: url.clone(),
                source: "publisher".to_string(),
                license: article.oa_license.clone(),
            });
        }
    }

    dedup_by_canonical_url(candidates)
}

/// Collapses candidates that point at the same resource, keeping the
/// highest-ranked occurrence.
fn dedup_by_canonical_url(candidates: Vec<PdfCandidate>) -> Vec<PdfCandidate> {
    let mut seen: Vec<String> = Vec::new();
    let mut deduped = Vec::new();
    for candidate in candidates {
        let key = canonical_url(&candidate.url);
        if !seen.contains(&key) {
            seen.push(key);
            deduped.push(candidate);
        }
    }
    deduped
}

/// Canonical comparison form: lowercased scheme and host, no fragment, no
/// trailing slash on the path. Query strings are preserved (they can be
/// significant for repository download endpoints).
pub(crate) fn canonical_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    parsed.set_fragment(None);

    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    // Url already lowercases scheme and host.
    parsed.to_string()
}
