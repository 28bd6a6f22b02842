//! Search target detection.
//!
//! Decides whether a free-text query is looking for job offers or for
//! candidates. An explicit, valid target always wins; otherwise the
//! lowercased query is scanned for keyword fragments, job terms first.

use jobmatch_core::types::EntityKind;

/// Fragments that mark a query as a search for job offers.
const JOB_TERMS: &[&str] = &[
    "offre", "offer", "job", "poste", "position", "emploi", "mission", "vacanc", "opening",
];

/// Fragments that mark a query as a search for candidates.
const CANDIDATE_TERMS: &[&str] = &[
    "candidat", "profil", "talent", "personne", "person", "applicant", "resume",
];

/// Resolve the search target of `query`.
///
/// `explicit` is honoured only when it is exactly `"jobs"` or `"candidates"`.
/// With no match in either keyword set the query targets job offers.
pub fn detect_target(query: &str, explicit: Option<&str>) -> EntityKind {
    if let Some(kind) = explicit.and_then(EntityKind::from_target) {
        return kind;
    }

    let q = query.to_lowercase();
    if JOB_TERMS.iter().any(|t| q.contains(t)) {
        return EntityKind::JobOffer;
    }
    if CANDIDATE_TERMS.iter().any(|t| q.contains(t)) {
        return EntityKind::Candidate;
    }
    EntityKind::JobOffer
}
