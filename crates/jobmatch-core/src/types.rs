use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Default collection name for candidate profiles.
pub const CANDIDATES_COLLECTION: &str = "candidates";
/// Default collection name for job offers.
pub const JOB_OFFERS_COLLECTION: &str = "job_offers";

/// The two kinds of entity the platform matches against each other.
///
/// Also serves as the search target of a free-text query: `"candidates"`
/// searches candidate profiles, `"jobs"` searches job offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "candidates")]
    Candidate,
    #[serde(rename = "jobs")]
    JobOffer,
}

impl EntityKind {
    /// Parse an explicit search target. Only `"jobs"` and `"candidates"` are valid.
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "jobs" => Some(EntityKind::JobOffer),
            "candidates" => Some(EntityKind::Candidate),
            _ => None,
        }
    }

    /// The target label used on the wire (`"jobs"` / `"candidates"`).
    pub fn target_label(&self) -> &'static str {
        match self {
            EntityKind::Candidate => "candidates",
            EntityKind::JobOffer => "jobs",
        }
    }

    /// The default collection name entities of this kind are indexed under.
    pub fn default_collection(&self) -> &'static str {
        match self {
            EntityKind::Candidate => CANDIDATES_COLLECTION,
            EntityKind::JobOffer => JOB_OFFERS_COLLECTION,
        }
    }

    /// The kind an entity of this kind is matched against.
    pub fn opposite(&self) -> Self {
        match self {
            EntityKind::Candidate => EntityKind::JobOffer,
            EntityKind::JobOffer => EntityKind::Candidate,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target_label())
    }
}

/// Seniority level of a job offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seniority {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
}

impl Seniority {
    /// Human-readable label, as shown on the job board.
    pub fn label(&self) -> &'static str {
        match self {
            Seniority::Intern => "Intern",
            Seniority::Junior => "Junior",
            Seniority::Mid => "Mid",
            Seniority::Senior => "Senior",
            Seniority::Lead => "Lead",
        }
    }
}

// =============================================================================
// Entity Structs
// =============================================================================

/// A named skill, shared by candidates and job offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skill {
    pub name: String,
}

impl Skill {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A prior role held by a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub title: String,
    pub company: String,
    pub description: String,
}

/// An education entry of a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    pub school: String,
    pub degree: String,
    pub field_of_study: String,
}

/// A document attached to a candidate, with its already-extracted text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeDocument {
    pub original_filename: String,
    pub parsed_text: String,
}

/// A candidate profile as supplied by the entity source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub first_name: String,
    pub last_name: String,
    pub location: String,
    pub headline: String,
    pub summary: String,
    pub skills: Vec<Skill>,
    pub experiences: Vec<Experience>,
    pub educations: Vec<Education>,
    pub resumes: Vec<ResumeDocument>,
}

/// A job offer as supplied by the entity source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOffer {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub required_skills: Vec<Skill>,
    pub seniority: Option<Seniority>,
    pub is_remote: bool,
}

/// Either kind of matchable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Candidate(CandidateProfile),
    JobOffer(JobOffer),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Candidate(_) => EntityKind::Candidate,
            Entity::JobOffer(_) => EntityKind::JobOffer,
        }
    }
}

impl From<CandidateProfile> for Entity {
    fn from(candidate: CandidateProfile) -> Self {
        Entity::Candidate(candidate)
    }
}

impl From<JobOffer> for Entity {
    fn from(offer: JobOffer) -> Self {
        Entity::JobOffer(offer)
    }
}

/// An external ID paired with a similarity or relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
