//! Deterministic text projection of entities.
//!
//! Each entity is flattened into one text blob before embedding. Empty or
//! whitespace-only fields are dropped entirely, so the output never carries
//! a dangling prefix or doubled separator.

use jobmatch_core::types::{CandidateProfile, Entity, JobOffer, Skill};

/// Project any entity into the text that gets embedded.
pub fn project(entity: &Entity) -> String {
    match entity {
        Entity::Candidate(candidate) => project_candidate(candidate),
        Entity::JobOffer(offer) => project_job_offer(offer),
    }
}

/// Headline, summary, skills, experiences, education, then each parsed document.
pub fn project_candidate(candidate: &CandidateProfile) -> String {
    let mut parts = Segments::default();

    parts.push(&candidate.headline);
    parts.push(&candidate.summary);
    parts.push_prefixed("Skills: ", &skill_names(&candidate.skills));

    let experiences = join_non_empty(candidate.experiences.iter().map(|exp| {
        join_non_empty([
            exp.title.as_str(),
            exp.company.as_str(),
            exp.description.as_str(),
        ])
    }));
    parts.push_prefixed("Experience: ", &experiences);

    let educations = join_non_empty(candidate.educations.iter().map(|edu| {
        join_non_empty([
            edu.school.as_str(),
            edu.degree.as_str(),
            edu.field_of_study.as_str(),
        ])
    }));
    parts.push_prefixed("Education: ", &educations);

    for resume in &candidate.resumes {
        parts.push_prefixed("Document: ", &resume.parsed_text);
    }

    parts.finish()
}

/// Title, description, required skills, level, location and remote flag.
pub fn project_job_offer(offer: &JobOffer) -> String {
    let mut parts = Segments::default();

    parts.push(&offer.title);
    parts.push(&offer.description);
    parts.push_prefixed("Required skills: ", &skill_names(&offer.required_skills));
    if let Some(seniority) = offer.seniority {
        parts.push_prefixed("Level: ", seniority.label());
    }
    parts.push_prefixed("Location: ", &offer.location);
    if offer.is_remote {
        parts.push("Remote work possible");
    }

    parts.finish()
}

fn skill_names(skills: &[Skill]) -> String {
    join_non_empty(skills.iter().map(|s| s.name.as_str()))
}

/// Join the trimmed, non-empty items with single spaces.
fn join_non_empty<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for item in items {
        let item = item.as_ref().trim();
        if item.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(item);
    }
    out
}

#[derive(Default)]
struct Segments(Vec<String>);

impl Segments {
    fn push(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.0.push(text.to_string());
        }
    }

    fn push_prefixed(&mut self, prefix: &str, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.0.push(format!("{}{}", prefix, text));
        }
    }

    fn finish(self) -> String {
        self.0.join(" ")
    }
}
