use std::collections::HashSet;

use crate::event::UsedDocs;
use crate::types::Citation;

/// Candidate pool for one in-flight answer. Each `sources` event replaces the
/// pool wholesale; `used_docs` is resolved against whatever pool is current.
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    candidates: Vec<Citation>,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_candidates(&mut self, candidates: Vec<Citation>) {
        self.candidates = candidates;
    }

    pub fn candidates(&self) -> &[Citation] {
        &self.candidates
    }

    pub fn resolve(&self, used: UsedDocs) -> Vec<Citation> {
        let citations = match used {
            UsedDocs::Resolved(citations) => citations,
            UsedDocs::Ids(ids) => ids
                .iter()
                .map(|id| self.lookup(id).unwrap_or_else(|| Citation::placeholder(id)))
                .collect(),
        };
        dedup_by_id(citations)
    }

    fn lookup(&self, id: &str) -> Option<Citation> {
        self.candidates
            .iter()
            .find(|candidate| candidate.id == id)
            .cloned()
    }
}

fn dedup_by_id(citations: Vec<Citation>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|citation| seen.insert(citation.id.clone()))
        .collect()
}
