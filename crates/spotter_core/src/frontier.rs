use std::collections::{HashMap, HashSet, VecDeque};

use crate::candidate::ImageCandidate;

/// Pending page URLs plus every URL ever queued.
///
/// A URL enters the queue at most once, so no page is fetched twice.
#[derive(Debug, Default, Clone)]
pub struct CrawlFrontier {
    pending: VecDeque<String>,
    visited: HashSet<String>,
}

impl CrawlFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(start: impl Into<String>) -> Self {
        let mut frontier = Self::new();
        frontier.push_if_absent(start);
        frontier
    }

    /// Queues `url` unless it was seen before. Returns whether it was queued.
    pub fn push_if_absent(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.visited.contains(&url) {
            return false;
        }
        self.visited.insert(url.clone());
        self.pending.push_back(url);
        true
    }

    pub fn pop(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }
}

/// Deduplicated store of discovered images, keyed by URL, in discovery order.
#[derive(Debug, Default, Clone)]
pub struct CandidateRegistry {
    candidates: Vec<ImageCandidate>,
    index: HashMap<String, usize>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the candidate unless its URL is already known; the first
    /// observation wins. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, candidate: ImageCandidate) -> bool {
        if self.index.contains_key(&candidate.url) {
            return false;
        }
        self.index
            .insert(candidate.url.clone(), self.candidates.len());
        self.candidates.push(candidate);
        true
    }

    pub fn get(&self, url: &str) -> Option<&ImageCandidate> {
        self.index.get(url).map(|&idx| &self.candidates[idx])
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageCandidate> {
        self.candidates.iter()
    }
}

impl FromIterator<ImageCandidate> for CandidateRegistry {
    fn from_iter<I: IntoIterator<Item = ImageCandidate>>(iter: I) -> Self {
        let mut registry = Self::new();
        for candidate in iter {
            registry.insert_if_absent(candidate);
        }
        registry
    }
}
