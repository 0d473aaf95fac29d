use spotter_core::{CandidateRegistry, CrawlFrontier, ImageCandidate};

#[test]
fn frontier_never_queues_a_url_twice() {
    let mut frontier = CrawlFrontier::seeded("https://s/");
    assert!(!frontier.push_if_absent("https://s/"));
    assert!(frontier.push_if_absent("https://s/a"));
    assert_eq!(frontier.pop().as_deref(), Some("https://s/"));
    assert_eq!(frontier.pop().as_deref(), Some("https://s/a"));
    // Popped URLs stay visited.
    assert!(!frontier.push_if_absent("https://s/a"));
    assert!(frontier.is_empty());
    assert_eq!(frontier.visited_len(), 2);
}

#[test]
fn registry_keeps_first_observation() {
    let mut registry = CandidateRegistry::new();
    assert!(registry.insert_if_absent(ImageCandidate::new(
        "https://s/a.jpg",
        Some(10),
        None,
        "jpg",
        "https://s/one"
    )));
    assert!(!registry.insert_if_absent(ImageCandidate::new(
        "https://s/a.jpg",
        Some(99),
        Some(99),
        "jpg",
        "https://s/two"
    )));
    assert_eq!(registry.len(), 1);
    let stored = registry.get("https://s/a.jpg").unwrap();
    assert_eq!(stored.source_page, "https://s/one");
    assert_eq!(stored.width, Some(10));
}
