use url::Url;

/// Link targets the crawler never follows.
pub const IGNORED_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "rar", "mp3", "mp4", "avi", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "mov",
    "wmv", "svg",
];

/// The domain a crawl is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlScope {
    domain: String,
}

impl CrawlScope {
    /// Derives the scope from the start URL's host with any `www.` prefix removed.
    pub fn from_start_url(start: &Url) -> Option<Self> {
        let host = start.host_str()?.to_ascii_lowercase();
        let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
        if domain.is_empty() {
            return None;
        }
        Some(Self { domain })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// True when the host is the scope domain or one of its subdomains.
    pub fn contains_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        host == self.domain
            || host
                .strip_suffix(&self.domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

    /// Decides whether a resolved link should be queued as a page, returning the
    /// normalized URL when it should.
    pub fn admit_page(&self, link: &Url) -> Option<Url> {
        if !is_navigable(link) {
            return None;
        }
        if !link.host_str().is_some_and(|host| self.contains_host(host)) {
            return None;
        }
        if has_ignored_extension(link) {
            return None;
        }
        Some(normalize_page_url(link))
    }
}

pub fn is_navigable(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

fn has_ignored_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| IGNORED_EXTENSIONS.contains(&ext))
}

/// Drops the fragment so `page#a` and `page#b` dedupe to one entry.
pub fn normalize_page_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}
