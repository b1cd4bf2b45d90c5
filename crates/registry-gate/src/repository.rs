//! Repository extraction from registry API paths.
//!
//! Registry API paths have the form
//! `/v2/<repository>/(manifests|blobs|tags|referrers)/<rest>`, where the
//! repository may itself contain slashes. The first repository segment is the
//! tenant namespace on the backend, the second is the cluster namespace that
//! access is checked against.

/// Path segments that terminate the repository part of a registry API path.
const MARKERS: [&str; 4] = ["/manifests/", "/blobs/", "/tags/", "/referrers/"];

const API_PREFIX: &str = "/v2/";

/// Whether `segment` is `.` or `..`, literally or percent-encoded.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Extract the repository path from a registry API path.
///
/// Matching is greedy: when a marker segment appears more than once, the last
/// occurrence ends the repository. Returns `None` for paths without a
/// repository, such as `/v2/` or `/v2/_catalog`.
///
/// Paths with dot segments or backslashes anywhere are refused. URL
/// normalization on the way to the backend would resolve them, so the
/// forwarded repository could differ from the one checked here.
pub fn repository_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(API_PREFIX)?;
    if rest.contains('\\') || rest.split('/').any(is_dot_segment) {
        return None;
    }

    let end = MARKERS
        .iter()
        .filter_map(|marker| rest.rfind(marker))
        .filter(|&pos| pos > 0)
        .max()?;

    // Repository names never contain escapes; an encoded slash would hide a
    // namespace boundary from `RepositoryRef::parse`.
    let repository = rest.get(..end)?;
    if repository.contains('%') || repository.chars().any(char::is_whitespace) {
        return None;
    }
    Some(repository)
}

/// A repository targeted by a registry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Full repository path; used as the upstream token scope and cache key.
    pub path: String,
    /// First path segment.
    pub tenant_namespace: String,
    /// Second path segment, if the repository has one.
    pub authorization_namespace: Option<String>,
}

impl RepositoryRef {
    /// Parse the repository out of a registry API path.
    pub fn parse(path: &str) -> Option<Self> {
        repository_from_path(path).map(Self::from_repository)
    }

    /// Split an already extracted repository path into its namespaces.
    pub fn from_repository(repository: &str) -> Self {
        let mut segments = repository.split('/');
        let tenant_namespace = segments.next().unwrap_or_default().to_string();
        let authorization_namespace = segments
            .next()
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        Self {
            path: repository.to_string(),
            tenant_namespace,
            authorization_namespace,
        }
    }
}
