//! Pattern-matched dispatch over (method, path), per spec §4.3.

use std::collections::HashMap;

use crate::config::RouteOptions;
use crate::error::ConfigurationError;

/// One slash-delimited segment of a registered route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    Literal(String),
    Wildcard,
    Named(String),
}

pub struct Route<H> {
    pub method: String,
    pub pattern: String,
    pub components: Vec<Component>,
    pub handler: H,
    pub options: RouteOptions,
}

impl<H> std::fmt::Debug for Route<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("components", &self.components)
            .finish()
    }
}

/// Outcome of [`RouteTable::find`].
pub enum Match<'a, H> {
    /// A route's path and method both matched.
    Found { route: &'a Route<H>, named_parameters: HashMap<String, String> },
    /// At least one route's path matched, but none with this method.
    /// Carries the set of methods that *would* have matched, for the
    /// synthesized `Allow` header.
    WrongMethod(Vec<String>),
    /// No route's path matched.
    WrongPath,
}

/// Split a pattern or request path into components. An empty string or
/// `"/"` yields zero components.
fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Component>, ConfigurationError> {
    let mut components = Vec::new();
    for (idx, seg) in split_path(pattern).into_iter().enumerate() {
        if seg == "*" {
            components.push(Component::Wildcard);
        } else if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(ConfigurationError::InvalidPattern(
                    pattern.to_string(),
                    "named segment is missing a name",
                ));
            }
            components.push(Component::Named(name.to_string()));
        } else if seg.is_empty() {
            return Err(ConfigurationError::InvalidPattern(
                pattern.to_string(),
                "empty path segment",
            ));
        } else {
            components.push(Component::Literal(seg.to_string()));
        }
        // A wildcard is only legal as the trailing component.
        if matches!(components.last(), Some(Component::Wildcard)) && idx + 1 != split_path(pattern).len() {
            return Err(ConfigurationError::InvalidPattern(
                pattern.to_string(),
                "wildcard must be the final segment",
            ));
        }
    }
    Ok(components)
}

/// Specificity score used to sort routes: lower is more specific.
/// Literals sort before named segments, which sort before a wildcard, at
/// each position; this is expressed as a tuple sorted lexicographically.
fn specificity(components: &[Component]) -> Vec<u8> {
    components
        .iter()
        .map(|c| match c {
            Component::Literal(_) => 0,
            Component::Named(_) => 1,
            Component::Wildcard => 2,
        })
        .collect()
}

pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
    sorted: bool,
    frozen: bool,
}

impl<H> Default for RouteTable<H> {
    fn default() -> RouteTable<H> {
        RouteTable::new()
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> RouteTable<H> {
        RouteTable { routes: Vec::new(), sorted: false, frozen: false }
    }

    /// Routes may only be added before the table is frozen (spec §5:
    /// "The RouteTable is immutable after `server.start()`").
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn add(
        &mut self,
        method: &str,
        pattern: &str,
        handler: H,
        options: RouteOptions,
    ) -> Result<(), ConfigurationError> {
        if self.frozen {
            return Err(ConfigurationError::RoutesFrozen);
        }
        let components = parse_pattern(pattern)?;
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            pattern: pattern.to_string(),
            components,
            handler,
            options,
        });
        self.sorted = false;
        Ok(())
    }

    /// Remove a previously registered route by (method, pattern). Returns
    /// `true` if a route was removed.
    pub fn remove(&mut self, method: &str, pattern: &str) -> bool {
        let method = method.to_ascii_uppercase();
        let before = self.routes.len();
        self.routes.retain(|r| !(r.method == method && r.pattern == pattern));
        before != self.routes.len()
    }

    fn sort_if_needed(&mut self) {
        if self.sorted {
            return;
        }
        // Stable sort preserves registration order for ties, as required.
        self.routes.sort_by(|a, b| specificity(&a.components).cmp(&specificity(&b.components)));
        self.sorted = true;
    }

    /// Look up a route by method and path. Sorts the table lazily on first
    /// lookup (or after any mutation).
    pub fn find(&mut self, method: &str, path: &str) -> Match<H> {
        self.sort_if_needed();
        let segments = split_path(path);
        let mut path_matched_methods = Vec::new();
        let mut first_path_match: Option<(usize, HashMap<String, String>)> = None;

        for (idx, route) in self.routes.iter().enumerate() {
            if let Some(bound) = match_components(&route.components, &segments) {
                if !path_matched_methods.contains(&route.method) {
                    path_matched_methods.push(route.method.clone());
                }
                if first_path_match.is_none() {
                    first_path_match = Some((idx, bound.clone()));
                }
                if route.method.eq_ignore_ascii_case(method) {
                    return Match::Found {
                        route: &self.routes[idx],
                        named_parameters: bound,
                    };
                }
            }
        }

        if first_path_match.is_some() {
            Match::WrongMethod(path_matched_methods)
        } else {
            Match::WrongPath
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn match_components(components: &[Component], segments: &[&str]) -> Option<HashMap<String, String>> {
    let mut bound = HashMap::new();
    let mut ci = 0;
    let mut si = 0;
    while ci < components.len() {
        match &components[ci] {
            Component::Wildcard => {
                let rest = segments.get(si..).unwrap_or(&[]).join("/");
                bound.insert("*".to_string(), rest);
                return Some(bound);
            }
            Component::Literal(lit) => {
                if segments.get(si) != Some(&lit.as_str()) {
                    return None;
                }
                si += 1;
            }
            Component::Named(name) => {
                let seg = segments.get(si)?;
                if seg.is_empty() {
                    return None;
                }
                bound.insert(name.clone(), seg.to_string());
                si += 1;
            }
        }
        ci += 1;
    }
    if si == segments.len() {
        Some(bound)
    } else {
        None
    }
}
