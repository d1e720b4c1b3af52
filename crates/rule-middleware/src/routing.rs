use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rule_engine::RuleCategory;
use serde::{Deserialize, Serialize};

/// When a category's rules run for a request.
///
/// A route with `always` runs for every evaluated request; otherwise it runs
/// when the path starts with one of `path_prefixes`, and, with
/// `requires_user`, only when a user was resolved. A route with no prefixes
/// and `always: false` matches any path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub category: RuleCategory,
    #[serde(default)]
    pub always: bool,
    #[serde(default)]
    pub requires_user: bool,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
}

impl RouteConfig {
    fn applies(&self, path: &str, has_user: bool) -> bool {
        if self.always {
            return true;
        }
        if self.requires_user && !has_user {
            return false;
        }
        self.path_prefixes.is_empty() || self.path_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// The routing table PlayNite ships with.
pub fn default_routes() -> Vec<RouteConfig> {
    let prefixes = |ps: &[&str]| ps.iter().map(|p| p.to_string()).collect::<Vec<_>>();
    vec![
        RouteConfig {
            category: RuleCategory::Security,
            always: true,
            requires_user: false,
            path_prefixes: Vec::new(),
        },
        RouteConfig {
            category: RuleCategory::Performance,
            always: true,
            requires_user: false,
            path_prefixes: Vec::new(),
        },
        RouteConfig {
            category: RuleCategory::User,
            always: false,
            requires_user: true,
            path_prefixes: Vec::new(),
        },
        RouteConfig {
            category: RuleCategory::Content,
            always: false,
            requires_user: false,
            path_prefixes: prefixes(&["/api/content", "/api/posts", "/api/stories", "/api/upload"]),
        },
        RouteConfig {
            category: RuleCategory::Business,
            always: false,
            requires_user: false,
            path_prefixes: prefixes(&["/api/business", "/api/payments", "/api/subscriptions"]),
        },
    ]
}

/// Picks the categories to evaluate for a request.
#[derive(Debug, Clone)]
pub struct CategoryRouter {
    routes: Vec<RouteConfig>,
    enabled: Vec<RuleCategory>,
}

impl CategoryRouter {
    pub fn new(routes: Vec<RouteConfig>, enabled: Vec<RuleCategory>) -> Self {
        Self { routes, enabled }
    }

    /// Matching categories in routing-table order, each at most once.
    pub fn select(&self, path: &str, has_user: bool) -> Vec<RuleCategory> {
        let mut selected = Vec::new();
        for route in &self.routes {
            if !self.enabled.contains(&route.category) || selected.contains(&route.category) {
                continue;
            }
            if route.applies(path, has_user) {
                selected.push(route.category);
            }
        }
        selected
    }
}

/// A set of path globs (`*` stays within one segment, `**` spans segments).
#[derive(Debug, Clone)]
pub struct PathSet {
    globs: GlobSet,
}

impl PathSet {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            globs: builder.build()?,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.globs.is_match(path)
    }
}
