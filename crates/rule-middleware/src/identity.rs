//! Identity and panel-access collaborators.
//!
//! The rule layer only needs a resolved `{ id, role }` and a few role
//! queries; verifying tokens and storing grants belong to the services
//! behind these traits.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rule_engine::UserContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Guest,
    User,
    Creator,
    Moderator,
    Admin,
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
            Self::Creator => "creator",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "guest" => Ok(Self::Guest),
            "user" => Ok(Self::User),
            "creator" => Ok(Self::Creator),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewContent,
    CreateContent,
    ModerateContent,
    ManageUsers,
    ViewAnalytics,
    ManageSettings,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewContent => "view_content",
            Self::CreateContent => "create_content",
            Self::ModerateContent => "moderate_content",
            Self::ManageUsers => "manage_users",
            Self::ViewAnalytics => "view_analytics",
            Self::ManageSettings => "manage_settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelType {
    Admin,
    Moderation,
    Analytics,
    Creator,
    Settings,
}

impl PanelType {
    pub const ALL: [PanelType; 5] = [
        Self::Admin,
        Self::Moderation,
        Self::Analytics,
        Self::Creator,
        Self::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderation => "moderation",
            Self::Analytics => "analytics",
            Self::Creator => "creator",
            Self::Settings => "settings",
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Resolves a bearer token to a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Option<UserContext>;
}

/// Accepts any bearer token as an anonymous guest.
///
/// No verification takes place: every token, valid or not, resolves to
/// `{ id: "anonymous", role: "guest" }`. Deployments that need real
/// identities plug in their own [`IdentityProvider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderIdentity;

#[async_trait]
impl IdentityProvider for PlaceholderIdentity {
    async fn resolve(&self, bearer_token: &str) -> Option<UserContext> {
        if bearer_token.is_empty() {
            return None;
        }
        Some(UserContext {
            id: "anonymous".to_string(),
            role: UserRole::Guest.as_str().to_string(),
            ..UserContext::default()
        })
    }
}

/// The token of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// ---------------------------------------------------------------------------
// Panel access
// ---------------------------------------------------------------------------

pub trait PanelAccess: Send + Sync {
    fn can_access_panel(&self, user_id: &str, role: UserRole, panel: PanelType) -> bool;

    fn permissions_for(&self, role: UserRole) -> Vec<Permission>;

    /// Every panel the user may open, in [`PanelType::ALL`] order.
    fn panels_for(&self, user_id: &str, role: UserRole) -> Vec<PanelType> {
        PanelType::ALL
            .into_iter()
            .filter(|&panel| self.can_access_panel(user_id, role, panel))
            .collect()
    }

    /// Whether a role name grants administrator access. Unknown roles do not.
    fn is_admin_role(&self, role: &str) -> bool {
        role.parse::<UserRole>().is_ok_and(|r| r.is_admin())
    }
}

/// Role-based grants held in memory.
#[derive(Debug, Clone)]
pub struct StaticPanelAccess {
    panels: HashMap<UserRole, Vec<PanelType>>,
    permissions: HashMap<UserRole, Vec<Permission>>,
}

impl StaticPanelAccess {
    pub fn new() -> Self {
        use PanelType as P;
        use Permission as Perm;

        let panels = HashMap::from([
            (UserRole::Guest, vec![]),
            (UserRole::User, vec![P::Settings]),
            (UserRole::Creator, vec![P::Creator, P::Analytics, P::Settings]),
            (UserRole::Moderator, vec![P::Moderation, P::Settings]),
            (UserRole::Admin, vec![P::Admin, P::Moderation, P::Analytics, P::Settings]),
            (
                UserRole::SuperAdmin,
                vec![P::Admin, P::Moderation, P::Analytics, P::Creator, P::Settings],
            ),
        ]);
        let permissions = HashMap::from([
            (UserRole::Guest, vec![Perm::ViewContent]),
            (UserRole::User, vec![Perm::ViewContent, Perm::CreateContent]),
            (
                UserRole::Creator,
                vec![Perm::ViewContent, Perm::CreateContent, Perm::ViewAnalytics],
            ),
            (
                UserRole::Moderator,
                vec![Perm::ViewContent, Perm::CreateContent, Perm::ModerateContent],
            ),
            (
                UserRole::Admin,
                vec![
                    Perm::ViewContent,
                    Perm::CreateContent,
                    Perm::ModerateContent,
                    Perm::ManageUsers,
                    Perm::ViewAnalytics,
                ],
            ),
            (
                UserRole::SuperAdmin,
                vec![
                    Perm::ViewContent,
                    Perm::CreateContent,
                    Perm::ModerateContent,
                    Perm::ManageUsers,
                    Perm::ViewAnalytics,
                    Perm::ManageSettings,
                ],
            ),
        ]);
        Self {
            panels,
            permissions,
        }
    }

    pub fn grant_panel(mut self, role: UserRole, panel: PanelType) -> Self {
        let panels = self.panels.entry(role).or_default();
        if !panels.contains(&panel) {
            panels.push(panel);
        }
        self
    }
}

impl Default for StaticPanelAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelAccess for StaticPanelAccess {
    fn can_access_panel(&self, _user_id: &str, role: UserRole, panel: PanelType) -> bool {
        self.panels
            .get(&role)
            .is_some_and(|panels| panels.contains(&panel))
    }

    fn permissions_for(&self, role: UserRole) -> Vec<Permission> {
        self.permissions.get(&role).cloned().unwrap_or_default()
    }
}
