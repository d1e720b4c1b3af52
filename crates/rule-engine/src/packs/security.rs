use crate::schema::{ConditionOperator as Op, RuleAction, RuleCategory, RuleCondition, RuleDefinition};

use super::RulePack;

const SCRIPT_INJECTION: &str = r"(?i)(<\s*script\b|javascript:|on(error|load)\s*=)";
const MAX_REQUEST_BYTES: i64 = 50 * 1024 * 1024;

/// Request-level protections. Evaluated for every request that is not skipped.
pub struct SecurityRules;

impl RulePack for SecurityRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }

    fn all_rules(&self) -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("security-moderation-panel", "Moderation panel", RuleCategory::Security)
                .describe("Moderation endpoints need access to the moderation panel")
                .priority(100)
                .when(RuleCondition::new("request.path", Op::StartsWith, "/api/moderation").and_not())
                .when(RuleCondition::new("user.panels", Op::Contains, "moderation"))
                .then(
                    RuleAction::block("user.panels", "Moderation panel access required")
                        .code("PANEL_ACCESS_DENIED"),
                )
                .tag("rbac"),
            RuleDefinition::new("security-script-injection", "Script injection", RuleCategory::Security)
                .priority(95)
                .when(RuleCondition::new("request.decoded_query", Op::Regex, SCRIPT_INJECTION).or())
                .when(RuleCondition::new("comment", Op::Regex, SCRIPT_INJECTION).or())
                .when(RuleCondition::new("description", Op::Regex, SCRIPT_INJECTION))
                .then(RuleAction::block("request", "Request contains script content").code("XSS_DETECTED"))
                .then(RuleAction::log("request.decoded_query", "script injection attempt")),
            RuleDefinition::new("security-payload-size", "Payload size", RuleCategory::Security)
                .priority(90)
                .when(RuleCondition::new("request.content_length", Op::GreaterThan, MAX_REQUEST_BYTES))
                .then(
                    RuleAction::block("request.content_length", "Request body exceeds 50MB")
                        .code("PAYLOAD_TOO_LARGE"),
                ),
            RuleDefinition::new("security-missing-user-agent", "Missing user agent", RuleCategory::Security)
                .priority(40)
                .when(RuleCondition::check("metadata.user_agent", Op::NotExists))
                .then(RuleAction::flag("metadata.user_agent", "Request has no user agent").code("NO_USER_AGENT")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, RuleContext, UserContext};
    use crate::packs::testing::{fired, run_pack};
    use serde_json::json;

    fn request(target: &str, panels: Option<Vec<&str>>) -> RuleContext {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let mut ctx = RuleContext {
            user: panels.map(|panels| UserContext {
                id: "u-1".into(),
                role: "user".into(),
                panels: panels.iter().map(|p| p.to_string()).collect(),
                ..UserContext::default()
            }),
            request: Some(RequestContext {
                method: "GET".into(),
                path: path.into(),
                decoded_query: query.into(),
                ..RequestContext::default()
            }),
            ..RuleContext::default()
        };
        ctx.metadata.user_agent = Some("PlayNite/2.1".into());
        ctx
    }

    #[tokio::test]
    async fn moderation_requires_the_panel() {
        let results = run_pack(&SecurityRules, request("/api/moderation/queue", Some(vec!["settings"]))).await;
        assert_eq!(fired(&results), vec!["security-moderation-panel"]);
        assert_eq!(results[0].validation.errors[0].code, "PANEL_ACCESS_DENIED");

        let results = run_pack(&SecurityRules, request("/api/moderation/queue", None)).await;
        assert_eq!(fired(&results), vec!["security-moderation-panel"]);

        let granted = request("/api/moderation/queue", Some(vec!["moderation", "settings"]));
        assert!(fired(&run_pack(&SecurityRules, granted).await).is_empty());

        let elsewhere = request("/api/admin/users", Some(vec![]));
        assert!(fired(&run_pack(&SecurityRules, elsewhere).await).is_empty());
    }

    #[tokio::test]
    async fn script_in_query_or_comment_is_blocked() {
        let results = run_pack(
            &SecurityRules,
            request("/api/search?q=<script>alert(1)</script>", None),
        )
        .await;
        assert_eq!(fired(&results), vec!["security-script-injection"]);

        let mut ctx = request("/api/comments", None);
        ctx.data = Some(json!({"comment": "nice <img src=x onerror=alert(1)>"}));
        let results = run_pack(&SecurityRules, ctx).await;
        assert_eq!(fired(&results), vec!["security-script-injection"]);
        assert!(results.iter().any(|r| !r.validation.is_valid));
    }

    #[tokio::test]
    async fn oversized_body_and_missing_agent() {
        let mut ctx = request("/api/content", None);
        ctx.metadata.user_agent = None;
        if let Some(req) = ctx.request.as_mut() {
            req.content_length = Some(60 * 1024 * 1024);
        }
        let results = run_pack(&SecurityRules, ctx).await;
        assert_eq!(
            fired(&results),
            vec!["security-payload-size", "security-missing-user-agent"]
        );
    }
}
