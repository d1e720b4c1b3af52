use crate::schema::{ConditionOperator as Op, RuleAction, RuleCategory, RuleCondition, RuleDefinition};

use super::RulePack;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const USERNAME_PATTERN: &str = r"^[A-Za-z0-9_]{3,30}$";
const MINIMUM_AGE: i64 = 13;

/// Account and profile rules. Only evaluated when a user was resolved.
pub struct UserRules;

impl RulePack for UserRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::User
    }

    fn all_rules(&self) -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("user-minimum-age", "Minimum age", RuleCategory::User)
                .describe("Accounts require users to be at least 13")
                .priority(100)
                .when(RuleCondition::new("age", Op::LessThan, MINIMUM_AGE))
                .then(
                    RuleAction::reject("age", "You must be at least 13 to use PlayNite")
                        .code("AGE_RESTRICTED"),
                ),
            RuleDefinition::new("user-email-format", "Email format", RuleCategory::User)
                .priority(90)
                .when(RuleCondition::check("email", Op::Exists).and_not())
                .when(RuleCondition::new("email", Op::Regex, EMAIL_PATTERN))
                .then(RuleAction::reject("email", "Email address is not valid").code("INVALID_EMAIL")),
            RuleDefinition::new("user-username-format", "Username format", RuleCategory::User)
                .priority(80)
                .when(RuleCondition::check("username", Op::Exists).and_not())
                .when(RuleCondition::new("username", Op::Regex, USERNAME_PATTERN))
                .then(
                    RuleAction::reject(
                        "username",
                        "Usernames are 3-30 letters, digits or underscores",
                    )
                    .code("INVALID_USERNAME"),
                ),
            RuleDefinition::new("user-guest-write", "Guest writes", RuleCategory::User)
                .priority(50)
                .when(RuleCondition::new("user.role", Op::Equals, "guest"))
                .when(RuleCondition::new(
                    "request.method",
                    Op::In,
                    vec!["POST", "PUT", "PATCH", "DELETE"],
                ))
                .then(RuleAction::flag("user.role", "Write request from a guest account").code("GUEST_WRITE"))
                .then(RuleAction::log("user.role", "guest write attempt")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, RuleContext, UserContext};
    use crate::packs::testing::{fired, run_pack};
    use serde_json::json;

    fn as_guest(method: &str, data: serde_json::Value) -> RuleContext {
        RuleContext {
            user: Some(UserContext {
                id: "anonymous".into(),
                role: "guest".into(),
                ..UserContext::default()
            }),
            request: Some(RequestContext {
                method: method.into(),
                path: "/api/profile".into(),
                ..RequestContext::default()
            }),
            ..RuleContext::with_data(data)
        }
    }

    #[tokio::test]
    async fn valid_profile_passes() {
        let results = run_pack(
            &UserRules,
            RuleContext::with_data(json!({"email": "kim@playnite.app", "username": "kim_22", "age": 19})),
        )
        .await;
        assert!(fired(&results).is_empty());
    }

    #[tokio::test]
    async fn underage_signup_is_rejected() {
        let results = run_pack(&UserRules, RuleContext::with_data(json!({"age": 12}))).await;
        assert_eq!(fired(&results), vec!["user-minimum-age"]);
        assert_eq!(results[0].validation.errors[0].code, "AGE_RESTRICTED");
    }

    #[tokio::test]
    async fn malformed_email_and_username_are_rejected() {
        let results = run_pack(
            &UserRules,
            RuleContext::with_data(json!({"email": "kim-at-playnite", "username": "no spaces"})),
        )
        .await;
        assert_eq!(fired(&results), vec!["user-email-format", "user-username-format"]);
    }

    #[tokio::test]
    async fn guest_writes_are_flagged_not_rejected() {
        let results = run_pack(&UserRules, as_guest("POST", json!({}))).await;
        assert_eq!(fired(&results), vec!["user-guest-write"]);
        assert!(results.iter().all(|r| r.validation.is_valid));

        let results = run_pack(&UserRules, as_guest("GET", json!({}))).await;
        assert!(fired(&results).is_empty());
    }
}
