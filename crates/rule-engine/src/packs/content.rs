use crate::schema::{
    ActionType, ConditionOperator as Op, RuleAction, RuleCategory, RuleCondition, RuleDefinition,
};

use super::RulePack;

const MAX_TITLE_CHARS: i64 = 200;
const MAX_DESCRIPTION_CHARS: i64 = 5_000;
const MAX_TAGS: i64 = 30;
const MAX_UPLOAD_BYTES: i64 = 100 * 1024 * 1024;
/// Methods that carry no content body to validate.
const READ_METHODS: [&str; 4] = ["GET", "HEAD", "OPTIONS", "DELETE"];

/// Validation of posts, stories and their media.
pub struct ContentRules;

impl RulePack for ContentRules {
    fn category(&self) -> RuleCategory {
        RuleCategory::Content
    }

    fn all_rules(&self) -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("content-title-required", "Title required", RuleCategory::Content)
                .priority(100)
                .describe("Submissions need a title; reads and deletes are exempt")
                .when(RuleCondition::check("title", Op::NotExists).and_not())
                .when(RuleCondition::new("request.method", Op::In, READ_METHODS.to_vec()))
                .then(RuleAction::reject("title", "Title is required").code("TITLE_REQUIRED"))
                .tag("required"),
            RuleDefinition::new("content-title-length", "Title length", RuleCategory::Content)
                .priority(90)
                .when(RuleCondition::new("title", Op::LengthGreaterThan, MAX_TITLE_CHARS))
                .then(
                    RuleAction::reject("title", "Title must be 200 characters or fewer")
                        .code("TITLE_TOO_LONG"),
                ),
            RuleDefinition::new("content-media-type", "Supported media type", RuleCategory::Content)
                .describe("Uploads must be an image, a video or a story")
                .priority(85)
                .when(RuleCondition::new("media_type", Op::NotIn, vec!["image", "video", "story"]))
                .then(RuleAction::reject("media_type", "Unsupported media type").code("INVALID_MEDIA_TYPE")),
            RuleDefinition::new(
                "content-description-length",
                "Description length",
                RuleCategory::Content,
            )
            .priority(80)
            .when(RuleCondition::new("description", Op::LengthGreaterThan, MAX_DESCRIPTION_CHARS))
            .then(
                RuleAction::reject("description", "Description must be 5000 characters or fewer")
                    .code("DESCRIPTION_TOO_LONG"),
            ),
            RuleDefinition::new("content-file-size", "Upload size", RuleCategory::Content)
                .priority(75)
                .when(RuleCondition::new("file_size", Op::GreaterThan, MAX_UPLOAD_BYTES))
                .then(RuleAction::reject("file_size", "Files are limited to 100MB").code("FILE_TOO_LARGE")),
            RuleDefinition::new("content-spam-phrases", "Spam phrases", RuleCategory::Content)
                .priority(70)
                .when(
                    RuleCondition::new(
                        "title",
                        Op::Regex,
                        r"(?i)\b(free money|click here|buy now|limited offer)\b",
                    )
                    .or(),
                )
                .when(RuleCondition::new(
                    "description",
                    Op::Regex,
                    r"(?i)\b(free money|click here|buy now|limited offer)\b",
                ))
                .then(RuleAction::flag("description", "Content looks like spam").code("POSSIBLE_SPAM"))
                .then(RuleAction::new(ActionType::Notify).on("moderation").message("Queued for review"))
                .tag("moderation"),
            RuleDefinition::new("content-tag-limit", "Tag limit", RuleCategory::Content)
                .priority(60)
                .when(RuleCondition::new("tags", Op::LengthGreaterThan, MAX_TAGS))
                .then(RuleAction::flag("tags", "More than 30 tags; extra tags may be ignored").code("TOO_MANY_TAGS")),
        ]
    }
}
