//! Queue access policy types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::bucket_source_arn;

/// Service principal S3 uses when publishing notifications
pub const S3_SERVICE_PRINCIPAL: &str = "s3.amazonaws.com";

/// Action S3 needs on the destination queue
pub const SQS_SEND_MESSAGE: &str = "SQS:SendMessage";

/// Condition key carrying the ARN of the publishing bucket
pub const SOURCE_ARN_KEY: &str = "aws:SourceArn";

/// IAM Policy Document (AWS-compatible)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy version (should be "2012-10-17")
    #[serde(default = "default_version")]
    pub version: String,

    /// Policy ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Policy statements
    pub statement: Vec<Statement>,
}

fn default_version() -> String {
    "2012-10-17".to_string()
}

impl PolicyDocument {
    /// Create a new empty policy
    pub fn new() -> Self {
        Self {
            version: default_version(),
            id: None,
            statement: Vec::new(),
        }
    }

    /// Policy letting S3 publish notifications from `bucket` to the queue
    pub fn queue_publish_policy(queue_arn: &str, bucket: &str) -> Self {
        let mut source = HashMap::new();
        source.insert(
            SOURCE_ARN_KEY.to_string(),
            StringOrArray::String(bucket_source_arn(bucket)),
        );
        let mut condition = HashMap::new();
        condition.insert("ArnLike".to_string(), source);

        let mut principal = HashMap::new();
        principal.insert(
            "Service".to_string(),
            StringOrArray::String(S3_SERVICE_PRINCIPAL.to_string()),
        );

        let statement = Statement::allow()
            .with_sid("AllowS3BucketNotifications")
            .with_principal(Principal::Specific(principal))
            .with_actions(vec![SQS_SEND_MESSAGE.to_string()])
            .with_resources(vec![queue_arn.to_string()])
            .with_condition(condition);

        Self::new()
            .with_id(format!("{}/S3WatcherPolicy", queue_arn))
            .add_statement(statement)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a statement
    pub fn add_statement(mut self, statement: Statement) -> Self {
        self.statement.push(statement);
        self
    }

    /// Whether S3 may publish to `queue_arn` on behalf of the bucket `source_arn`
    pub fn allows_publish(&self, queue_arn: &str, source_arn: &str) -> bool {
        let mut allowed = false;

        for statement in &self.statement {
            if !statement.grants_publish(queue_arn, source_arn) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }

        allowed
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect (Allow or Deny)
    pub effect: Effect,

    /// Principal (who this applies to)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    /// Actions
    #[serde(default)]
    pub action: StringOrArray,

    /// Resources
    #[serde(default)]
    pub resource: StringOrArray,

    /// Conditions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<HashMap<String, HashMap<String, StringOrArray>>>,
}

impl Statement {
    /// Create a new allow statement
    pub fn allow() -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: StringOrArray::Array(vec![]),
            resource: StringOrArray::Array(vec![]),
            condition: None,
        }
    }

    /// Create a new deny statement
    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::allow()
        }
    }

    /// Set statement ID
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Set actions
    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.action = StringOrArray::Array(actions);
        self
    }

    /// Set resources
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resource = StringOrArray::Array(resources);
        self
    }

    pub fn with_condition(
        mut self,
        condition: HashMap<String, HashMap<String, StringOrArray>>,
    ) -> Self {
        self.condition = Some(condition);
        self
    }

    fn grants_publish(&self, queue_arn: &str, source_arn: &str) -> bool {
        let principal_match = self
            .principal
            .as_ref()
            .map_or(false, |p| p.matches(S3_SERVICE_PRINCIPAL));

        principal_match
            && self.matches_action(SQS_SEND_MESSAGE)
            && self.matches_resource(queue_arn)
            && self.matches_source(source_arn)
    }

    fn matches_action(&self, action: &str) -> bool {
        // IAM action names are case-insensitive
        let action = action.to_ascii_lowercase();
        self.action
            .as_slice()
            .iter()
            .any(|pattern| matches_wildcard(&pattern.to_ascii_lowercase(), &action))
    }

    fn matches_resource(&self, resource: &str) -> bool {
        let resources = self.resource.as_slice();

        if resources.is_empty() {
            return true; // No resource restriction
        }

        resources
            .iter()
            .any(|pattern| matches_wildcard(pattern, resource))
    }

    /// Only the `ArnLike`/`ArnEquals` conditions on `aws:SourceArn` are evaluated
    fn matches_source(&self, source_arn: &str) -> bool {
        let Some(ref condition) = self.condition else {
            return true;
        };

        for (operator, entries) in condition {
            let Some(patterns) = entries.get(SOURCE_ARN_KEY) else {
                continue;
            };
            let matched = match operator.as_str() {
                "ArnLike" | "StringLike" => patterns
                    .as_slice()
                    .iter()
                    .any(|p| matches_wildcard(p, source_arn)),
                "ArnEquals" | "StringEquals" => {
                    patterns.as_slice().iter().any(|p| p == source_arn)
                }
                _ => true,
            };
            if !matched {
                return false;
            }
        }

        true
    }
}

/// Effect type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Policy principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// Wildcard (anyone)
    Wildcard(String),
    /// Specific principals
    Specific(HashMap<String, StringOrArray>),
}

impl Principal {
    /// Match against a principal identifier
    pub fn matches(&self, principal: &str) -> bool {
        match self {
            Principal::Wildcard(s) => s == "*",
            Principal::Specific(map) => map.values().any(|values| {
                values
                    .as_slice()
                    .iter()
                    .any(|value| matches_wildcard(value, principal))
            }),
        }
    }
}

/// String or array of strings (common in IAM policies)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrArray {
    String(String),
    Array(Vec<String>),
}

impl StringOrArray {
    pub fn as_slice(&self) -> &[String] {
        match self {
            StringOrArray::String(s) => std::slice::from_ref(s),
            StringOrArray::Array(arr) => arr.as_slice(),
        }
    }
}

impl Default for StringOrArray {
    fn default() -> Self {
        StringOrArray::Array(vec![])
    }
}

/// Simple wildcard matching (supports * and ?)
fn matches_wildcard(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Let the last * absorb one more character
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_ARN: &str = "arn:aws:sqs:us-east-1:123456789012:s3watcher-b-abc";

    #[test]
    fn test_wildcard_matching() {
        assert!(matches_wildcard("*", "anything"));
        assert!(matches_wildcard("sqs:*", "sqs:sendmessage"));
        assert!(matches_wildcard("arn:aws:s3:*:*:b", "arn:aws:s3:::b"));
        assert!(matches_wildcard("a?c", "abc"));
        assert!(!matches_wildcard("arn:aws:s3:*:*:b", "arn:aws:s3:::other"));
        assert!(!matches_wildcard("abc", "abcd"));
    }

    #[test]
    fn test_queue_publish_policy_shape() {
        let policy = PolicyDocument::queue_publish_policy(QUEUE_ARN, "b");
        let json: serde_json::Value = serde_json::from_str(&policy.to_json()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        assert_eq!(json["Id"], format!("{}/S3WatcherPolicy", QUEUE_ARN));
        let statement = &json["Statement"][0];
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Principal"]["Service"], "s3.amazonaws.com");
        assert_eq!(statement["Action"][0], "SQS:SendMessage");
        assert_eq!(statement["Resource"][0], QUEUE_ARN);
        assert_eq!(
            statement["Condition"]["ArnLike"]["aws:SourceArn"],
            "arn:aws:s3:*:*:b"
        );
    }

    #[test]
    fn test_allows_publish_scoped_to_bucket() {
        let policy = PolicyDocument::queue_publish_policy(QUEUE_ARN, "b");

        assert!(policy.allows_publish(QUEUE_ARN, "arn:aws:s3:::b"));
        assert!(!policy.allows_publish(QUEUE_ARN, "arn:aws:s3:::other"));
        assert!(!policy.allows_publish("arn:aws:sqs:us-east-1:123456789012:x", "arn:aws:s3:::b"));
        assert!(!PolicyDocument::new().allows_publish(QUEUE_ARN, "arn:aws:s3:::b"));
    }

    #[test]
    fn test_explicit_deny() {
        let mut principal = HashMap::new();
        principal.insert(
            "Service".to_string(),
            StringOrArray::String(S3_SERVICE_PRINCIPAL.to_string()),
        );
        let policy = PolicyDocument::queue_publish_policy(QUEUE_ARN, "b").add_statement(
            Statement::deny()
                .with_principal(Principal::Specific(principal))
                .with_actions(vec!["sqs:*".to_string()])
                .with_resources(vec!["*".to_string()]),
        );

        assert!(!policy.allows_publish(QUEUE_ARN, "arn:aws:s3:::b"));
    }

    #[test]
    fn test_parse_policy_round_trip() {
        let policy = PolicyDocument::queue_publish_policy(QUEUE_ARN, "b");
        let parsed: PolicyDocument = serde_json::from_str(&policy.to_json()).unwrap();
        assert_eq!(parsed, policy);
    }
}
