//! Profile extraction from user messages.
//!
//! Each turn, the completion provider is asked to pull contact attributes
//! out of the user's message as a fixed-schema JSON object. Extraction is
//! best-effort: a provider error or unparseable reply degrades to an empty
//! profile and never fails the turn. Merging into the stored user record
//! happens in [`crate::store::apply_profile`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use crate::generation::CompletionProvider;
use crate::models::Message;

/// Attributes extracted from a single message. All fields optional; the
/// merge only acts on the ones present and non-empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtractedProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Known `preferences` plus any unexpected keys the model emits.
    #[serde(flatten)]
    pub preferences: Map<String, Value>,
}

impl ExtractedProfile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.company.is_none()
            && self.role.is_none()
            && self.preferences.is_empty()
    }
}

const EXTRACTION_PROMPT: &str = "\
You extract contact and preference information from chat messages.

Return a JSON object with any of these keys that the message supports:
  \"name\": the person's name
  \"email\": their email address
  \"phone\": their phone number
  \"company\": their company or organization
  \"role\": their job title or role
  \"preferences\": an object of stated preferences (budget, location, size, ...)

Only include keys the message actually supports. Return an empty JSON
object {} if nothing is found. Return JSON only, no commentary.

Example:
  Message: \"Hi, I'm Dana from Initech, you can reach me at dana@initech.com\"
  Output: {\"name\": \"Dana\", \"company\": \"Initech\", \"email\": \"dana@initech.com\"}";

/// Ask the provider to extract profile attributes from `message`.
///
/// History is included so pronoun-only follow-ups ("that's my work email")
/// still resolve. Never errors: failures are logged and yield an empty
/// profile.
pub async fn extract(
    completions: &Arc<dyn CompletionProvider>,
    message: &str,
    history: &[Message],
) -> ExtractedProfile {
    let mut user_prompt = String::new();
    for msg in history.iter().rev().take(3).rev() {
        user_prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
    }
    user_prompt.push_str(&format!("Message to extract from: {}", message));

    let raw = match completions
        .complete(EXTRACTION_PROMPT, &user_prompt, 0.0, 300)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "profile extraction unavailable, continuing without");
            return ExtractedProfile::default();
        }
    };

    match parse_extraction(&raw) {
        Some(profile) => profile,
        None => {
            warn!(reply_len = raw.len(), "unparseable extraction reply, ignoring");
            ExtractedProfile::default()
        }
    }
}

/// Lenient parse of the provider's reply: tolerates markdown code fences
/// and surrounding prose as long as a JSON object is present.
pub fn parse_extraction(raw: &str) -> Option<ExtractedProfile> {
    let trimmed = raw.trim();

    let candidate = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        if end <= start {
            return None;
        }
        trimmed[start..=end].to_string()
    };

    let value: Value = serde_json::from_str(&candidate).ok()?;

    // "preferences" may arrive as a nested object; lift its entries so the
    // flatten map holds only preference keys, not the wrapper.
    let mut profile: ExtractedProfile = serde_json::from_value(value).ok()?;
    if let Some(Value::Object(inner)) = profile.preferences.remove("preferences") {
        for (k, v) in inner {
            profile.preferences.insert(k, v);
        }
    }
    Some(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        let profile =
            parse_extraction(r#"{"name": "Sam", "email": "sam@acme.com"}"#).unwrap();
        assert_eq!(profile.name.as_deref(), Some("Sam"));
        assert_eq!(profile.email.as_deref(), Some("sam@acme.com"));
        assert!(profile.phone.is_none());
    }

    #[test]
    fn test_parse_empty_object() {
        let profile = parse_extraction("{}").unwrap();
        assert!(profile.is_empty());
    }

    #[test]
    fn test_parse_strips_code_fence() {
        let raw = "```json\n{\"company\": \"Acme\"}\n```";
        let profile = parse_extraction(raw).unwrap();
        assert_eq!(profile.company.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_parse_extracts_object_from_prose() {
        let raw = "Here is what I found: {\"name\": \"Dana\"} Hope that helps!";
        let profile = parse_extraction(raw).unwrap();
        assert_eq!(profile.name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_extraction("I could not find anything.").is_none());
        assert!(parse_extraction("").is_none());
    }

    #[test]
    fn test_nested_preferences_lifted() {
        let raw = r#"{"name": "Sam", "preferences": {"budget": "50k"}}"#;
        let profile = parse_extraction(raw).unwrap();
        assert_eq!(profile.preferences.get("budget"), Some(&json!("50k")));
        assert!(profile.preferences.get("preferences").is_none());
    }

    #[test]
    fn test_unknown_keys_folded_into_preferences() {
        let raw = r#"{"name": "Sam", "favorite_color": "green"}"#;
        let profile = parse_extraction(raw).unwrap();
        assert_eq!(profile.preferences.get("favorite_color"), Some(&json!("green")));
    }

    #[tokio::test]
    async fn test_extract_degrades_on_provider_failure() {
        use crate::generation::DisabledCompletions;
        let completions: Arc<dyn CompletionProvider> = Arc::new(DisabledCompletions);
        let profile = extract(&completions, "my name is Sam", &[]).await;
        assert!(profile.is_empty());
    }
}
