//! Agent personas and keyword routing.
//!
//! Each turn is handled by one of three personas. Routing is intentionally
//! dumb: ordered keyword lists over the lowercased message, falling back to
//! the last few turns of history, then to the general persona. The same
//! keyword machinery classifies the conversation category after each turn.

use crate::models::Message;

/// A persona the response is generated as. The selected persona supplies
/// the system prompt; it carries no state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentPersona {
    pub name: &'static str,
    pub display_name: &'static str,
    pub role: &'static str,
    pub instructions: &'static str,
}

impl AgentPersona {
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}, a {}.\n\nInstructions: {}\n\n\
             Always maintain a professional and helpful tone. Base your answers on the \
             provided context when it is relevant, and say so when it is not.",
            self.display_name, self.role, self.instructions
        )
    }
}

pub const LISTING_SPECIALIST: AgentPersona = AgentPersona {
    name: "listing_specialist",
    display_name: "Alex",
    role: "commercial real estate listing specialist",
    instructions: "Answer questions about available properties using the listing details \
                   in the context: addresses, floors, suites, sizes, rents, and brokers. \
                   Quote concrete figures when the context provides them. If no listing \
                   matches, say so rather than inventing one.",
};

pub const PROFILE_COLLECTOR: AgentPersona = AgentPersona {
    name: "profile_collector",
    display_name: "Jordan",
    role: "client relations assistant",
    instructions: "Acknowledge the contact details the client shares and confirm what was \
                   recorded. Ask for at most one missing detail at a time, and never press \
                   if the client declines.",
};

pub const GENERAL_ASSISTANT: AgentPersona = AgentPersona {
    name: "general",
    display_name: "Riley",
    role: "helpful assistant",
    instructions: "Answer general questions conversationally. Offer to help with property \
                   searches or account details when the topic comes up naturally.",
};

const LISTING_KEYWORDS: &[&str] = &[
    "property",
    "rent",
    "lease",
    "office",
    "space",
    "building",
    "address",
    "square feet",
    "sf",
    "floor",
    "suite",
    "broker",
    "real estate",
    "commercial",
    "residential",
    "listing",
    "available",
    "price",
];

const PROFILE_KEYWORDS: &[&str] = &[
    "my name is",
    "i am",
    "contact",
    "email",
    "phone",
    "company",
    "call me",
    "reach me",
    "information",
    "details",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// Pick the persona for this turn.
///
/// Order matters: the current message is checked against listing keywords
/// first, then profile keywords; if neither matches, the last three turns
/// of history are checked for listing topics; otherwise general.
pub fn select_agent(message: &str, history: &[Message]) -> AgentPersona {
    let lowered = message.to_lowercase();

    if contains_any(&lowered, LISTING_KEYWORDS) {
        return LISTING_SPECIALIST;
    }
    if contains_any(&lowered, PROFILE_KEYWORDS) {
        return PROFILE_COLLECTOR;
    }

    let recent: String = history
        .iter()
        .rev()
        .take(3)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    if contains_any(&recent, LISTING_KEYWORDS) {
        return LISTING_SPECIALIST;
    }

    GENERAL_ASSISTANT
}

/// Classify a turn's text (user message plus response) into a conversation
/// category. First matching rule wins.
pub fn classify_category(text: &str) -> &'static str {
    let lowered = text.to_lowercase();

    if contains_any(
        &lowered,
        &["property", "rent", "lease", "listing", "office", "square feet", "broker"],
    ) {
        return "real_estate";
    }
    if contains_any(&lowered, &["my name is", "email", "phone", "contact", "company"]) {
        return "crm";
    }
    if contains_any(&lowered, &["help", "problem", "issue", "error", "not working"]) {
        return "support";
    }
    "general"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(content: &str) -> Message {
        Message {
            id: "m".to_string(),
            conversation_id: "c".to_string(),
            role: "user".to_string(),
            content: content.to_string(),
            metadata: json!({}),
            timestamp: 0,
        }
    }

    #[test]
    fn test_listing_keywords_route_to_specialist() {
        let agent = select_agent("What office space is available downtown?", &[]);
        assert_eq!(agent.name, "listing_specialist");
    }

    #[test]
    fn test_profile_keywords_route_to_collector() {
        let agent = select_agent("My name is Sam and I work at Acme", &[]);
        assert_eq!(agent.name, "profile_collector");
    }

    #[test]
    fn test_listing_beats_profile_on_mixed_message() {
        // "office" (listing) and "email" (profile) both present; listing wins.
        let agent = select_agent("Email me the office listing", &[]);
        assert_eq!(agent.name, "listing_specialist");
    }

    #[test]
    fn test_history_fallback_keeps_listing_topic() {
        let history = vec![
            msg("Tell me about the property on Main St"),
            msg("Sure, it has 1500 square feet"),
        ];
        let agent = select_agent("What about the second one?", &history);
        assert_eq!(agent.name, "listing_specialist");
    }

    #[test]
    fn test_history_fallback_looks_at_last_three_only() {
        let mut history = vec![msg("I want to lease an office")];
        history.extend((0..3).map(|_| msg("just chatting about the weather")));
        let agent = select_agent("anything else?", &history);
        assert_eq!(agent.name, "general");
    }

    #[test]
    fn test_no_match_routes_to_general() {
        let agent = select_agent("Tell me a joke", &[]);
        assert_eq!(agent.name, "general");
    }

    #[test]
    fn test_case_insensitive() {
        let agent = select_agent("ANY OFFICE SPACE?", &[]);
        assert_eq!(agent.name, "listing_specialist");
    }

    #[test]
    fn test_category_rules_ordered() {
        assert_eq!(classify_category("looking to rent an office"), "real_estate");
        assert_eq!(classify_category("my email is a@b.com"), "crm");
        assert_eq!(classify_category("I have a problem logging in"), "support");
        assert_eq!(classify_category("nice weather today"), "general");
        // real_estate outranks crm when both match
        assert_eq!(classify_category("email me the listing"), "real_estate");
    }

    #[test]
    fn test_system_prompt_mentions_persona() {
        let prompt = LISTING_SPECIALIST.system_prompt();
        assert!(prompt.contains("Alex"));
        assert!(prompt.contains("commercial real estate listing specialist"));
    }
}
