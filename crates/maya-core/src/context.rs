//! Context Assembler: system instruction + initial message list for one turn.
//!
//! Pure with respect to its inputs; the date is passed in so callers (and tests) control it.

use crate::store::Profile;
use crate::types::{ImageAttachment, KnowledgeResult, Message};
use chrono::NaiveDate;

const BASE_RULES: &str = "RULES:
1. Search only when the answer is not already known: real-time data (prices, weather, news) or facts missing from LOCAL_DATA and your training. Otherwise answer directly.
2. For technical claims, LOCAL_DATA is the primary source of truth; prefer it over search results and your own training.
3. If you use the search tool, summarize the findings clearly and accurately. List multiple facts as bullets.
4. Be concise, direct, and professional. Avoid small talk unless the user starts it.
5. Match your tone to MOOD.";

const VISUAL_PROTOCOL: &str = "VISUAL ANALYSIS PROTOCOL (an image is attached):
1. Classification: state what kind of image this is (photo, screenshot, diagram, document, chart, code).
2. Extraction: transcribe any visible text, numbers, or code exactly.
3. Entities: list the notable objects, people, UI elements, or components.
4. Verification: re-check the extracted details against the image before answering; say so when something is unreadable.";

/// Builds the per-turn system prompt and opening messages.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    assistant_name: String,
    default_identity: String,
}

/// Output of [`ContextAssembler::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    pub system_prompt: String,
    /// `[system, user]` with the user message multimodal when an image is attached.
    pub messages: Vec<Message>,
}

impl ContextAssembler {
    pub fn new(assistant_name: impl Into<String>, default_identity: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
            default_identity: default_identity.into(),
        }
    }

    pub fn build(
        &self,
        profile: &Profile,
        knowledge: &KnowledgeResult,
        user_message: &str,
        image: Option<&ImageAttachment>,
        today: NaiveDate,
    ) -> TurnContext {
        let system_prompt = self.system_prompt(profile, knowledge, image.is_some(), today);
        let user = match image {
            Some(image) => Message::UserMultimodal {
                text: user_message.to_string(),
                image: image.clone(),
            },
            None => Message::User(user_message.to_string()),
        };
        TurnContext {
            messages: vec![Message::System(system_prompt.clone()), user],
            system_prompt,
        }
    }

    /// [`build`](Self::build) with today's local date.
    pub fn build_now(
        &self,
        profile: &Profile,
        knowledge: &KnowledgeResult,
        user_message: &str,
        image: Option<&ImageAttachment>,
    ) -> TurnContext {
        let today = chrono::Local::now().date_naive();
        self.build(profile, knowledge, user_message, image, today)
    }

    fn system_prompt(
        &self,
        profile: &Profile,
        knowledge: &KnowledgeResult,
        has_image: bool,
        today: NaiveDate,
    ) -> String {
        let user_name = profile.identity_name(&self.default_identity);
        let mut out = format!(
            "ROLE: You are {}, a sophisticated, concise, and helpful live agentic AI. User: {}.\n",
            self.assistant_name, user_name
        );
        if let Some(role) = profile.get("role").filter(|s| !s.trim().is_empty()) {
            out.push_str(&format!("USER ROLE: {}\n", role.trim()));
        }
        if let Some(tech) = profile.get("tech").filter(|s| !s.trim().is_empty()) {
            out.push_str(&format!("USER STACK: {}\n", tech.trim()));
        }
        out.push_str(&format!("DATE: {}\n", today.format("%A, %B %d, %Y")));
        out.push_str(&format!("MOOD: {}\n", knowledge.mood));
        out.push_str(&format!("LOCAL_DATA: {}\n\n", knowledge.fact));
        out.push_str(BASE_RULES);
        if has_image {
            out.push_str("\n\n");
            out.push_str(VISUAL_PROTOCOL);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn profile() -> Profile {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), "Suhash".to_string());
        values.insert("tech".to_string(), "C++, React".to_string());
        Profile::new(values)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    #[test]
    fn text_context_has_identity_date_mood_and_fact() {
        let assembler = ContextAssembler::new("Maya", "User");
        let knowledge = KnowledgeResult::new("Tokio 1.x is stable", "FOCUSED");
        let ctx = assembler.build(&profile(), &knowledge, "hi", None, date());

        assert!(ctx.system_prompt.contains("You are Maya"));
        assert!(ctx.system_prompt.contains("User: Suhash."));
        assert!(ctx.system_prompt.contains("USER STACK: C++, React"));
        assert!(ctx.system_prompt.contains("DATE: Saturday, October 17, 2026"));
        assert!(ctx.system_prompt.contains("MOOD: FOCUSED"));
        assert!(ctx.system_prompt.contains("LOCAL_DATA: Tokio 1.x is stable"));
        assert!(!ctx.system_prompt.contains("VISUAL ANALYSIS PROTOCOL"));

        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0], Message::System(ctx.system_prompt.clone()));
        assert_eq!(ctx.messages[1], Message::User("hi".to_string()));
    }

    #[test]
    fn image_context_is_multimodal_with_visual_protocol() {
        let assembler = ContextAssembler::new("Maya", "User");
        let image = ImageAttachment {
            media_type: "image/png".into(),
            base64: "iVBORw0K".into(),
        };
        let ctx = assembler.build(
            &profile(),
            &KnowledgeResult::fallback(),
            "what is this?",
            Some(&image),
            date(),
        );

        assert!(ctx.system_prompt.contains("VISUAL ANALYSIS PROTOCOL"));
        let protocol_order = ["Classification", "Extraction", "Entities", "Verification"]
            .iter()
            .map(|k| ctx.system_prompt.find(k).unwrap())
            .collect::<Vec<_>>();
        assert!(protocol_order.windows(2).all(|w| w[0] < w[1]));
        assert!(matches!(
            &ctx.messages[1],
            Message::UserMultimodal { text, image: img } if text == "what is this?" && img == &image
        ));
    }

    #[test]
    fn missing_identity_uses_default() {
        let assembler = ContextAssembler::new("Maya", "Guest");
        let ctx = assembler.build(&Profile::default(), &KnowledgeResult::fallback(), "hi", None, date());
        assert!(ctx.system_prompt.contains("User: Guest."));
        assert!(ctx.system_prompt.contains("MOOD: NEUTRAL"));
        assert!(ctx.system_prompt.contains("LOCAL_DATA: No data found."));
    }
}
