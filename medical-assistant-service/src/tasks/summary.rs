use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::models::ChatMessage;

/// How many trailing messages the question budget looks at.
pub const QUESTION_WINDOW: usize = 6;
/// Bot questions within the window after which the assistant must conclude.
pub const QUESTION_LIMIT: usize = 2;
/// How many trailing messages are folded into the running summary.
pub const SUMMARY_WINDOW: usize = 3;

pub const NO_PREVIOUS_CONTEXT: &str = "No previous context.";
pub const SUMMARY_UNAVAILABLE: &str = "Error updating context.";

const CONCLUDE_DIRECTIVE: &str = r#"
        CRITICAL INSTRUCTION:
        You have asked enough questions. Now provide a complete analysis based on all available information:
        - Summarize what you've learned
        - Provide your assessment
        - Give clear recommendations
        Do not ask any more questions.
        "#;

const ONE_QUESTION_DIRECTIVE: &str = r#"
        If you need more information:
        - Ask only ONE clear question
        - Wait for the user's response before asking another
        "#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionBudget {
    /// The assistant may ask at most one new question.
    Available,
    /// Enough questions were asked; the next reply must be conclusive.
    Exhausted,
}

impl QuestionBudget {
    /// Count bot messages containing a question mark among the last
    /// [`QUESTION_WINDOW`] messages.
    pub fn assess(conversation: &[ChatMessage]) -> Self {
        let start = conversation.len().saturating_sub(QUESTION_WINDOW);
        let asked = conversation[start..]
            .iter()
            .filter(|m| m.is_from_bot() && m.text.contains('?'))
            .count();

        if asked >= QUESTION_LIMIT {
            QuestionBudget::Exhausted
        } else {
            QuestionBudget::Available
        }
    }

    pub fn directive(&self) -> &'static str {
        match self {
            QuestionBudget::Available => ONE_QUESTION_DIRECTIVE,
            QuestionBudget::Exhausted => CONCLUDE_DIRECTIVE,
        }
    }
}

/// Fold the latest turns into the running bullet-point summary.
///
/// The summary is never lost: with nothing new to fold in, or when the model
/// call fails, the previous summary comes back unchanged.
pub async fn create_summary(
    llm: &dyn LlmClient,
    model: &str,
    conversation: &[ChatMessage],
    previous_summary: &str,
) -> String {
    let fallback = |placeholder: &str| {
        if previous_summary.is_empty() {
            placeholder.to_string()
        } else {
            previous_summary.to_string()
        }
    };

    if conversation.is_empty() {
        return fallback(NO_PREVIOUS_CONTEXT);
    }

    let prompt = summary_prompt(conversation, previous_summary);
    match llm.complete(model, &prompt).await {
        Ok(summary) => {
            info!("Conversation summary updated ({} characters)", summary.len());
            summary
        }
        Err(e) => {
            warn!("Summary update failed, keeping previous summary: {}", e);
            fallback(SUMMARY_UNAVAILABLE)
        }
    }
}

fn summary_prompt(conversation: &[ChatMessage], previous_summary: &str) -> String {
    let start = conversation.len().saturating_sub(SUMMARY_WINDOW);
    let new_messages = conversation[start..]
        .iter()
        .map(|m| {
            let sender = if m.sender.is_empty() { "unknown" } else { m.sender.as_str() };
            format!("{}: {}", sender, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"
        Based on the previous summary and new conversation, create an updated medical summary.

        Previous Summary:
        {previous_summary}

        New Conversation:
        {new_messages}

        Rules for updating summary:
        - Maintain key information from previous summary
        - Add new relevant medical information
        - Remove outdated or superseded information
        - Keep format as bullet points
        - Focus on:
          * Symptoms progression
          * New findings
          * Test results
          * Treatment responses
          * Current concerns

        Format: Bullet points only
        Focus: Medical relevance and progression of conversation
        "#
    )
}
