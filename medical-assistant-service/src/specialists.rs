//! Option-code routing to specialist prompt templates.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::ModelConfig;

/// The specialist a chat turn is routed to. Unknown codes select `Default`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Specialist {
    Symptoms,
    Diagnosis,
    Treatment,
    Precautions,
    Rare,
    #[default]
    Default,
}

/// Which configured model a specialist runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Specialist,
    General,
}

impl ModelRole {
    pub fn model_id<'a>(&self, models: &'a ModelConfig) -> &'a str {
        match self {
            ModelRole::Specialist => &models.specialist,
            ModelRole::General => &models.general,
        }
    }
}

struct Profile {
    specialist: Specialist,
    code: &'static str,
    role: ModelRole,
    template: &'static str,
}

static PROFILES: [Profile; 5] = [
    Profile {
        specialist: Specialist::Symptoms,
        code: "S",
        role: ModelRole::Specialist,
        template: SYMPTOMS_PROMPT,
    },
    Profile {
        specialist: Specialist::Diagnosis,
        code: "D",
        role: ModelRole::Specialist,
        template: DIAGNOSIS_PROMPT,
    },
    Profile {
        specialist: Specialist::Treatment,
        code: "T",
        role: ModelRole::Specialist,
        template: TREATMENT_PROMPT,
    },
    Profile {
        specialist: Specialist::Precautions,
        code: "P",
        role: ModelRole::Specialist,
        template: PRECAUTIONS_PROMPT,
    },
    Profile {
        specialist: Specialist::Rare,
        code: "R",
        role: ModelRole::Specialist,
        template: RARE_CONDITIONS_PROMPT,
    },
];

impl Specialist {
    /// Map a caller-supplied option code. Anything unrecognised, including
    /// the empty string, falls through to the default assistant.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        PROFILES
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .map(|p| p.specialist)
            .unwrap_or(Specialist::Default)
    }

    fn profile(&self) -> Option<&'static Profile> {
        PROFILES.iter().find(|p| p.specialist == *self)
    }

    pub fn code(&self) -> &'static str {
        self.profile().map(|p| p.code).unwrap_or("DEFAULT")
    }

    pub fn model_role(&self) -> ModelRole {
        self.profile().map(|p| p.role).unwrap_or(ModelRole::General)
    }

    pub fn model_id<'a>(&self, models: &'a ModelConfig) -> &'a str {
        self.model_role().model_id(models)
    }

    /// The specialist's base prompt. The default assistant's template quotes
    /// the user's query.
    pub fn base_prompt(&self, question: &str) -> String {
        match self.profile() {
            Some(profile) => profile.template.to_string(),
            None => DEFAULT_PROMPT.replace("{query}", question),
        }
    }
}

impl<'de> Deserialize<'de> for Specialist {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(code) => Specialist::from_code(&code),
            _ => Specialist::Default,
        })
    }
}

/// Prompt asking the general model to categorise a query.
pub fn classification_prompt(query: &str) -> String {
    CLASSIFIER_PROMPT.replace("{query}", query)
}

/// Parse a `Category: X` reply. Returns `None` when the reply does not follow
/// the format.
pub fn parse_category(reply: &str) -> Option<Specialist> {
    let first_line = reply.lines().find(|l| !l.trim().is_empty())?;
    let (_, category) = first_line.split_once(':')?;
    let category = category.trim().trim_matches(|c| c == '[' || c == ']');
    if category.eq_ignore_ascii_case("DEFAULT") {
        return Some(Specialist::Default);
    }
    PROFILES
        .iter()
        .find(|p| p.code.eq_ignore_ascii_case(category))
        .map(|p| p.specialist)
}

const SYMPTOMS_PROMPT: &str = r#"
        You are a Symptom specialist. Your role is to:

        If insufficient information:
        - First provide your initial assessment of symptoms
        - Then ask ONE specific follow-up question if needed
        - Limited to 1 follow-up question only

        If sufficient information:
        - List top 3 likely conditions
        - Brief reasoning for each
        - Key next steps

        Format your response in paragraphs:
        1. Your assessment of current information
        2. A clear follow-up question if needed
        OR
        1. List of conditions with reasoning
        2. Suggested next steps

        Do not use labels like 'ANALYSIS:' or 'QUESTION:' - integrate naturally into text.
        "#;

const DIAGNOSIS_PROMPT: &str = r#"
        You are a Diagnosis specialist. Your role is to:

        1. Begin with your current understanding based on available information
        2. If critical info missing:
           - Add ONE specific question within your response
           - Explain briefly why you need this information
        3. Always include:
           - Current diagnostic indicators
           - Potential diagnoses based on available info

        Format your response as natural paragraphs without labels.
        Integrate any questions smoothly into your response.
        "#;

const TREATMENT_PROMPT: &str = r#"
        You are a Treatment specialist. Your role is to:

        1. Focus on specific treatment approaches for known conditions
        2. Provide information about:
           - First-line treatments
           - Alternative options
           - Treatment timelines
           - Expected outcomes

        3. Keep responses:
           - Evidence-based
           - Direct and practical
           - Focused on actionable steps
        "#;

const PRECAUTIONS_PROMPT: &str = r#"
        You are a Precaution & Drug Interaction specialist. Your role is to:

        1. Explain specific drug interactions between:
           - Medications
           - Foods
           - Supplements

        2. Provide clear information about:
           - Timing of medications
           - Storage requirements
           - Common side effects
           - Warning signs

        3. Keep responses:
           - Factual and specific
           - Focused on practical guidance
           - Direct and clear
        "#;

const RARE_CONDITIONS_PROMPT: &str = r#"
        You are a Rare Conditions specialist. Your role is to:

        1. Provide specific information about:
           - Rare disease characteristics
           - Typical progression patterns
           - Key indicators and markers

        2. Focus on:
           - Latest research findings
           - Treatment approaches
           - Management strategies

        3. Keep responses:
           - Evidence-based
           - Specific to the condition
           - Clear and structured
        "#;

const DEFAULT_PROMPT: &str = r#"
            Based on the query: "{query}"

            Your role is to:
            . Ask only ONE question at a time if you are asking question
            1. Understand the medical concern comprehensively
            2. Consider the conversation history for context
            3. Incorporate any image analysis if available
            4. Provide clear, structured responses
            5. Ask relevant follow-up questions when needed
        "#;

const CLASSIFIER_PROMPT: &str = r#"You are a medical query classifier.
        Analyze this medical query, conversation history, and any image analysis.

        Your task is to analyze user questions and route them to the appropriate specialist:

        Symptoms Specialist (S) → Questions about signs of illness and general symptom-related concerns.
        Diagnosis Specialist (D) → Questions about medical tests and identifying conditions.
        Treatment Specialist (T) → Questions about treatments, medications, and recovery processes.
        Precaution Specialist (P) → Questions about medication safety and drug interactions.
        Complex Cases Specialist (R) → Questions about rare diseases and complex conditions.

        Query: {query}

        Respond only with:
        Category: [S/D/T/P/R/DEFAULT]
        "#;
