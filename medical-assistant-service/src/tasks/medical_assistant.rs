use std::sync::Arc;
use tracing::{info, warn};

use super::image_analysis::{analyze_image, image_analysis_block};
use super::patient_history::{fetch_patient_history, patient_history_block};
use super::summary::{QuestionBudget, create_summary};
use crate::config::ModelConfig;
use crate::llm::LlmClient;
use crate::models::{ChatRequest, ChatResponse};
use crate::specialists::{Specialist, classification_prompt, parse_category};
use crate::storage::{HealthStore, ObjectStore};

/// Returned to the user when the model produced no answer.
pub const APOLOGY: &str = "I apologize, but I'm having trouble processing your request.";

const RESPONSE_GUIDELINES: &str = r#"
    IMPORTANT GUIDELINES:
    1. Ask only ONE question at a time
    2. Do not add medical disclaimers about consulting professionals
    3. Keep responses focused and direct
    4. If multiple questions are needed, wait for user's response before asking the next one
    "#;

/// Optional material gathered before the specialist is prompted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Enrichment {
    pub patient_history: Option<String>,
    pub image_analysis: Option<String>,
}

/// Answers chat turns: gathers context, routes to a specialist and calls the
/// model.
#[derive(Clone)]
pub struct MedicalAssistant {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn HealthStore>,
    objects: Option<Arc<dyn ObjectStore>>,
    models: ModelConfig,
}

impl MedicalAssistant {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn HealthStore>,
        objects: Option<Arc<dyn ObjectStore>>,
        models: ModelConfig,
    ) -> Self {
        Self {
            llm,
            store,
            objects,
            models,
        }
    }

    /// Answer one validated chat turn. Enrichment failures only remove the
    /// affected context; a failed completion yields the apology and the
    /// summary the turn started with.
    pub async fn respond(&self, question: &str, request: &ChatRequest) -> ChatResponse {
        let specialist = request.option;
        let previous_summary = request.starting_summary();
        info!(specialist = ?specialist, "Handling chat turn");

        let enrichment = self.gather_enrichment(request).await;

        let summary = match &request.patient_id {
            Some(_) => {
                create_summary(
                    self.llm.as_ref(),
                    &self.models.general,
                    &request.conversation,
                    previous_summary,
                )
                .await
            }
            None => previous_summary.to_string(),
        };

        if specialist == Specialist::Default {
            self.log_classification(question).await;
        }

        let prompt = build_prompt(
            specialist,
            question,
            &enrichment,
            QuestionBudget::assess(&request.conversation),
            &summary,
        );

        let model = specialist.model_id(&self.models);
        match self.llm.try_complete(model, &prompt).await {
            Some(response) => ChatResponse { response, summary },
            None => {
                warn!(specialist = ?specialist, "No answer from model, returning apology");
                ChatResponse {
                    response: APOLOGY.to_string(),
                    summary: previous_summary.to_string(),
                }
            }
        }
    }

    /// Run the optional enrichment steps. This is the single place that
    /// decides a failed step is cosmetic.
    pub async fn gather_enrichment(&self, request: &ChatRequest) -> Enrichment {
        let mut enrichment = Enrichment::default();

        if let Some(patient_id) = &request.patient_id {
            match fetch_patient_history(self.store.as_ref(), patient_id).await {
                Ok(history) => enrichment.patient_history = history,
                Err(e) => warn!(
                    patient_id = %patient_id,
                    "Patient history unavailable, continuing without it: {}", e
                ),
            }
        }

        if let Some(image_url) = &request.image_url {
            match &self.objects {
                Some(objects) => {
                    match analyze_image(
                        objects.as_ref(),
                        self.llm.as_ref(),
                        &self.models.vision,
                        image_url,
                    )
                    .await
                    {
                        Ok(analysis) => enrichment.image_analysis = Some(analysis),
                        Err(e) => warn!("Image analysis unavailable, continuing without it: {}", e),
                    }
                }
                None => warn!("Image attached but object storage is not configured"),
            }
        }

        enrichment
    }

    /// The classification is informational only; routing follows the
    /// caller's option code.
    async fn log_classification(&self, question: &str) {
        let category = self
            .llm
            .try_complete(&self.models.general, &classification_prompt(question))
            .await
            .and_then(|reply| parse_category(&reply))
            .unwrap_or_default();
        info!(category = %category.code(), "Query classified");
    }
}

/// Assemble the full prompt for the specialist model.
pub fn build_prompt(
    specialist: Specialist,
    question: &str,
    enrichment: &Enrichment,
    budget: QuestionBudget,
    summary: &str,
) -> String {
    let mut system = specialist.base_prompt(question);

    if let Some(history) = &enrichment.patient_history {
        system.push_str(&patient_history_block(history));
    }
    if let Some(analysis) = &enrichment.image_analysis {
        system.push_str(&image_analysis_block(analysis));
    }
    system.push_str(budget.directive());
    system.push_str(RESPONSE_GUIDELINES);

    format!(
        "System: {system}\n\nConversation History Summary:\n{summary}\n\nCurrent Query: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use crate::storage::InMemoryHealthStore;
    use crate::tasks::test_support::{ScriptedLlm, StaticObjects, UnavailableStore, png_bytes};
    use crate::tasks::summary::NO_PREVIOUS_CONTEXT;

    const IMAGE_URL: &str = "https://abc.supabase.co/storage/v1/object/public/scans/knee.png";

    fn assistant(
        llm: Arc<ScriptedLlm>,
        store: Arc<InMemoryHealthStore>,
        objects: Option<Arc<StaticObjects>>,
    ) -> MedicalAssistant {
        MedicalAssistant::new(
            llm,
            store,
            objects.map(|o| o as Arc<dyn ObjectStore>),
            ModelConfig::default(),
        )
    }

    fn request(option: Specialist) -> ChatRequest {
        ChatRequest {
            question: Some("My knee is swollen".to_string()),
            option,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn specialist_prompt_reaches_specialist_model() {
        let llm = Arc::new(ScriptedLlm::replying("Likely a meniscus injury."));
        let assistant = assistant(llm.clone(), Arc::new(InMemoryHealthStore::new()), None);

        let mut req = request(Specialist::Treatment);
        req.summary = "- knee pain".into();
        let response = assistant.respond("My knee is swollen", &req).await;

        assert_eq!(response.response, "Likely a meniscus injury.");
        assert_eq!(response.summary, "- knee pain");

        let (model, prompt) = llm.prompt_containing("Treatment specialist").unwrap();
        assert_eq!(model, ModelConfig::default().specialist);
        assert!(prompt.ends_with("Current Query: My knee is swollen"));
        // Without a patient there is no summary call and no classification.
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn default_route_classifies_but_keeps_default_template() {
        let llm = Arc::new(
            ScriptedLlm::replying("Could you describe the swelling?")
                .on("medical query classifier", "Category: S"),
        );
        let assistant = assistant(llm.clone(), Arc::new(InMemoryHealthStore::new()), None);

        let response = assistant
            .respond("My knee is swollen", &request(Specialist::Default))
            .await;
        assert_eq!(response.response, "Could you describe the swelling?");

        let (model, prompt) = llm.prompt_containing("Current Query:").unwrap();
        assert_eq!(model, ModelConfig::default().general);
        assert!(prompt.contains(r#"Based on the query: "My knee is swollen""#));
        assert!(!prompt.contains("Symptom specialist"));
    }

    #[tokio::test]
    async fn completion_failure_returns_apology_and_previous_summary() {
        let llm = Arc::new(
            ScriptedLlm::failing().on("create an updated medical summary", "- updated"),
        );
        let store = Arc::new(InMemoryHealthStore::new());
        let assistant = assistant(llm, store, None);

        let mut req = request(Specialist::Symptoms);
        req.summary = "- knee pain".into();
        req.patient_id = Some("p-9".into());
        req.conversation = vec![ChatMessage::new("user", "It hurts")];

        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.response, APOLOGY);
        assert_eq!(response.summary, "- knee pain");
    }

    #[tokio::test]
    async fn patient_turn_updates_summary_and_uses_history() {
        let llm = Arc::new(
            ScriptedLlm::replying("Given your gout history, this may be a flare.")
                .on("create an updated medical summary", "- swollen knee\n- gout history"),
        );
        let store = Arc::new(InMemoryHealthStore::new());
        store.set_patient_analysis("p-1", "Recurrent gout, on allopurinol");
        let assistant = assistant(llm.clone(), store, None);

        let mut req = request(Specialist::Diagnosis);
        req.patient_id = Some("p-1".into());
        req.conversation = vec![ChatMessage::new("user", "My knee is swollen")];

        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.summary, "- swollen knee\n- gout history");

        let (_, prompt) = llm.prompt_containing("Diagnosis specialist").unwrap();
        assert!(prompt.contains("Recurrent gout, on allopurinol"));
        assert!(prompt.contains("- swollen knee\n- gout history"));
    }

    #[tokio::test]
    async fn patient_turn_with_empty_conversation_keeps_placeholder_summary() {
        let llm = Arc::new(ScriptedLlm::replying("ok"));
        let assistant = assistant(llm, Arc::new(InMemoryHealthStore::new()), None);

        let mut req = request(Specialist::Rare);
        req.patient_id = Some("p-1".into());
        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.summary, NO_PREVIOUS_CONTEXT);
    }

    #[tokio::test]
    async fn new_chat_starts_from_empty_summary() {
        let llm = Arc::new(ScriptedLlm::replying("ok"));
        let assistant = assistant(llm.clone(), Arc::new(InMemoryHealthStore::new()), None);

        let mut req = request(Specialist::Precautions);
        req.summary = "- stale summary".into();
        req.is_new_chat = true;

        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.summary, "");
        let (_, prompt) = llm.prompt_containing("Drug Interaction specialist").unwrap();
        assert!(!prompt.contains("stale summary"));
    }

    #[tokio::test]
    async fn image_findings_are_added_to_prompt() {
        let llm = Arc::new(ScriptedLlm::replying("ok").with_vision("Joint effusion visible"));
        let objects = Arc::new(StaticObjects::serving(png_bytes()));
        let assistant = assistant(
            llm.clone(),
            Arc::new(InMemoryHealthStore::new()),
            Some(objects.clone()),
        );

        let mut req = request(Specialist::Symptoms);
        req.image_url = Some(IMAGE_URL.into());
        assistant.respond("My knee is swollen", &req).await;

        assert_eq!(objects.downloads(), 1);
        let (_, prompt) = llm.prompt_containing("Symptom specialist").unwrap();
        assert!(prompt.contains("CURRENT IMAGE ANALYSIS:\nJoint effusion visible"));
    }

    #[tokio::test]
    async fn failed_enrichment_degrades_to_absent() {
        let llm = Arc::new(ScriptedLlm::replying("ok"));
        let objects = Arc::new(StaticObjects::unavailable());
        let assistant = assistant(
            llm.clone(),
            Arc::new(InMemoryHealthStore::new()),
            Some(objects),
        );

        let mut req = request(Specialist::Symptoms);
        req.image_url = Some(IMAGE_URL.into());
        req.patient_id = Some("unknown-patient".into());

        let enrichment = assistant.gather_enrichment(&req).await;
        assert_eq!(enrichment, Enrichment::default());

        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.response, "ok");
    }

    #[tokio::test]
    async fn unreachable_history_store_still_answers() {
        let llm = Arc::new(ScriptedLlm::replying("Ice and elevate the knee."));
        let assistant = MedicalAssistant::new(
            llm.clone(),
            Arc::new(UnavailableStore),
            None,
            ModelConfig::default(),
        );

        let mut req = request(Specialist::Treatment);
        req.patient_id = Some("p-9".into());

        let enrichment = assistant.gather_enrichment(&req).await;
        assert!(enrichment.patient_history.is_none());

        let response = assistant.respond("My knee is swollen", &req).await;
        assert_eq!(response.response, "Ice and elevate the knee.");
        let (_, prompt) = llm.prompt_containing("Current Query:").unwrap();
        assert!(!prompt.contains("PATIENT HISTORICAL DATA AND ANALYSIS:"));
    }

    #[test]
    fn prompt_sections_appear_in_order() {
        let enrichment = Enrichment {
            patient_history: Some("HISTORY-MARK".into()),
            image_analysis: Some("IMAGE-MARK".into()),
        };
        let prompt = build_prompt(
            Specialist::Symptoms,
            "QUESTION-MARK",
            &enrichment,
            QuestionBudget::Exhausted,
            "SUMMARY-MARK",
        );

        let positions: Vec<usize> = [
            "Symptom specialist",
            "HISTORY-MARK",
            "IMAGE-MARK",
            "CRITICAL INSTRUCTION",
            "IMPORTANT GUIDELINES",
            "SUMMARY-MARK",
            "Current Query: QUESTION-MARK",
        ]
        .iter()
        .map(|needle| prompt.find(needle).unwrap())
        .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn available_budget_permits_one_question() {
        let prompt = build_prompt(
            Specialist::Default,
            "q",
            &Enrichment::default(),
            QuestionBudget::Available,
            "",
        );
        assert!(prompt.contains("Ask only ONE clear question"));
        assert!(!prompt.contains("CRITICAL INSTRUCTION"));
        assert!(!prompt.contains("PATIENT HISTORICAL DATA"));
    }
}
