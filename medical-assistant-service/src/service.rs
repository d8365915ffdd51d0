use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ModelConfig,
    error::{ApiError, ApiResult},
    llm::LlmClient,
    models::{
        ChatRequest, ChatResponse, PatientAnalysisRequest, PatientAnalysisResult,
        RegionAnalysisRequest, RegionAnalysisResponse,
    },
    storage::{HealthStore, ObjectStore},
    tasks::{MedicalAssistant, analyze_health_records, analyze_patient, upsert_region_analysis},
};

#[derive(Clone)]
pub struct AppState {
    pub assistant: MedicalAssistant,
    pub llm: Arc<dyn LlmClient>,
    pub store: Arc<dyn HealthStore>,
    pub models: ModelConfig,
}

impl AppState {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn HealthStore>,
        objects: Option<Arc<dyn ObjectStore>>,
        models: ModelConfig,
    ) -> Self {
        let assistant =
            MedicalAssistant::new(llm.clone(), store.clone(), objects, models.clone());
        Self {
            assistant,
            llm,
            store,
            models,
        }
    }
}

pub fn create_app(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin: HeaderValue = cors_origin
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid CORS origin {:?}: {}", cors_origin, e))?;
    Ok(build_router(state, origin))
}

fn build_router(state: AppState, origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/doctor/chat-ai", post(chat_ai))
        .route("/chronic-disease", post(chronic_disease))
        .route("/analysis", post(patient_analysis))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Medical Assistant Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Specialist-routed medical chat with regional and patient health analysis",
        "endpoints": {
            "POST /doctor/chat-ai": "Answer a chat turn and return the updated summary",
            "POST /chronic-disease": "Analyse the health records of a region",
            "POST /analysis": "Analyse a patient's visit records",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_ai(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let question = required_field(request.question.as_deref(), "No question provided")?;
    info!(
        specialist = ?request.option,
        has_image = request.image_url.is_some(),
        has_patient = request.patient_id.is_some(),
        "Received chat request"
    );

    let assistant = state.assistant.clone();
    let response = tokio::spawn(async move { assistant.respond(&question, &request).await })
        .await
        .map_err(|e| {
            error!("Chat turn aborted: {}", e);
            ApiError::internal("Failed to process chat request")
        })?;

    Ok(Json(response))
}

async fn chronic_disease(
    State(state): State<AppState>,
    Json(request): Json<RegionAnalysisRequest>,
) -> ApiResult<RegionAnalysisResponse> {
    let region_id = required_field(request.region_id.as_deref(), "No region ID provided")?;
    info!(region_id = %region_id, "Starting region health analysis");

    let records = state
        .store
        .fetch_health_records(&region_id)
        .await
        .map_err(|e| {
            error!(region_id = %region_id, "Failed to load health records: {:#}", e);
            ApiError::internal_for(
                "Failed to analyse region health data",
                "region_id",
                Some(region_id.clone()),
            )
        })?;

    if records.is_empty() {
        return Err(ApiError::not_found_for(
            "No health records found for this region",
            "region_id",
            &region_id,
        ));
    }

    let analysis =
        analyze_health_records(state.llm.as_ref(), &state.models.general, &records).await;

    if let Err(e) =
        upsert_region_analysis(state.store.as_ref(), &analysis.to_record(&region_id)).await
    {
        warn!(
            region_id = %region_id,
            "Failed to save region analysis, returning it unsaved: {:#}", e
        );
    }

    Ok(Json(analysis.into_response()))
}

async fn patient_analysis(
    State(state): State<AppState>,
    Json(request): Json<PatientAnalysisRequest>,
) -> ApiResult<PatientAnalysisResult> {
    let patient_id =
        required_field(request.visit_patient_id.as_deref(), "No patient ID provided")?;
    info!(patient_id = %patient_id, "Starting patient analysis");

    let result = analyze_patient(
        state.store.as_ref(),
        state.llm.as_ref(),
        &state.models.general,
        &patient_id,
    )
    .await
    .map_err(|e| {
        error!(patient_id = %patient_id, "Patient analysis failed: {:#}", e);
        ApiError::internal("Failed to analyse patient records")
    })?;

    if result.is_empty() {
        return Err(ApiError::not_found("No analysis available for this patient"));
    }

    Ok(Json(result))
}

fn required_field(value: Option<&str>, message: &str) -> Result<String, ApiError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::bad_request(message)),
    }
}
