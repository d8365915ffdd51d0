use serde_json::{Value, json};
use tracing::info;

use crate::llm::LlmClient;
use crate::models::{PatientAnalysisResult, PatientRecord};
use crate::storage::HealthStore;

/// Analyse a patient's visit records. An empty result means nothing could be
/// said about the patient, either because no records exist or because both
/// model calls failed.
pub async fn analyze_patient(
    store: &dyn HealthStore,
    llm: &dyn LlmClient,
    model: &str,
    patient_id: &str,
) -> anyhow::Result<PatientAnalysisResult> {
    let records = store.fetch_patient_records(patient_id).await?;
    if records.is_empty() {
        info!(patient_id = %patient_id, "No visit records for patient");
        return Ok(PatientAnalysisResult::default());
    }

    info!(
        patient_id = %patient_id,
        records = records.len(),
        "Analysing patient visit records"
    );
    let visits = visits_json(&records);

    let initial_analysis = llm
        .try_complete(model, &initial_analysis_prompt(&visits))
        .await
        .unwrap_or_default();
    let recommendations = llm
        .try_complete(model, &recommendations_prompt(&visits, &initial_analysis))
        .await
        .unwrap_or_default();

    Ok(PatientAnalysisResult {
        initial_analysis,
        recommendations,
    })
}

fn visits_json(records: &[PatientRecord]) -> String {
    let visits: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "recorded_at": r.recorded_at.map(|t| t.to_rfc3339()),
                "data": r.data,
            })
        })
        .collect();
    serde_json::to_string_pretty(&visits).unwrap_or_else(|_| String::from("[]"))
}

fn initial_analysis_prompt(visits: &str) -> String {
    format!(
        r#"You are a medical assistant reviewing a patient's visit history.

        Summarise the patient's health status from the visit records below: recurring
        complaints, vital sign trends, diagnoses, and anything that changed between visits.

        Visit Records:
        {visits}

        Provide the initial analysis:"#
    )
}

fn recommendations_prompt(visits: &str, initial_analysis: &str) -> String {
    let analysis = if initial_analysis.trim().is_empty() {
        "Not available."
    } else {
        initial_analysis
    };
    format!(
        r#"You are a medical assistant advising the treating doctor.

        Based on the visit records and initial analysis below, recommend follow-up
        tests, lifestyle changes, and points to monitor at the next visit.

        Visit Records:
        {visits}

        Initial Analysis:
        {analysis}

        Provide the recommendations as a numbered list:"#
    )
}
