use tracing::info;

use crate::storage::HealthStore;

/// Look up the stored analysis of a patient's medical history.
pub async fn fetch_patient_history(
    store: &dyn HealthStore,
    patient_id: &str,
) -> anyhow::Result<Option<String>> {
    let analysis = store.fetch_patient_analysis(patient_id).await?;
    match &analysis {
        Some(text) => info!(
            patient_id = %patient_id,
            "Loaded patient history ({} characters)",
            text.len()
        ),
        None => info!(patient_id = %patient_id, "No stored history for patient"),
    }
    Ok(analysis)
}

/// Prompt block presenting the patient's history to the model.
pub fn patient_history_block(analysis: &str) -> String {
    format!(
        r#"
        PATIENT HISTORICAL DATA AND ANALYSIS:
        The following information represents the patient's historical medical data and analysis:
        {analysis}

        Important:
        - This is verified historical medical data for this specific patient
        - Consider these historical patterns and conditions in your response
        - Ensure your response aligns with the patient's documented medical history
        - Use this historical context to provide more personalized and relevant advice
        "#
    )
}
