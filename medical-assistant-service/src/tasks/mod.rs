pub mod image_analysis;
pub mod medical_assistant;
pub mod patient_analysis;
pub mod patient_history;
pub mod region_analysis;
pub mod region_metrics;
pub mod summary;

#[cfg(test)]
pub mod test_support;

pub use medical_assistant::MedicalAssistant;
pub use patient_analysis::analyze_patient;
pub use region_analysis::{RegionAnalysis, UpsertOutcome, analyze_health_records, upsert_region_analysis};
