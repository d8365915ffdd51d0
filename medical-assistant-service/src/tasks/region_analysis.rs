use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::region_metrics::{DataPackage, build_data_package};
use crate::llm::LlmClient;
use crate::models::{
    AnalysisSection, AnalysisSections, HealthRecord, RegionAnalysisRecord,
    RegionAnalysisResponse, RegionStatistics,
};
use crate::storage::HealthStore;

/// Computed statistics plus the four narrative sections for one region.
#[derive(Debug, Clone)]
pub struct RegionAnalysis {
    pub package: DataPackage,
    pub metrics_analysis: Option<String>,
    pub relationships_analysis: Option<String>,
    pub patterns_analysis: Option<String>,
    pub recommendations: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Compute the region statistics and have the model narrate them. A section
/// whose model call fails is left empty.
pub async fn analyze_health_records(
    llm: &dyn LlmClient,
    model: &str,
    records: &[HealthRecord],
) -> RegionAnalysis {
    let package = build_data_package(records);
    info!(
        total_records = package.total_records,
        features = package.features.len(),
        "Computed region statistics"
    );

    let metrics_analysis = llm.try_complete(model, &metrics_prompt(&package)).await;
    let relationships_analysis = llm.try_complete(model, &relationships_prompt(&package)).await;
    let patterns_analysis = llm.try_complete(model, &patterns_prompt(&package)).await;
    let recommendations = llm
        .try_complete(
            model,
            &recommendations_prompt(&package, metrics_analysis.as_deref()),
        )
        .await;

    RegionAnalysis {
        package,
        metrics_analysis,
        relationships_analysis,
        patterns_analysis,
        recommendations,
    }
}

impl RegionAnalysis {
    pub fn to_record(&self, region_id: &str) -> RegionAnalysisRecord {
        RegionAnalysisRecord {
            region_id: region_id.to_string(),
            relationships_analysis: self.relationships_analysis.clone(),
            recommendations: self.recommendations.clone(),
            patterns_analysis: self.patterns_analysis.clone(),
            metrics_analysis: self.metrics_analysis.clone(),
            key_features: self.package.features.clone(),
            total_records: self.package.total_records as i64,
        }
    }

    pub fn into_response(self) -> RegionAnalysisResponse {
        RegionAnalysisResponse {
            analysis_sections: AnalysisSections {
                metrics: AnalysisSection {
                    title: "Health Metrics Analysis",
                    content: self.metrics_analysis,
                },
                relationships: AnalysisSection {
                    title: "Health Indicators Relationships",
                    content: self.relationships_analysis,
                },
                patterns: AnalysisSection {
                    title: "Health Patterns Identified",
                    content: self.patterns_analysis,
                },
                recommendations: AnalysisSection {
                    title: "Healthcare Recommendations",
                    content: self.recommendations,
                },
            },
            statistics: RegionStatistics {
                total_records: self.package.total_records,
                features: self.package.features,
                risk_scores: self.package.risk_scores,
            },
        }
    }
}

/// Insert the region's analysis, or update it in place when one exists.
///
/// Lookup and write are separate store calls; concurrent requests for the
/// same region resolve as last-write-wins.
pub async fn upsert_region_analysis(
    store: &dyn HealthStore,
    record: &RegionAnalysisRecord,
) -> anyhow::Result<UpsertOutcome> {
    let existing = store.find_region_analysis(&record.region_id).await?;

    if existing.is_some() {
        store.update_region_analysis(record).await?;
        info!(
            region_id = %record.region_id,
            total_records = record.total_records,
            "Updated existing region analysis"
        );
        Ok(UpsertOutcome::Updated)
    } else {
        store.insert_region_analysis(record).await?;
        info!(
            region_id = %record.region_id,
            total_records = record.total_records,
            "Created new region analysis"
        );
        Ok(UpsertOutcome::Inserted)
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        warn!("Failed to serialise analysis data: {}", e);
        String::from("{}")
    })
}

fn metrics_prompt(package: &DataPackage) -> String {
    let data = to_pretty_json(&json!({
        "total_records": package.total_records,
        "statistics": package.statistics,
    }));
    format!(
        r#"You are a public health analyst reviewing aggregated health records for one region.

        Describe the key health metrics below: typical values, spread, and any values
        that fall outside normal clinical ranges. Be specific and cite the numbers.

        Health Metrics:
        {data}

        Provide the metrics analysis as plain paragraphs:"#
    )
}

fn relationships_prompt(package: &DataPackage) -> String {
    let data = to_pretty_json(&json!({
        "features": package.features,
        "correlations": package.correlations,
    }));
    format!(
        r#"You are a public health analyst reviewing aggregated health records for one region.

        Explain the most important relationships between the health indicators below.
        Correlation coefficients range from -1 to 1; explain what each strong relationship
        may mean clinically and note that correlation does not establish causation.

        Indicator Relationships:
        {data}

        Provide the relationships analysis as plain paragraphs:"#
    )
}

fn patterns_prompt(package: &DataPackage) -> String {
    let data = to_pretty_json(&json!({
        "risk_scores_percent": package.risk_scores,
        "category_frequencies": package.categories,
    }));
    format!(
        r#"You are a public health analyst reviewing aggregated health records for one region.

        Identify the health patterns in this population: prevalent conditions, the share of
        people above clinical risk thresholds, and any clusters worth attention.

        Population Patterns:
        {data}

        Provide the identified patterns as plain paragraphs:"#
    )
}

fn recommendations_prompt(package: &DataPackage, metrics_analysis: Option<&str>) -> String {
    let data = to_pretty_json(&json!({
        "total_records": package.total_records,
        "risk_scores_percent": package.risk_scores,
        "category_frequencies": package.categories,
    }));
    let metrics = metrics_analysis.unwrap_or("Not available.");
    format!(
        r#"You are a public health advisor.

        Based on the regional health data and metrics analysis below, give concrete,
        prioritised healthcare recommendations for this region: screening programmes,
        prevention campaigns, and resources for the most prevalent risks.

        Regional Data:
        {data}

        Metrics Analysis:
        {metrics}

        Provide the recommendations as a numbered list:"#
    )
}
