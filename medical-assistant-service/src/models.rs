use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::specialists::Specialist;

/// One turn of the caller-held conversation.
///
/// The browser client sends `{role, content}`, older callers `{sender, text}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, alias = "role", deserialize_with = "scalar_text")]
    pub sender: String,
    #[serde(default, alias = "content", deserialize_with = "scalar_text")]
    pub text: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }

    pub fn is_from_bot(&self) -> bool {
        let sender = self.sender.trim();
        sender.eq_ignore_ascii_case("bot") || sender.eq_ignore_ascii_case("assistant")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default, rename = "conversationsNew", deserialize_with = "null_as_default")]
    pub conversation: Vec<ChatMessage>,
    #[serde(default)]
    pub option: Specialist,
    #[serde(default, rename = "imgurl", deserialize_with = "image_reference")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub summary: String,
    #[serde(default, rename = "visit_patient_id", deserialize_with = "identifier")]
    pub patient_id: Option<String>,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_new_chat: bool,
}

impl ChatRequest {
    /// The summary the request starts from; a new chat never inherits one.
    pub fn starting_summary(&self) -> &str {
        if self.is_new_chat { "" } else { &self.summary }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegionAnalysisRequest {
    #[serde(default, deserialize_with = "required_text")]
    pub region_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientAnalysisRequest {
    #[serde(default, deserialize_with = "identifier")]
    pub visit_patient_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientAnalysisResult {
    pub initial_analysis: String,
    pub recommendations: String,
}

impl PatientAnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.initial_analysis.trim().is_empty() && self.recommendations.trim().is_empty()
    }
}

/// A single row of region-level health data. `data` holds the measured
/// fields as reported by the collecting clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: i64,
    pub region_id: String,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub visit_patient_id: String,
    pub data: Value,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionAnalysisRecord {
    pub region_id: String,
    pub relationships_analysis: Option<String>,
    pub recommendations: Option<String>,
    pub patterns_analysis: Option<String>,
    pub metrics_analysis: Option<String>,
    pub key_features: Vec<String>,
    pub total_records: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSection {
    pub title: &'static str,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSections {
    pub metrics: AnalysisSection,
    pub relationships: AnalysisSection,
    pub patterns: AnalysisSection,
    pub recommendations: AnalysisSection,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionStatistics {
    pub total_records: usize,
    pub features: Vec<String>,
    pub risk_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionAnalysisResponse {
    pub analysis_sections: AnalysisSections,
    pub statistics: RegionStatistics,
}

/// Treats an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Identifiers arrive as strings or numbers; blank values and the literal
/// strings `null`/`undefined` that browser clients produce mean "absent".
fn identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return Ok(None),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Region ids are only required to be non-blank.
fn required_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return Ok(None),
    };
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// `NA` is the client's marker for "no image attached". Non-string values
/// count as no image.
fn image_reference<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::String(raw) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    Ok((!trimmed.is_empty() && trimmed != "NA").then(|| trimmed.to_string()))
}

/// A summary that is not a string is discarded.
fn loose_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

/// Accepts JSON booleans and the strings `"true"`/`"false"`; anything else
/// is false.
fn loose_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}
