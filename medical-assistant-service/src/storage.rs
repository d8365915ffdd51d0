use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde_json::{Map, Value};
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use std::{sync::Arc, time::Duration};
use tracing::info;
use uuid::Uuid;

use crate::models::{HealthRecord, PatientRecord, RegionAnalysisRecord};

/// Access to the health data store.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn fetch_health_records(&self, region_id: &str) -> anyhow::Result<Vec<HealthRecord>>;
    async fn fetch_patient_records(&self, patient_id: &str) -> anyhow::Result<Vec<PatientRecord>>;
    /// The stored analysis text for a patient, if any. Blank text counts as none.
    async fn fetch_patient_analysis(&self, patient_id: &str) -> anyhow::Result<Option<String>>;
    async fn find_region_analysis(
        &self,
        region_id: &str,
    ) -> anyhow::Result<Option<RegionAnalysisRecord>>;
    async fn insert_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()>;
    async fn update_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()>;
}

/// Postgres implementation of HealthStore
pub struct PostgresHealthStore {
    pool: PgPool,
}

impl PostgresHealthStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to health database");
        Ok(Self { pool })
    }
}

type RegionAnalysisRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<Vec<String>>,
    Option<i32>,
);

#[async_trait]
impl HealthStore for PostgresHealthStore {
    async fn fetch_health_records(&self, region_id: &str) -> anyhow::Result<Vec<HealthRecord>> {
        let rows = sqlx::query_as::<_, (i64, String, Json<Value>)>(
            "SELECT id, region_id, data FROM health_records WHERE region_id = $1 ORDER BY id",
        )
        .bind(region_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, region_id, Json(data))| HealthRecord {
                id,
                region_id,
                data: match data {
                    Value::Object(fields) => fields,
                    _ => Map::new(),
                },
            })
            .collect())
    }

    async fn fetch_patient_records(&self, patient_id: &str) -> anyhow::Result<Vec<PatientRecord>> {
        let rows = sqlx::query_as::<_, (String, Json<Value>, Option<DateTime<Utc>>)>(
            "SELECT visit_patient_id, data, recorded_at FROM patient_records \
             WHERE visit_patient_id = $1 ORDER BY recorded_at NULLS FIRST",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(visit_patient_id, Json(data), recorded_at)| PatientRecord {
                visit_patient_id,
                data,
                recorded_at,
            })
            .collect())
    }

    async fn fetch_patient_analysis(&self, patient_id: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT analysis FROM patient_analysis WHERE visit_patient_id = $1 LIMIT 1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .and_then(|(analysis,)| analysis)
            .filter(|a| !a.trim().is_empty()))
    }

    async fn find_region_analysis(
        &self,
        region_id: &str,
    ) -> anyhow::Result<Option<RegionAnalysisRecord>> {
        let row = sqlx::query_as::<_, RegionAnalysisRow>(
            "SELECT region_id, health_indicators_relationships, healthcare_recommendations, \
             health_patterns_identified, health_metrics_analysis, key_features, total_records \
             FROM region_analysis WHERE region_id = $1 LIMIT 1",
        )
        .bind(region_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                region_id,
                relationships_analysis,
                recommendations,
                patterns_analysis,
                metrics_analysis,
                key_features,
                total_records,
            )| RegionAnalysisRecord {
                region_id,
                relationships_analysis,
                recommendations,
                patterns_analysis,
                metrics_analysis,
                key_features: key_features.unwrap_or_default(),
                total_records: total_records.map(i64::from).unwrap_or_default(),
            },
        ))
    }

    async fn insert_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO region_analysis (id, region_id, health_indicators_relationships, \
             healthcare_recommendations, health_patterns_identified, health_metrics_analysis, \
             key_features, total_records, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(Uuid::new_v4())
        .bind(&record.region_id)
        .bind(&record.relationships_analysis)
        .bind(&record.recommendations)
        .bind(&record.patterns_analysis)
        .bind(&record.metrics_analysis)
        .bind(&record.key_features)
        .bind(total_records_column(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE region_analysis SET health_indicators_relationships = $2, \
             healthcare_recommendations = $3, health_patterns_identified = $4, \
             health_metrics_analysis = $5, key_features = $6, total_records = $7, \
             updated_at = now() WHERE region_id = $1",
        )
        .bind(&record.region_id)
        .bind(&record.relationships_analysis)
        .bind(&record.recommendations)
        .bind(&record.patterns_analysis)
        .bind(&record.metrics_analysis)
        .bind(&record.key_features)
        .bind(total_records_column(record)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "no region_analysis row to update for region {}",
                record.region_id
            ));
        }
        Ok(())
    }
}

fn total_records_column(record: &RegionAnalysisRecord) -> anyhow::Result<i32> {
    i32::try_from(record.total_records)
        .map_err(|_| anyhow!("total_records {} out of range", record.total_records))
}

/// In-memory implementation of HealthStore
#[derive(Default)]
pub struct InMemoryHealthStore {
    health_records: Arc<DashMap<String, Vec<HealthRecord>>>,
    patient_records: Arc<DashMap<String, Vec<PatientRecord>>>,
    patient_analyses: Arc<DashMap<String, String>>,
    region_analyses: Arc<DashMap<String, RegionAnalysisRecord>>,
}

impl InMemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_health_record(&self, record: HealthRecord) {
        self.health_records
            .entry(record.region_id.clone())
            .or_default()
            .push(record);
    }

    pub fn add_patient_record(&self, record: PatientRecord) {
        self.patient_records
            .entry(record.visit_patient_id.clone())
            .or_default()
            .push(record);
    }

    pub fn set_patient_analysis(&self, patient_id: impl Into<String>, analysis: impl Into<String>) {
        self.patient_analyses
            .insert(patient_id.into(), analysis.into());
    }

    pub fn region_analysis_count(&self) -> usize {
        self.region_analyses.len()
    }
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn fetch_health_records(&self, region_id: &str) -> anyhow::Result<Vec<HealthRecord>> {
        Ok(self
            .health_records
            .get(region_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn fetch_patient_records(&self, patient_id: &str) -> anyhow::Result<Vec<PatientRecord>> {
        Ok(self
            .patient_records
            .get(patient_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn fetch_patient_analysis(&self, patient_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .patient_analyses
            .get(patient_id)
            .map(|entry| entry.clone())
            .filter(|a| !a.trim().is_empty()))
    }

    async fn find_region_analysis(
        &self,
        region_id: &str,
    ) -> anyhow::Result<Option<RegionAnalysisRecord>> {
        Ok(self
            .region_analyses
            .get(region_id)
            .map(|entry| entry.clone()))
    }

    async fn insert_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        if self.region_analyses.contains_key(&record.region_id) {
            return Err(anyhow!(
                "region_analysis for region {} already exists",
                record.region_id
            ));
        }
        self.region_analyses
            .insert(record.region_id.clone(), record.clone());
        Ok(())
    }

    async fn update_region_analysis(&self, record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        match self.region_analyses.get_mut(&record.region_id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(anyhow!(
                "no region_analysis row to update for region {}",
                record.region_id
            )),
        }
    }
}

/// Bucket and object path of a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub path: String,
}

impl ObjectLocation {
    /// Resolve a public object URL of the form `.../public/<bucket>/<path>`.
    pub fn from_public_url(url: &str) -> Option<Self> {
        let (_, rest) = url.split_once("/public/")?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let (bucket, path) = rest.split_once('/')?;
        if bucket.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }
}

/// Binary object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, location: &ObjectLocation) -> anyhow::Result<Vec<u8>>;
}

/// Supabase storage over its REST API.
pub struct SupabaseObjectStore {
    http: Client,
    base_url: String,
    service_key: Option<String>,
}

impl SupabaseObjectStore {
    pub fn new(
        base_url: &str,
        service_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
        })
    }

    fn object_url(&self, location: &ObjectLocation) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, location.bucket, location.path
        )
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn download(&self, location: &ObjectLocation) -> anyhow::Result<Vec<u8>> {
        let mut request = self.http.get(self.object_url(location));
        if let Some(key) = &self.service_key {
            request = request
                .header("Authorization", format!("Bearer {}", key))
                .header("apikey", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "object download {}/{} failed: {}",
                location.bucket,
                location.path,
                response.status()
            ));
        }

        let bytes = response.bytes().await?;
        info!(
            bucket = %location.bucket,
            "Downloaded object ({} bytes)",
            bytes.len()
        );
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(region: &str, total: i64, metrics: &str) -> RegionAnalysisRecord {
        RegionAnalysisRecord {
            region_id: region.to_string(),
            metrics_analysis: Some(metrics.to_string()),
            total_records: total,
            ..Default::default()
        }
    }

    #[test]
    fn public_url_resolves_bucket_and_path() {
        let location = ObjectLocation::from_public_url(
            "https://abc.supabase.co/storage/v1/object/public/medical-images/visits/42/xray.png?t=1",
        )
        .unwrap();
        assert_eq!(location.bucket, "medical-images");
        assert_eq!(location.path, "visits/42/xray.png");
    }

    #[test]
    fn url_without_public_segment_does_not_resolve() {
        assert!(ObjectLocation::from_public_url("https://example.com/xray.png").is_none());
        assert!(ObjectLocation::from_public_url("https://x/public/bucket-only").is_none());
        assert!(ObjectLocation::from_public_url("https://x/public//file.png").is_none());
    }

    #[test]
    fn object_url_joins_base_and_location() {
        let store =
            SupabaseObjectStore::new("https://abc.supabase.co/", None, Duration::from_secs(5))
                .unwrap();
        let location = ObjectLocation {
            bucket: "scans".into(),
            path: "a/b.jpg".into(),
        };
        assert_eq!(
            store.object_url(&location),
            "https://abc.supabase.co/storage/v1/object/scans/a/b.jpg"
        );
    }

    #[tokio::test]
    async fn in_memory_store_filters_by_region() {
        let store = InMemoryHealthStore::new();
        for (id, region) in [(1, "north"), (2, "north"), (3, "south")] {
            store.add_health_record(HealthRecord {
                id,
                region_id: region.to_string(),
                data: json!({ "bmi": 24.0 }).as_object().unwrap().clone(),
            });
        }

        assert_eq!(store.fetch_health_records("north").await.unwrap().len(), 2);
        assert_eq!(store.fetch_health_records("south").await.unwrap().len(), 1);
        assert!(store.fetch_health_records("east").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_insert_and_update_region_analysis() {
        let store = InMemoryHealthStore::new();

        store.insert_region_analysis(&record("north", 3, "v1")).await.unwrap();
        assert!(store.insert_region_analysis(&record("north", 4, "v2")).await.is_err());

        store.update_region_analysis(&record("north", 4, "v2")).await.unwrap();
        let stored = store.find_region_analysis("north").await.unwrap().unwrap();
        assert_eq!(stored.total_records, 4);
        assert_eq!(stored.metrics_analysis.as_deref(), Some("v2"));

        assert!(store.update_region_analysis(&record("south", 1, "x")).await.is_err());
    }

    #[tokio::test]
    async fn blank_patient_analysis_counts_as_missing() {
        let store = InMemoryHealthStore::new();
        store.set_patient_analysis("7", "   ");
        assert!(store.fetch_patient_analysis("7").await.unwrap().is_none());
        store.set_patient_analysis("7", "Type 2 diabetes, well controlled");
        assert_eq!(
            store.fetch_patient_analysis("7").await.unwrap().as_deref(),
            Some("Type 2 diabetes, well controlled")
        );
    }

    /// Requires: DATABASE_URL pointing at a database with the health tables.
    #[tokio::test]
    async fn postgres_region_lookup() -> anyhow::Result<()> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            println!("Skipping test - set DATABASE_URL environment variable");
            return Ok(());
        };

        let store = PostgresHealthStore::connect(&database_url, 1).await?;
        let records = store.fetch_health_records("__nonexistent_region__").await?;
        assert!(records.is_empty());
        Ok(())
    }
}
