//! Scripted collaborators for the pipeline tests.

use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::llm::{ImageInput, LlmClient};
use crate::models::{HealthRecord, PatientRecord, RegionAnalysisRecord};
use crate::storage::{HealthStore, InMemoryHealthStore, ObjectLocation, ObjectStore};

/// An `LlmClient` that answers from a script keyed on prompt substrings.
pub struct ScriptedLlm {
    rules: Vec<(String, Option<String>)>,
    default_reply: Option<String>,
    vision_reply: Option<String>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: Some(reply.to_string()),
            vision_reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            rules: Vec::new(),
            default_reply: None,
            vision_reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` whenever the prompt contains `needle`.
    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), Some(reply.to_string())));
        self
    }

    /// Fail whenever the prompt contains `needle`.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), None));
        self
    }

    pub fn with_vision(mut self, reply: &str) -> Self {
        self.vision_reply = Some(reply.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompt_containing(&self, needle: &str) -> Option<(String, String)> {
        self.prompts()
            .into_iter()
            .find(|(_, prompt)| prompt.contains(needle))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        reply.ok_or_else(|| anyhow!("scripted completion failure"))
    }

    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        _image: &ImageInput,
    ) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        self.vision_reply
            .clone()
            .ok_or_else(|| anyhow!("scripted vision failure"))
    }
}

/// An `ObjectStore` serving one fixed payload, or failing when empty.
pub struct StaticObjects {
    payload: Option<Vec<u8>>,
    downloads: AtomicUsize,
}

impl StaticObjects {
    pub fn serving(payload: Vec<u8>) -> Self {
        Self {
            payload: Some(payload),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            payload: None,
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for StaticObjects {
    async fn download(&self, location: &ObjectLocation) -> anyhow::Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.payload
            .clone()
            .ok_or_else(|| anyhow!("object {}/{} not found", location.bucket, location.path))
    }
}

/// A `HealthStore` that serves reads from an in-memory store and rejects
/// every write.
pub struct ReadOnlyStore {
    inner: InMemoryHealthStore,
}

impl ReadOnlyStore {
    pub fn new(inner: InMemoryHealthStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HealthStore for ReadOnlyStore {
    async fn fetch_health_records(&self, region_id: &str) -> anyhow::Result<Vec<HealthRecord>> {
        self.inner.fetch_health_records(region_id).await
    }

    async fn fetch_patient_records(&self, patient_id: &str) -> anyhow::Result<Vec<PatientRecord>> {
        self.inner.fetch_patient_records(patient_id).await
    }

    async fn fetch_patient_analysis(&self, patient_id: &str) -> anyhow::Result<Option<String>> {
        self.inner.fetch_patient_analysis(patient_id).await
    }

    async fn find_region_analysis(
        &self,
        region_id: &str,
    ) -> anyhow::Result<Option<RegionAnalysisRecord>> {
        self.inner.find_region_analysis(region_id).await
    }

    async fn insert_region_analysis(&self, _record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        Err(anyhow!("store is read-only"))
    }

    async fn update_region_analysis(&self, _record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        Err(anyhow!("store is read-only"))
    }
}

/// A `HealthStore` whose database is unreachable: every call fails.
pub struct UnavailableStore;

#[async_trait]
impl HealthStore for UnavailableStore {
    async fn fetch_health_records(&self, _region_id: &str) -> anyhow::Result<Vec<HealthRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn fetch_patient_records(&self, _patient_id: &str) -> anyhow::Result<Vec<PatientRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn fetch_patient_analysis(&self, _patient_id: &str) -> anyhow::Result<Option<String>> {
        Err(anyhow!("connection refused"))
    }

    async fn find_region_analysis(
        &self,
        _region_id: &str,
    ) -> anyhow::Result<Option<RegionAnalysisRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn insert_region_analysis(&self, _record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn update_region_analysis(&self, _record: &RegionAnalysisRecord) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// Smallest valid PNG signature plus header chunk, enough for format sniffing.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
    bytes.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0]);
    bytes
}
