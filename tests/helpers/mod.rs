//! Shared test helpers: in-memory collaborators for the worker and HTTP
//! polling utilities for end-to-end runs.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use site_inspect_queue::models::analysis::{AnalysisRequest, AnalysisResponse};
use site_inspect_queue::models::job::{EnqueueOptions, Job, NewJob};
use site_inspect_queue::models::payload::PHOTO_ANALYSIS_QUEUE;
use site_inspect_queue::models::photo::{Photo, SafetyCode};
use site_inspect_queue::models::violation::{NewDetectedViolation, ViolationWrite};
use site_inspect_queue::services::ai::{AiError, AiService};
use site_inspect_queue::services::audit::{AuditEvent, AuditWriter};
use site_inspect_queue::services::dispatcher::DispatcherConfig;
use site_inspect_queue::services::domain::{DomainError, DomainStore};
use site_inspect_queue::services::memory_queue::InMemoryJobStore;
use site_inspect_queue::services::queue::{ClaimPolicy, JobStore, RetryPolicy};
use site_inspect_queue::services::storage::{PhotoUrls, StorageError};

/// Domain store backed by hash maps.
#[derive(Default)]
pub struct FakeDomainStore {
    photos: Mutex<HashMap<Uuid, Photo>>,
    codes: Mutex<Vec<SafetyCode>>,
    violations: Mutex<HashMap<Uuid, NewDetectedViolation>>,
    rejected: Mutex<HashSet<String>>,
    code_lookups: AtomicUsize,
}

impl FakeDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_photo(&self, organization_id: Uuid, caption: Option<&str>) -> Photo {
        let photo = Photo {
            id: Uuid::new_v4(),
            inspection_id: Uuid::new_v4(),
            organization_id,
            storage_key: format!("inspections/{}.jpg", Uuid::new_v4()),
            caption: caption.map(str::to_string),
            created_at: Utc::now(),
        };
        self.photos.lock().unwrap().insert(photo.id, photo.clone());
        photo
    }

    pub fn add_code(&self, code: &str, description: &str) -> SafetyCode {
        let code = SafetyCode {
            id: Uuid::new_v4(),
            code: code.to_string(),
            description: description.to_string(),
            country: "US".to_string(),
        };
        self.codes.lock().unwrap().push(code.clone());
        code
    }

    /// Make inserts of violations with this description fail.
    pub fn reject_description(&self, description: &str) {
        self.rejected.lock().unwrap().insert(description.to_string());
    }

    pub fn violations(&self) -> Vec<NewDetectedViolation> {
        let mut all: Vec<_> = self.violations.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.description.cmp(&b.description));
        all
    }

    pub fn code_lookups(&self) -> usize {
        self.code_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DomainStore for FakeDomainStore {
    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, DomainError> {
        Ok(self.photos.lock().unwrap().get(&photo_id).cloned())
    }

    async fn list_safety_codes(&self) -> Result<Vec<SafetyCode>, DomainError> {
        Ok(self.codes.lock().unwrap().clone())
    }

    async fn get_safety_code_by_code(&self, code: &str) -> Result<Option<SafetyCode>, DomainError> {
        self.code_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .codes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code.trim()))
            .cloned())
    }

    async fn create_detected_violation(
        &self,
        violation: &NewDetectedViolation,
    ) -> Result<ViolationWrite, DomainError> {
        if self.rejected.lock().unwrap().contains(&violation.description) {
            return Err(DomainError::Unavailable("constraint violated".to_string()));
        }
        let mut rows = self.violations.lock().unwrap();
        if rows.contains_key(&violation.id) {
            return Ok(ViolationWrite::AlreadyExists);
        }
        rows.insert(violation.id, violation.clone());
        Ok(ViolationWrite::Created)
    }
}

/// AI service that plays back a fixed script. The last entry repeats once
/// the script runs out.
pub struct ScriptedAi {
    script: Mutex<VecDeque<Option<AnalysisResponse>>>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedAi {
    /// `None` entries answer with a 503.
    pub fn new(script: Vec<Option<AnalysisResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: AnalysisResponse) -> Self {
        Self::new(vec![Some(response)])
    }

    pub fn unavailable() -> Self {
        Self::new(vec![None])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiService for ScriptedAi {
    async fn analyze_photo(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AiError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().cloned().flatten()
            }
        };
        next.ok_or_else(|| AiError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: "model overloaded".to_string(),
        })
    }
}

/// Hands out stable fake URLs for storage keys.
pub struct FakeUrls;

#[async_trait]
impl PhotoUrls for FakeUrls {
    async fn photo_url(&self, storage_key: &str) -> Result<String, StorageError> {
        Ok(format!("https://photos.test/{}", storage_key))
    }
}

/// Audit writer that keeps every event in memory.
#[derive(Default)]
pub struct RecordingAuditWriter {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditWriter {
    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.to_string())
            .collect()
    }
}

#[async_trait]
impl AuditWriter for RecordingAuditWriter {
    async fn write(&self, event: &AuditEvent) -> Result<(), sqlx::Error> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Dispatcher settings tuned for fast tests: no backoff and no fairness cap.
pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        queue_name: PHOTO_ANALYSIS_QUEUE.to_string(),
        workers: 2,
        poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(1),
        reaper_interval: Duration::from_millis(50),
        claim: ClaimPolicy {
            lease: Duration::from_secs(30),
            org_concurrency_limit: 100,
        },
        retry: RetryPolicy::immediate(),
    }
}

pub async fn enqueue_raw(
    store: &InMemoryJobStore,
    job_type: &str,
    organization_id: Uuid,
    payload: serde_json::Value,
    max_attempts: i32,
) -> Job {
    let new_job = NewJob::new(
        PHOTO_ANALYSIS_QUEUE,
        job_type,
        organization_id,
        &payload,
        EnqueueOptions {
            priority: None,
            max_attempts: Some(max_attempts),
        },
    )
    .unwrap();
    store.enqueue(new_job).await.unwrap()
}

pub async fn enqueue_photo_job(
    store: &InMemoryJobStore,
    photo: &Photo,
    max_attempts: i32,
) -> Job {
    enqueue_raw(
        store,
        "analyze_photo",
        photo.organization_id,
        serde_json::json!({ "photo_id": photo.id }),
        max_attempts,
    )
    .await
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

/// Job as returned by the HTTP API.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    pub organization_id: Uuid,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Submit a job through POST /api/v1/jobs.
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    body: &serde_json::Value,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if status != reqwest::StatusCode::ACCEPTED {
        let error_text = response.text().await?;
        return Err(format!("Enqueue failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<JobResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let job = response.json::<JobResponse>().await?;

        match job.status.as_str() {
            "completed" | "failed" => return Ok(job),
            "pending" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", job.status).into());
            }
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}
