//! Batch transmission over HTTP.
//!
//! Wire contract: `POST <endpoint>` with a [`BatchPayload`] JSON body, answered by an
//! optional [`TransmitAck`]. The bearer credential is opaque and only ever placed in the
//! `Authorization` header.

use crate::core::config::TransportConfig;
use crate::core::error::{SyncError, TransportError};
use crate::core::model::{AnalyticsRecord, BatchType, Category, Indicators, SyncBatch};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub id: String,
    pub session_id: String,
    pub category: Category,
    pub indicators: Indicators,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub batch_id: String,
    pub batch_type: BatchType,
    pub records: Vec<RecordPayload>,
}

impl BatchPayload {
    pub fn new(batch: &SyncBatch, records: Vec<AnalyticsRecord>) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            batch_type: batch.batch_type,
            records: records
                .into_iter()
                .map(|r| RecordPayload {
                    id: r.id,
                    session_id: r.session_id,
                    category: r.category,
                    indicators: r.indicators,
                    timestamp: r.timestamp,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub record_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmitAck {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<RecordError>,
}

impl TransmitAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    /// Ids the server refused individually.
    pub fn rejected_ids(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.record_id.clone()).collect()
    }
}

pub trait Transport: Send + Sync {
    fn transmit(&self, payload: &BatchPayload) -> Result<TransmitAck, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn transmit(&self, payload: &BatchPayload) -> Result<TransmitAck, TransportError> {
        (**self).transmit(payload)
    }
}

/// Interpret a 2xx response body.
///
/// `success: false` with no per-record errors rejects the whole batch.
pub fn interpret_ack(body: &str) -> Result<TransmitAck, TransportError> {
    if body.trim().is_empty() {
        return Ok(TransmitAck::ok());
    }
    let ack: TransmitAck = match serde_json::from_str(body) {
        Ok(ack) => ack,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable acknowledgement body; treating as success");
            return Ok(TransmitAck::ok());
        }
    };
    if !ack.success && ack.errors.is_empty() {
        return Err(TransportError::Permanent(
            "server reported failure without record errors".to_string(),
        ));
    }
    Ok(ack)
}

pub struct HttpTransport {
    endpoint: String,
    credential_env: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, SyncError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            SyncError::ConfigError(
                "no ingestion endpoint configured (transport.endpoint or KINDSYNC_ENDPOINT)"
                    .to_string(),
            )
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::ConfigError(format!("http client: {}", e)))?;
        Ok(Self {
            endpoint,
            credential_env: config.credential_env.clone(),
            client,
        })
    }
}

impl Transport for HttpTransport {
    fn transmit(&self, payload: &BatchPayload) -> Result<TransmitAck, TransportError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Ok(token) = std::env::var(&self.credential_env) {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(status.as_u16()));
        }
        let body = response
            .text()
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        interpret_ack(&body)
    }
}

/// Transport for processes that only admit or inspect. Every call fails transiently so
/// nothing is lost if a cycle runs anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn transmit(&self, _payload: &BatchPayload) -> Result<TransmitAck, TransportError> {
        Err(TransportError::Transient("no transport configured".to_string()))
    }
}

/// Transport answering from a queue of canned results; records every payload it sees.
///
/// An empty script acknowledges everything.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransmitAck, TransportError>>>,
    sent: Mutex<Vec<BatchPayload>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<TransmitAck, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: Result<TransmitAck, TransportError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn sent(&self) -> Vec<BatchPayload> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn transmit(&self, payload: &BatchPayload) -> Result<TransmitAck, TransportError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Ok(TransmitAck::ok()))
    }
}
