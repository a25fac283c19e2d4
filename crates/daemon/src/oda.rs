// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling Block archive client.
//!
//! The archive is an opaque store of SB documents by identifier; the engine
//! never interprets the document beyond the activity table.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no scheduling block with id {0}")]
    NotFound(String),

    #[error("archive request failed: {0}")]
    Http(String),

    #[error("archive returned a non-JSON document: {0}")]
    Decode(String),
}

/// Read-through access to the SB archive.
#[async_trait]
pub trait SbArchive: Send + Sync + 'static {
    async fn fetch(&self, sbd_id: &str) -> Result<serde_json::Value, ArchiveError>;
}

/// HTTP archive client against the ODA REST API.
#[derive(Clone)]
pub struct HttpArchive {
    base_url: String,
    client: reqwest::Client,
}

impl HttpArchive {
    pub fn new(base_url: String) -> Self {
        Self { base_url, client: reqwest::Client::new() }
    }

    pub fn from_env() -> Self {
        Self::new(crate::env::oda_url())
    }
}

#[async_trait]
impl SbArchive for HttpArchive {
    async fn fetch(&self, sbd_id: &str) -> Result<serde_json::Value, ArchiveError> {
        let url = format!("{}/sbds/{}", self.base_url.trim_end_matches('/'), sbd_id);
        let response =
            self.client.get(&url).send().await.map_err(|e| ArchiveError::Http(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ArchiveError::NotFound(sbd_id.to_string()));
        }
        let response =
            response.error_for_status().map_err(|e| ArchiveError::Http(e.to_string()))?;
        response.json().await.map_err(|e| ArchiveError::Decode(e.to_string()))
    }
}

/// In-memory archive for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct FakeArchive {
    docs: std::sync::Arc<parking_lot::Mutex<std::collections::HashMap<String, serde_json::Value>>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sbd_id: &str, doc: serde_json::Value) {
        self.docs.lock().insert(sbd_id.to_string(), doc);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl SbArchive for FakeArchive {
    async fn fetch(&self, sbd_id: &str) -> Result<serde_json::Value, ArchiveError> {
        self.docs
            .lock()
            .get(sbd_id)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(sbd_id.to_string()))
    }
}

#[cfg(test)]
#[path = "oda_tests.rs"]
mod tests;
