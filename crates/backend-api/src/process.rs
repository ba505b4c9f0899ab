use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use roster_domain::{parse_document, DocumentError, User};
use roster_engine::{extract_raw_participants, Enricher};

use crate::cache::{bundle_fingerprint, document_digest, ResultCache};

/// Drives one submitted document bundle through the pipeline. Behind a trait
/// so the HTTP layer can be exercised without a live upstream.
#[async_trait]
pub trait ChatProcessor: Send + Sync {
    async fn process(&self, documents: &[Bytes]) -> Result<ProcessOutcome, ProcessError>;
}

/// Users gathered for a bundle. `warning` carries the enrichment error text
/// when the run fell short (partial results); the caller decides whether
/// that fails the task.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub users: Vec<User>,
    pub warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to parse document {index}: {source}")]
    InvalidDocument {
        index: usize,
        #[source]
        source: DocumentError,
    },
}

/// Production pipeline: fingerprint → cache probe → extraction over every
/// document → enrichment of the merged list → cache fill.
pub struct ProcessUseCase {
    cache: Arc<ResultCache>,
    enricher: Enricher,
    cache_ttl: Duration,
    task_timeout: Option<Duration>,
}

impl ProcessUseCase {
    pub fn new(
        cache: Arc<ResultCache>,
        enricher: Enricher,
        cache_ttl: Duration,
        task_timeout: Option<Duration>,
    ) -> Self {
        Self {
            cache,
            enricher,
            cache_ttl,
            task_timeout,
        }
    }
}

#[async_trait]
impl ChatProcessor for ProcessUseCase {
    async fn process(&self, documents: &[Bytes]) -> Result<ProcessOutcome, ProcessError> {
        let digests: Vec<String> = documents
            .iter()
            .map(|document| document_digest(document))
            .collect();
        let fingerprint = bundle_fingerprint(&digests);

        if let Some(users) = self.cache.get(&fingerprint) {
            info!(%fingerprint, "cache hit for document bundle");
            return Ok(ProcessOutcome {
                users,
                warning: None,
            });
        }

        let mut participants = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            let chat = parse_document(document)
                .map_err(|source| ProcessError::InvalidDocument { index, source })?;
            let extracted = extract_raw_participants(&chat);
            info!(
                index,
                message_count = chat.messages.len(),
                participant_count = extracted.len(),
                "extracted participants from document"
            );
            participants.extend(extracted);
        }

        info!(total = participants.len(), "enriching merged participant list");
        let report = self.enricher.enrich(participants, self.task_timeout).await;
        let warning = report.error.map(|err| err.to_string());

        // Only complete runs are worth remembering.
        if warning.is_none() {
            self.cache
                .put(&fingerprint, report.users.clone(), self.cache_ttl);
            debug!(%fingerprint, "cached enrichment result");
        }

        Ok(ProcessOutcome {
            users: report.users,
            warning,
        })
    }
}
