//! Staging for an optionally-uploaded attachment.
//!
//! At most one attachment is staged at a time; it rides along with the next
//! submitted prompt. A failed upload never blocks text-only submission.

use std::future::Future;
use std::pin::Pin;

use tracing::warn;

use crate::config::BackendConfig;
use crate::conversation::types::AttachmentRef;
use crate::error::{ChatError, ChatResult};

/// Boxed future type for upload operations.
pub type UploadFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A completed upload: the stored reference plus the opaque payload the
/// model provider will receive alongside the prompt text.
#[derive(Clone, Debug)]
pub struct UploadedAttachment {
    /// Reference persisted with the exchange (path only, never the binary).
    pub reference: AttachmentRef,
    /// Opaque provider payload, passed through untouched.
    pub provider_payload: serde_json::Value,
}

/// Trait for single-file attachment upload providers.
pub trait AttachmentUploader: Send + Sync {
    /// Upload one file and return its reference and provider payload.
    ///
    /// # Errors
    /// Returns an error if the upload fails.
    fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> UploadFuture<'_, ChatResult<UploadedAttachment>>;
}

/// Tracks the upload lifecycle of the next prompt's attachment.
#[derive(Debug, Default)]
pub struct AttachmentStaging {
    is_loading: bool,
    error: Option<String>,
    reference: Option<AttachmentRef>,
    provider_payload: Option<serde_json::Value>,
}

impl AttachmentStaging {
    /// Create an empty staging slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an upload is currently in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Last upload error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Staged reference, if an upload completed successfully.
    #[must_use]
    pub const fn reference(&self) -> Option<&AttachmentRef> {
        self.reference.as_ref()
    }

    /// Run an upload and stage its result.
    ///
    /// A failure is recorded in `error` (and returned) while the reference
    /// stays empty, so the next submission proceeds text-only.
    ///
    /// # Errors
    /// Returns `UploadInProgress` if an upload is already in flight, or the
    /// upload error itself.
    pub async fn upload(
        &mut self,
        uploader: &dyn AttachmentUploader,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> ChatResult<()> {
        if self.is_loading {
            return Err(ChatError::UploadInProgress);
        }
        self.is_loading = true;
        self.error = None;
        self.reference = None;
        self.provider_payload = None;

        let result = uploader.upload(file_name, bytes).await;
        self.is_loading = false;
        match result {
            Ok(uploaded) => {
                self.reference = Some(uploaded.reference);
                self.provider_payload = Some(uploaded.provider_payload);
                Ok(())
            }
            Err(err) => {
                warn!(%err, file_name, "Attachment upload failed");
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Hand the staged attachment to the submission cycle and clear the
    /// slot. Yields nothing while loading or after a failed upload.
    pub fn take(&mut self) -> Option<(AttachmentRef, serde_json::Value)> {
        if self.is_loading || self.error.is_some() {
            return None;
        }
        let reference = self.reference.take()?;
        let payload = self.provider_payload.take().unwrap_or_default();
        Some((reference, payload))
    }

    /// Clear all staging state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// HTTP implementation of the attachment upload provider.
pub struct HttpAttachmentUploader {
    client: reqwest::Client,
    base_url: String,
}

/// Upload endpoint response body.
#[derive(serde::Deserialize)]
struct UploadResponse {
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(rename = "providerData", default)]
    provider_data: serde_json::Value,
}

impl HttpAttachmentUploader {
    /// Create an uploader from backend configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AttachmentUploader for HttpAttachmentUploader {
    fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> UploadFuture<'_, ChatResult<UploadedAttachment>> {
        let url = format!("{}/uploads", self.base_url);
        let file_name = file_name.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(&url)
                .query(&[("name", file_name.as_str())])
                .body(bytes)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::UploadStatus(status.as_u16()));
            }

            let parsed = response.json::<UploadResponse>().await?;
            Ok(UploadedAttachment {
                reference: AttachmentRef {
                    file_path: parsed.file_path,
                    metadata: parsed.metadata,
                },
                provider_payload: parsed.provider_data,
            })
        })
    }
}
