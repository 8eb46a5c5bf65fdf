//! Send-cycle orchestration: controller state machine and attachment staging.

/// Attachment staging and upload providers.
pub mod attachment;
/// The conversation sync controller.
pub mod controller;

pub use attachment::{
    AttachmentStaging, AttachmentUploader, HttpAttachmentUploader, UploadFuture,
    UploadedAttachment,
};
pub use controller::{ConversationSyncController, SendOutcome, SendState, TransientDisplay};
