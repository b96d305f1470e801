//! Provider callbacks: signature check, event parsing and call reconciliation.
pub mod event;
pub mod ingest;
pub mod signature;

pub use event::WebhookEvent;
pub use ingest::{IngestOutcome, WebhookContext, handle_event};
pub use signature::{SIGNATURE_HEADER, SignatureError, verify_signature};
