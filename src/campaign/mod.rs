//! Batch-calling campaigns: status machine, contact lists and the batch
//! dialler. There is no background scheduler; batches run when a user starts,
//! resumes or explicitly processes a campaign.
pub mod contacts;
pub mod runner;
pub mod state;

pub use contacts::{
    ContactInput, ImportReport, export_csv, import_contacts, normalize_phone, parse_csv,
};
pub use runner::{
    BatchReport, apply_action, complete_if_exhausted, pending_contacts, process_batch,
};
pub use state::{CampaignAction, CampaignError, transition};
