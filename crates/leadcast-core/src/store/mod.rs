//! Remote lead sheet access.
//!
//! The lead list lives in a remote spreadsheet reachable only over REST,
//! with no transactional guarantees. This module owns the [`Lead`] row
//! model, the [`RecordStore`] seam, and the tolerant field matching that
//! absorbs schema drift in the sheet's column headers.

mod adapter;
mod fields;
mod model;

pub use adapter::{RecordStore, SheetStore};
pub use fields::{get_field, lead_to_fields, normalize_key, record_to_lead};
pub use model::{Lead, LeadStatus, normalize_email};
