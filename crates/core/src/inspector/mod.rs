//! Attachment inspection: password protection detection and justification extraction.

mod attachment;
mod extract;
mod protection;
mod types;

pub use attachment::TicketAttachmentInspector;
pub use extract::extract_justification;
pub use protection::{detect_protection, ContainerFormat, Protection};
pub use types::{
    AttachmentFetcher, AttachmentInspector, ExtractedJustification, Inspection, InspectionError,
};
