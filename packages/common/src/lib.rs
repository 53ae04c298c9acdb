pub mod config;
pub mod event;
pub mod identity;
pub mod record;
pub mod retry;
pub mod status;

pub use event::{ChangeEvent, ChangeKind};
pub use identity::{Actor, Role};
pub use record::{Acceptance, Challenge, EngagementKey, Review, Submission, SubmissionPayload};
pub use status::{AcceptanceStatus, EffectiveStatus, ReviewDecision, ReviewStatus};
