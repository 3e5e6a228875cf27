pub mod field_writer;
pub mod readiness;
pub mod report_writer;
pub mod result_extractor;
pub mod selector_resolver;
pub mod submission;

pub use field_writer::{Confirmed, FieldWriter};
pub use readiness::{Predicate, Readiness, ReadinessMonitor};
pub use report_writer::ReportWriter;
pub use result_extractor::ResultExtractor;
pub use selector_resolver::{OptionFingerprint, SelectorResolver};
pub use submission::{Claim, IdempotencyLedger, SubmissionController};
