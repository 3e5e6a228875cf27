pub mod control;
pub mod form_spec;
pub mod loaders;
pub mod outcome;
pub mod record;

pub use control::{ControlRef, ControlState, ResolvedSelection, SelectOption};
pub use form_spec::{
    ControlKind, ExtractionSpec, FieldSpec, FormSpec, ReadySpec, ValueContext, ValueRule,
};
pub use loaders::{load_form_spec, load_records};
pub use outcome::{RecordReport, ReportKind, Stage, StageFailure, SubmissionOutcome};
pub use record::{IdempotencyKey, RecordInput};
