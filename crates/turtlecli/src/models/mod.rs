pub mod history;
pub mod result_envelope;

pub use history::{
    EXPORT_SCHEMA_VERSION, ExecutionRecord, ExecutionState, ExportRecord, ProcedureState,
    ValidityStatus, export_json_schema,
};
pub use result_envelope::{
    EnvelopeNotice, RESULT_ENVELOPE_SCHEMA_VERSION, ResultEnvelope, ResultEnvelopeMeta,
};
