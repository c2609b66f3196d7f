pub mod finalization;
pub mod kubernetes;
mod path;
mod record;

pub use self::{
    finalization::{
        AckPosition, EventFinalizers, EventStatus, Finalizable, SourceProgress,
    },
    kubernetes::KubernetesMeta,
    path::{FieldPath, PathParseError, retain_paths},
    record::{LogRecord, LogSource, LogType, viaq_labels},
};
