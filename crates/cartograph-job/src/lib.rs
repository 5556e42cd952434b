//! Cartograph Job
//!
//! Print job lifecycle on top of the runtime. Templates are resolved into
//! pipelines once, at registration. Each submitted job gets a reference id,
//! a status record in the [`Registry`](cartograph_store::Registry) and a
//! background execution that can be polled, cancelled and awaited.

mod access;
mod error;
mod filename;
mod manager;
mod record;
mod template;

pub use access::{AccessAssertion, AccessControl, Capability, RoleAccessControl};
pub use error::{JobError, SubmitError, TemplateError};
pub use filename::{DEFAULT_FILE_NAME, render_file_name, validate_file_name};
pub use manager::{JobConfig, JobManager, JobStatus};
pub use record::{CANCELLED_ERROR, JobRecord, JobState, RESULT_METADATA_PREFIX};
pub use template::{StageCatalog, Template, stage_specs};
