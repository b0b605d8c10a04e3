//! # modelconv-pipeline
//!
//! Turns an uploaded zip archive into a streamed `.glb` artifact:
//!
//! 1. [`stager::ArchiveStager`] extracts the upload into an isolated
//!    [`workspace::WorkingDirectory`] and picks the model file to convert.
//! 2. [`invoker::ConverterInvoker`] runs the external converter against it
//!    with a deadline and relocates the produced artifact.
//! 3. [`orchestrator::RequestOrchestrator`] sequences both steps and hands
//!    back an [`stream::ArtifactStream`] that removes the working directory
//!    once the caller has finished reading.

pub mod error;
pub mod filesystem;
pub mod formats;
pub mod invoker;
pub mod metrics;
pub mod orchestrator;
pub mod stager;
pub mod stream;
pub mod workspace;

pub use error::ConversionError;
pub use invoker::ConverterInvoker;
pub use orchestrator::RequestOrchestrator;
pub use stager::{ArchiveStager, StagedModel, UploadedFile};
pub use stream::ArtifactStream;
pub use workspace::WorkingDirectory;
