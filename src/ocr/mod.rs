//! Document text extraction: engine adapter, native extraction, multi-pass
//! arbitration, dispatch and the server-side job lifecycle.

pub mod arbitrator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod health;
pub mod native;
pub mod registry;
pub mod runner;
pub mod service;

pub use arbitrator::{ArbitrationConfig, MultiPassArbitrator};
pub use dispatcher::ExtractionDispatcher;
pub use engine::{EngineConfig, RecognitionEngine, TesseractEngine};
pub use error::OcrError;
pub use native::{NativeTextExtractor, PdfTextExtractor};
pub use registry::{InMemoryJobRegistry, JobRegistry, Registration};
pub use runner::BackgroundJobRunner;
pub use service::ExtractionService;
