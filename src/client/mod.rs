//! Caller side of the extraction service: the API contract, an HTTP client,
//! the status poller and local failover.

pub mod api;
pub mod failover;
pub mod http;
pub mod hybrid;
pub mod poller;

pub use api::{ClientError, ExtractionApi};
pub use failover::{DocumentSource, FailoverDecision, FailoverError, HybridFailoverController, LocalDocument};
pub use http::HttpExtractionApi;
pub use hybrid::{ExtractionLocus, HybridError, HybridExtractionClient, HybridResult};
pub use poller::{PollError, PollEvent, PollHandle, PollOutcome, PollerConfig, StatusPoller};
