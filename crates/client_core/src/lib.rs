//! Client side of the paper review service: the remote job contract, its HTTP
//! implementation, progress synthesis and the job lifecycle controller.

pub mod controller;
pub mod endpoint;
pub mod http;
pub mod progress;

pub use controller::{ControllerConfig, JobController, JobEvent, SubmitRejected};
pub use endpoint::{DocumentUpload, EndpointError, StatusEndpoint};
pub use http::{EndpointRoutes, HttpStatusEndpoint};
pub use progress::{ProgressConfig, ProgressSynthesizer};
