//! GraphQL load generator: authenticates once, drives virtual users along a
//! constant or ramping concurrency profile, and summarizes what it measured.

pub mod auth;
pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod report;
pub mod run;
pub mod scenario;
pub mod transport;
pub mod vu;

pub use auth::{AuthConfig, AuthSession, Credentials};
pub use catalog::{QueryCatalog, RequestTemplate};
pub use error::{AuthError, CatalogError, ParseError, RunError, ScenarioError, TransportError};
pub use executor::{ExecutionStats, Executor};
pub use metrics::MetricsCollector;
pub use report::{RenderedReport, SummaryReport, SummaryReporter};
pub use run::{LoadTest, RunReport, RunSettings};
pub use scenario::{NamedScenario, ScenarioProfile, ScenarioRegistry, Stage};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Timings, Transport};
