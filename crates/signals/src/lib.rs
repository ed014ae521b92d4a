//! Signal collection and decision oracle clients.
//!
//! - [`HttpSignalProvider`]: one HTTP analysis service
//! - [`SignalRegistry`]: concurrent fan-out with retries into a `SignalBundle`
//! - [`HttpDecisionProvider`]: the `/decide` endpoint of the decision service

mod http;
pub mod oracle;
pub mod registry;

pub use http::HttpSignalProvider;
pub use oracle::HttpDecisionProvider;
pub use registry::SignalRegistry;
