//! Failure handling around the network: circuit breakers, reachability
//! checks and retry/backoff.

pub mod circuit_breaker;
pub mod connectivity;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitError, CircuitRegistry, CircuitState, CircuitStatus,
};
pub use connectivity::{
    ConnectivityMonitor, ConnectivityProbe, ConnectivitySample, DnsProbe, HttpProbe, TcpProbe,
};
pub use retry::{retry, RetryConfig};
