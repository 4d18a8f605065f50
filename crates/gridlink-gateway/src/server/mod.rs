//! gRPC server implementations for the gateway.

pub mod auth_svc;
pub mod channel_svc;
pub mod interceptor;
pub mod operator_svc;

#[cfg(test)]
mod test_helpers;

#[cfg(test)]
mod operator_svc_tests;

pub use auth_svc::AgentAuthServiceImpl;
pub use channel_svc::AgentChannelServiceImpl;
pub use interceptor::jwt_interceptor;
pub use operator_svc::OperatorServiceImpl;

use tonic::Request;

/// Caller key for rate limiting: the peer IP when the transport knows it.
pub(crate) fn peer_ip<T>(request: &Request<T>) -> String {
    request
        .remote_addr()
        .map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}
