//! Gridlink Protocol Buffers
//!
//! Generated protobuf code for the Gridlink gateway gRPC API.
//!
//! This crate contains:
//! - `AgentAuthService` for secret-based agent authentication
//! - `AgentChannelService` for the server-to-agent push channel
//! - `OperatorService` for diagnostics and credential management

#![allow(clippy::derive_partial_eq_without_eq)]

/// Gridlink v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("gridlink.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;
