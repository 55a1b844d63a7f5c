//! QR cross-device login engine.
//!
//! This crate implements the browser-side half of the QR login handshake:
//!
//! - [`HttpSessionClient`]: thin RPC client for the QR session endpoints
//! - [`HandshakeController`]: the generate → poll → link → exchange →
//!   materialize state machine with explicit timer discipline
//! - Unverified JWT `iat` decoding for the clock-drift hint
//!
//! A mobile app scans the encoded payload and completes the login against
//! the backend; this engine observes the link via polling and materializes
//! the resulting session so the external identity SDK treats the user as
//! signed in.

mod client;
mod config;
mod controller;
mod error;
mod fsm;
mod jwt;
mod payload;

pub use client::{
    ExchangeOutcome, HttpSessionClient, LinkedCredentials, SessionRpc, SessionStatus,
};
pub use config::{LinkConfig, DEFAULT_BASE_URL};
pub use controller::{HandshakeController, PhaseCallback};
pub use error::{LinkError, LinkResult};
pub use fsm::{link_machine, HandshakePhase, LinkMachine, LinkMachineInput, LinkMachineState};
pub use jwt::decode_iat;
pub use payload::QrPayload;
