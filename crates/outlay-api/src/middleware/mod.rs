//! HTTP middleware: session resolution and the request gate.
pub mod gate;
pub mod session;

pub use gate::{request_gate, GateDecision, RequestGate, RoutePolicy};
pub use session::{Identity, SessionVerifier};
