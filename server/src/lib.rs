//! # Vehicle Telemetry Server Library
//!
//! Multi-client control-and-telemetry server for a simulated remote vehicle,
//! speaking the line-oriented VATP/1.0 protocol over TCP. Observers receive
//! periodic state broadcasts; authenticated administrators drive the vehicle
//! with movement commands.
//!
//! ## Architecture
//!
//! One tokio task per accepted connection runs the read/dispatch loop, one
//! task runs the periodic telemetry broadcaster, and the accept loop itself
//! is the third concurrent unit. Three shared resources each sit behind
//! their own lock:
//!
//! - the **session registry** (`sessions`), a fixed-capacity table of live
//!   connections refusing new sessions at capacity,
//! - the **auth service** (`auth`), a static account table with one-hour
//!   single-token sessions,
//! - the **vehicle** (`vehicle`), whose command admission check and mutation
//!   run as one critical section.
//!
//! The wire protocol itself (framing, parsing, encoding) lives in the
//! `shared` crate so test clients can speak it too.
//!
//! ## Lifecycle
//!
//! `Server::bind` acquires the port and seeds the shared state;
//! `Server::run` drives the accept loop until a `watch` shutdown signal
//! fires, then closes every registered session socket. Connection faults
//! only ever terminate the affected session.

pub mod auth;
pub mod broadcast;
pub mod handler;
pub mod network;
pub mod sessions;
pub mod vehicle;
