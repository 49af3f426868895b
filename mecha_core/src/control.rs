//! Continuous regulation.
//!
//! The PID regulator is a pure numerical component: it knows nothing about
//! scheduling or supervisory states. State machine `during` actions or
//! scheduler tasks drive it with measurements and timestamps.

pub mod pid;
