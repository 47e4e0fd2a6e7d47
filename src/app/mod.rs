//! Application core: the publish loop, the reactor and their ports.
//!
//! Everything here talks to hardware and the broker through the traits
//! in [`ports`] and the [`Link`](crate::link::Link), so the whole
//! pipeline runs on the host against mock adapters.

pub mod commands;
pub mod events;
pub mod ports;
pub mod reactor;
pub mod service;
