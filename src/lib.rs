//! Serial pad: a controller for a remote device reachable over a
//! bidirectional byte stream.
//!
//! The crate is organised like the desktop app it drives:
//!
//! - [`domain`] - lifecycle state, settings and the connection state machine
//! - [`infrastructure`] - transports, link monitor, dispatcher, platform
//!   collaborators, logging and the device-side receiver
//! - [`presentation`] - terminal front end

pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::controller::{ConnectionController, ControllerHandle, Intent};
pub use domain::models::{ConnectionState, Direction, PeerDescriptor, PeerHandle, Snapshot};
