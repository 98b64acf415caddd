//! Application core boundary.
//!
//! [`ports`] defines the traits every adapter implements; [`status`] and
//! [`context`] hold the state shared between BootController and the
//! worker tasks.  Nothing in here performs I/O.

pub mod context;
pub mod ports;
pub mod status;
