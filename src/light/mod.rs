//! Colour light support.
//!
//! `protocol` builds command frames, `profile` picks the characteristics a
//! session needs, `session` owns the link and `controller` serializes access
//! to it.

pub mod controller;
pub mod profile;
pub mod protocol;
pub mod session;
