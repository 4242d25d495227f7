//! Waypoint navigation
//!
//! - [`geo`]: great-circle geometry on the WGS-84 sphere
//! - [`pid`]: the heading-correction controller
//! - [`waypoints`]: the target queue with loop support
//! - [`navigator`]: the phase machine turning positions into drive commands

pub mod geo;
pub mod navigator;
pub mod pid;
pub mod waypoints;

pub use navigator::{DriveCommand, NavMode, NavPhase, NavState, NavStatus, Navigator};
pub use pid::PidController;
pub use waypoints::{Waypoint, WaypointQueue};
