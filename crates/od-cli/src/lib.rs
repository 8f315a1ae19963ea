//! ondemand: command-line front end for the OnDemand tunnel wrapper
//!
//! Wraps a build command in a tunnel lifecycle, runs node agents and
//! inspects configuration.

pub mod commands;
pub mod output;
