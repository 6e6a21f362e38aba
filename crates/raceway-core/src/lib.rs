//! Race queue, lap ledger, session state machine, and control loop for
//! Raceway.
//!
//! This crate owns the authoritative race state. All of it lives in one
//! [`RaceControl`] value that is moved into the control loop; every
//! command, query, and countdown tick is serialized through that loop.
//!
//! # Modules
//!
//! - [`broadcast`] -- Event fan-out to connected displays.
//! - [`config`] -- Configuration loading from `raceway-config.yaml` into
//!   strongly-typed structs.
//! - [`control`] -- [`RaceControl`], the session state machine.
//! - [`countdown`] -- Second counter and the ticker that drives it.
//! - [`ledger`] -- Per-car lap history and the leaderboard.
//! - [`queue`] -- FIFO race queue and roster validation.
//! - [`runner`] -- The control loop task and its [`ControlHandle`].
//! - [`sink`] -- [`StateSink`] trait for durable-state reporting.
//!
//! [`RaceControl`]: control::RaceControl
//! [`ControlHandle`]: runner::ControlHandle
//! [`StateSink`]: sink::StateSink

pub mod broadcast;
pub mod config;
pub mod control;
pub mod countdown;
pub mod ledger;
pub mod queue;
pub mod runner;
pub mod sink;
