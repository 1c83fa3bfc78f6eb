//! Domain logic for the wecker internet-radio alarm clock: input decoding,
//! stores, alarm scheduling, navigation and frame rendering. Everything here
//! is hardware-free and runs the same on the appliance and on a dev machine;
//! the daemon crate supplies the event loop and the device adapters.

pub mod alarm;
pub mod config;
pub mod input;
pub mod model;
pub mod platform;
pub mod render;
pub mod store;
pub mod ui;
