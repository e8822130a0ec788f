//! Presentation layer: rendering of view states.

pub mod views;
