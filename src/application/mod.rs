//! Application services layer: catalog seam, session wiring and views.

pub mod catalog;
pub mod characters;
pub mod episodes;
pub mod error;
pub mod locations;
pub mod pagination;
pub mod session;
