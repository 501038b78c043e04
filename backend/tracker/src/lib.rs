//! # Tracker
//!
//! Domain model and the algorithmic core of the lost-and-found service:
//!
//! - [`geo`]: haversine distance and coordinate validation
//! - [`route`]: per-pet travel paths from unordered reports
//! - [`proximity`]: which lost pets are near a viewer, and per-session alert memory
//! - [`closure`]: the two-confirmation quorum gating case closure
//! - [`position`]: refining a noisy geolocation stream into one fix
//! - [`search`]: pet list filtering and ordering
//!
//! Nothing here performs I/O. The `server` crate owns the data store and every
//! other external collaborator.

pub mod closure;
pub mod error;
pub mod geo;
pub mod models;
pub mod position;
pub mod proximity;
pub mod route;
pub mod search;

pub use error::TrackerError;
pub use geo::Coordinates;
