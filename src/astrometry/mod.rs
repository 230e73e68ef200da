//! # Astrometric derived quantities
//!
//! Computations over catalog tables returned by the archive, with first-order uncertainty
//! propagation.
//!
//! ## Modules
//!
//! - [`covariance`]: per-row covariance matrices from `<p>_error` and `<a>_<b>_corr` columns.
//! - [`accessors`]: scalar functions (tangential velocity, distance modulus, photometry flags).
//! - [`ruwe`]: unit weight error and its lookup-table renormalisation.
//! - [`frames`]: ICRS and Galactic Cartesian position and velocity with propagated covariance.
//! - [`registry`]: named derived columns evaluated over whole tables.
//!
//! Every function is pure: a row's result depends only on that row.
pub mod accessors;
pub mod covariance;
pub mod frames;
pub mod registry;
pub mod ruwe;
