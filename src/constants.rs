//! # Constants and type definitions for astrotap
//!
//! This module centralizes the **physical constants**, **conversion factors**, and **common type
//! aliases** used throughout the crate, together with the default TAP+ endpoint of the Gaia
//! archive.
//!
//! ## Overview
//!
//! - Astrometric constants (tangential velocity factor, parsec/mas conversions)
//! - Unit conversions (degrees ↔ radians, milliarcseconds ↔ radians)
//! - Core type aliases used across the crate
//! - Default archive location and contexts

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Milliarcseconds → radians
pub const RADMAS: f64 = std::f64::consts::PI / 648_000_000.0;

/// Tangential velocity factor: 1 AU/yr expressed in km/s.
///
/// With a proper motion μ in mas/yr and a parallax ϖ in mas,
/// `v_t = K_VTAN · μ / ϖ` in km/s.
pub const K_VTAN: f64 = 4.740470446;

/// Parsecs per (1 / milliarcsecond): distance in pc is `MAS_PARSEC / ϖ[mas]`.
pub const MAS_PARSEC: f64 = 1000.0;

/// Number of astrometric parameters of a five-parameter solution,
/// subtracted from the number of good observations in the UWE.
pub const N_ASTROMETRIC_PARAMS: f64 = 5.0;

/// Rotation matrix from ICRS to Galactic coordinates (Hipparcos definition, row-major).
pub const ICRS_TO_GALACTIC: [[f64; 3]; 3] = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885_0, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

// -------------------------------------------------------------------------------------------------
// Archive defaults
// -------------------------------------------------------------------------------------------------

/// TAP+ endpoint of the ESA Gaia archive
pub const GAIA_TAP_URL: &str = "https://gea.esac.esa.int/tap-server/tap";

/// Server context under which login/logout and uploads live
pub const GAIA_SERVER_CONTEXT: &str = "tap-server";

/// Upload context (relative to the server context)
pub const GAIA_UPLOAD_CONTEXT: &str = "Upload";

/// Schemas never reported by a table listing
pub const HIDDEN_SCHEMAS: [&str; 2] = ["tap_schema", "external"];

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Angle in degrees
pub type Degree = f64;
/// Angle in milliarcseconds
pub type MilliArcSec = f64;
/// Angular rate in milliarcseconds per year
pub type MasPerYear = f64;
/// Speed in kilometers per second
pub type KmPerSec = f64;
/// Distance in parsecs
pub type Parsec = f64;
/// Magnitude (dimensionless, logarithmic)
pub type Magnitude = f64;

/// Job identifier assigned by the archive
pub type JobId = String;
