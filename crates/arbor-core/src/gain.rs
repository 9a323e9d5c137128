//! Gain range shared by branch gains, sum gains and per-plugin trims.
//!
//! Branch gains are stored in dB on the control side and converted here into
//! the linear factor the audio side multiplies by. The lower bound is a hard
//! floor: anything at or below [`BRANCH_MIN_DB`] becomes exactly `0.0`.
//!
//! ```rust
//! use arbor_core::gain;
//!
//! assert_eq!(gain::branch_gain_to_linear(0.0), 1.0);
//! assert_eq!(gain::branch_gain_to_linear(-60.0), 0.0);
//! assert_eq!(gain::clamp_branch_gain_db(40.0), 24.0);
//! ```

use crate::db_to_linear;

/// Lowest branch gain in dB. Values at or below this are silent.
pub const BRANCH_MIN_DB: f32 = -60.0;

/// Highest branch gain in dB.
pub const BRANCH_MAX_DB: f32 = 24.0;

/// Smoothing time for gain and mix ramps.
pub const GAIN_RAMP_MS: f32 = 20.0;

/// Clamps a gain to [`BRANCH_MIN_DB`]..=[`BRANCH_MAX_DB`]. NaN maps to 0 dB.
#[inline]
pub fn clamp_branch_gain_db(db: f32) -> f32 {
    if db.is_nan() {
        return 0.0;
    }
    db.clamp(BRANCH_MIN_DB, BRANCH_MAX_DB)
}

/// Converts a branch gain in dB to a linear factor with the -60 dB floor.
#[inline]
pub fn branch_gain_to_linear(db: f32) -> f32 {
    let db = clamp_branch_gain_db(db);
    if db <= BRANCH_MIN_DB {
        0.0
    } else {
        db_to_linear(db)
    }
}

/// Linear factor that normalizes a sum of `active` equal branches.
///
/// Equivalent to `-20 * log10(active)` dB. Zero active branches yield silence.
#[inline]
pub fn sum_compensation(active: usize) -> f32 {
    if active == 0 {
        0.0
    } else {
        1.0 / active as f32
    }
}
