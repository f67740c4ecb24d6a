//! Batch-wide rain normalization.
//!
//! Rescales hourly rain into 0–100 using the batch's observed range. Runs
//! strictly after every record in the batch has been fetched.

use crate::types::{RainRange, WeatherRecord};

/// Upper bound of the normalized scale.
pub const SCALE_MAX: f64 = 100.0;

/// Rescale one record's hourly rain into `[0, 100]`.
///
/// Left unchanged when `max == 0` (no rain anywhere in the batch) or when
/// every value is equal, since there is no spread to scale against.
pub fn normalize(record: &mut WeatherRecord, range: &RainRange) {
    if range.max == 0.0 || range.span() == 0.0 || range.is_empty() {
        return;
    }
    record.rain.per_hour = (record.rain.per_hour - range.min) / range.span() * SCALE_MAX;
}

/// Second pass over a complete batch.
pub fn normalize_batch(records: &mut [WeatherRecord], range: &RainRange) {
    for record in records.iter_mut() {
        normalize(record, range);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
