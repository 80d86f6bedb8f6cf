//! Slider percent ↔ engine dB model
//!
//! Level sliders (-100..+100 %) scale amplitude around a sweet-spot default:
//! 0 % is the default, +100 % doubles the amplitude and -100 % is silence.
//! EQ sliders (0..100 %) are linear between the band floor and its default.

use crate::store::GainChannel;

/// Highest gain VoiceMeeter accepts on a strip or bus
pub const ENGINE_MAX_DB: f64 = 12.0;
/// Lowest gain VoiceMeeter accepts on a strip or bus
pub const ENGINE_MIN_DB: f64 = -60.0;

/// dB value at the slider's neutral position
pub fn default_db(channel: GainChannel) -> f64 {
    match channel {
        GainChannel::Others => -32.0,
        GainChannel::Me => -30.0,
        GainChannel::Voice => 3.0,
        GainChannel::Bass => 12.0,
        GainChannel::Mid => 12.0,
        GainChannel::Treble => -8.0,
    }
}

/// dB value at the bottom of the slider
pub fn floor_db(channel: GainChannel) -> f64 {
    if channel.is_eq() {
        -12.0
    } else {
        ENGINE_MIN_DB
    }
}

pub fn ceil_db(_channel: GainChannel) -> f64 {
    ENGINE_MAX_DB
}

pub fn pct_to_db(pct: f64, channel: GainChannel) -> f64 {
    let (default, floor, ceil) = (default_db(channel), floor_db(channel), ceil_db(channel));
    if channel.is_eq() {
        return floor + (pct.clamp(0.0, 100.0) / 100.0) * (default - floor);
    }
    let amp = 1.0 + pct / 100.0;
    if pct <= -100.0 || amp <= 0.0 {
        return floor;
    }
    (default + 20.0 * amp.log10()).clamp(floor, ceil)
}

pub fn db_to_pct(db: f64, channel: GainChannel) -> f64 {
    let (default, floor) = (default_db(channel), floor_db(channel));
    if channel.is_eq() {
        let span = default - floor;
        if span == 0.0 {
            return 100.0;
        }
        return ((db - floor) / span * 100.0).clamp(0.0, 100.0);
    }
    if db <= floor {
        return -100.0;
    }
    let amp = 10f64.powf((db - default) / 20.0);
    ((amp - 1.0) * 100.0).clamp(-100.0, 100.0)
}

/// Round to the 0.1 dB resolution written to the engine
pub fn round_db(db: f64) -> f64 {
    (db * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_positions_hit_defaults() {
        for channel in GainChannel::ALL {
            let db = pct_to_db(channel.neutral(), channel);
            assert!((db - default_db(channel)).abs() < 1e-9, "{}", channel);
        }
    }

    #[test]
    fn test_level_extremes() {
        assert_eq!(pct_to_db(-100.0, GainChannel::Others), -60.0);
        // Doubling amplitude adds ~6 dB
        let db = pct_to_db(100.0, GainChannel::Me);
        assert!((db - (-30.0 + 6.0206)).abs() < 1e-3);
        let db = pct_to_db(100.0, GainChannel::Voice);
        assert!((db - 9.0206).abs() < 1e-3);
    }

    #[test]
    fn test_eq_is_linear() {
        assert_eq!(pct_to_db(0.0, GainChannel::Bass), -12.0);
        assert_eq!(pct_to_db(50.0, GainChannel::Bass), 0.0);
        assert_eq!(pct_to_db(50.0, GainChannel::Treble), -10.0);
    }

    #[test]
    fn test_inverse() {
        for channel in GainChannel::ALL {
            let (lo, hi) = channel.range();
            let mut pct = lo;
            while pct <= hi {
                let back = db_to_pct(pct_to_db(pct, channel), channel);
                assert!((back - pct).abs() < 1e-6, "{} {} -> {}", channel, pct, back);
                pct += 12.5;
            }
        }
    }

    #[test]
    fn test_below_floor_is_silent() {
        assert_eq!(db_to_pct(-80.0, GainChannel::Others), -100.0);
        assert_eq!(db_to_pct(-20.0, GainChannel::Mid), 0.0);
    }
}
