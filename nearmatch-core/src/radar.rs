//! Radar placement for the nearby view. Pure: same id and signal always land on the same spot.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::identity::SelfId;

/// Signal at or below this sits on the outer ring.
pub const FAR_RSSI: f64 = -100.0;

/// Signal at or above this sits at the centre.
pub const NEAR_RSSI: f64 = -30.0;

/// Typical BLE transmit power measured at 1 m.
pub const DEFAULT_TX_POWER: f64 = -59.0;

/// Polar position: angle in degrees [0, 360), radius in [0, 1] (0 = centre).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadarPoint {
    pub angle_deg: f64,
    pub radius: f64,
}

/// Angle from a hash of the id, radius from the smoothed signal.
pub fn placement(id: &SelfId, smoothed_rssi: f64) -> RadarPoint {
    let digest = Sha256::digest(id.as_bytes());
    let bucket = u16::from_le_bytes([digest[0], digest[1]]);
    RadarPoint {
        angle_deg: f64::from(bucket) * 360.0 / 65536.0,
        radius: radius_for(smoothed_rssi),
    }
}

fn radius_for(rssi: f64) -> f64 {
    if rssi.is_nan() {
        return 1.0;
    }
    ((NEAR_RSSI - rssi) / (NEAR_RSSI - FAR_RSSI)).clamp(0.0, 1.0)
}

/// Log-distance path loss estimate in metres (free space exponent).
pub fn estimate_distance_m(rssi: f64, tx_power: f64) -> f64 {
    10f64.powf((tx_power - rssi) / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_is_stable_per_id() {
        let a = SelfId::from_bytes(*b"AAAAAAAA");
        let b = SelfId::from_bytes(*b"BBBBBBBB");
        assert_eq!(placement(&a, -60.0).angle_deg, placement(&a, -90.0).angle_deg);
        assert_ne!(placement(&a, -60.0).angle_deg, placement(&b, -60.0).angle_deg);
        let angle = placement(&a, -60.0).angle_deg;
        assert!((0.0..360.0).contains(&angle));
    }

    #[test]
    fn radius_tracks_signal() {
        let id = SelfId::from_bytes(*b"AAAAAAAA");
        assert_eq!(placement(&id, -20.0).radius, 0.0);
        assert_eq!(placement(&id, -30.0).radius, 0.0);
        assert_eq!(placement(&id, -100.0).radius, 1.0);
        assert_eq!(placement(&id, -120.0).radius, 1.0);
        assert!((placement(&id, -65.0).radius - 0.5).abs() < 1e-9);
        assert_eq!(placement(&id, f64::NAN).radius, 1.0);
    }

    #[test]
    fn distance_grows_as_signal_drops() {
        assert!((estimate_distance_m(DEFAULT_TX_POWER, DEFAULT_TX_POWER) - 1.0).abs() < 1e-9);
        assert!(estimate_distance_m(-80.0, DEFAULT_TX_POWER) > estimate_distance_m(-60.0, DEFAULT_TX_POWER));
    }
}
