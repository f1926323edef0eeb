//! Synthetic house-price model used to generate reference data.
//!
//! Prices fall off from a handful of high-end centres with a Gaussian-like
//! decay, never drop below a base price, grow by a compound premium per
//! floor and carry a small deterministic noise term seeded from the
//! coordinates, so the same location always gets the same price.

use crate::{
    error::{KnnError, Result},
    estimate::AttributedPoints,
    types::PointSet,
};
use log::debug;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A premium location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighEndCenter {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Price at the centre itself
    pub peak_price: f64,
    /// Distance over which the premium decays
    pub influence_radius: f64,
}

/// Parameters of the city price surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CityParams {
    /// Premium locations
    pub high_end_centers: Vec<HighEndCenter>,
    /// Price floor anywhere in the city
    pub base_price: f64,
    /// Compound growth per floor above the first
    pub floor_premium: f64,
    /// Decay rate of centre influence
    pub distance_decay: f64,
    /// Relative width of the noise band (0 disables noise)
    pub noise_factor: f64,
}

impl Default for CityParams {
    fn default() -> Self {
        let center = |x, y, peak_price, influence_radius| HighEndCenter {
            x,
            y,
            peak_price,
            influence_radius,
        };
        Self {
            high_end_centers: vec![
                center(0.0, 0.0, 2000.0, 5.0),
                center(2.0, 1.0, 1500.0, 3.0),
                center(-1.0, 3.0, 1200.0, 2.5),
                center(1.0, -2.0, 1000.0, 2.0),
            ],
            base_price: 200.0,
            floor_premium: 0.05,
            distance_decay: 0.3,
            noise_factor: 0.1,
        }
    }
}

impl CityParams {
    /// Parses and validates parameters from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: CityParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Loads and validates parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading city parameters from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks that every parameter is usable.
    pub fn validate(&self) -> Result<()> {
        for (i, c) in self.high_end_centers.iter().enumerate() {
            if !(c.influence_radius > 0.0) {
                return Err(KnnError::ConfigError(format!(
                    "centre {} has non-positive influence radius {}",
                    i, c.influence_radius
                )));
            }
        }
        if !(self.noise_factor >= 0.0) {
            return Err(KnnError::ConfigError(format!(
                "noise_factor must be non-negative, got {}",
                self.noise_factor
            )));
        }
        if !(self.floor_premium > -1.0) {
            return Err(KnnError::ConfigError(format!(
                "floor_premium must be greater than -1, got {}",
                self.floor_premium
            )));
        }
        Ok(())
    }

    /// Price (in thousands) of a home at `(x, y)` on `floor` (1 = ground).
    pub fn house_price(&self, x: f64, y: f64, floor: f64) -> f64 {
        let mut price = self
            .high_end_centers
            .iter()
            .map(|c| {
                let distance = (x - c.x).hypot(y - c.y);
                c.peak_price * (-self.distance_decay * (distance / c.influence_radius).powi(2)).exp()
            })
            .fold(self.base_price, f64::max);

        price *= (1.0 + self.floor_premium).powf(floor - 1.0);

        if self.noise_factor > 0.0 {
            let seed = ((x * 1000.0 + y * 1000.0) as i64).rem_euclid(1 << 32) as u64;
            let mut rng = StdRng::seed_from_u64(seed);
            price *= 1.0 + self.noise_factor * (rng.gen::<f64>() - 0.5);
        }
        price
    }

    /// Samples `n` homes uniformly over `[-extent, extent]²` on floors
    /// `1..=max_floor`, priced by [`CityParams::house_price`].
    ///
    /// Points are `(x, y, floor)`; the price is the attached value.
    pub fn sample_reference<R: Rng>(
        &self,
        n: usize,
        extent: f32,
        max_floor: u32,
        rng: &mut R,
    ) -> Result<AttributedPoints> {
        if !(extent > 0.0) || max_floor == 0 {
            return Err(KnnError::InvalidInput(format!(
                "extent must be positive and max_floor at least 1 (got {}, {})",
                extent, max_floor
            )));
        }
        let mut coords = Vec::with_capacity(n * 3);
        let mut prices = Vec::with_capacity(n);
        for _ in 0..n {
            let x = rng.gen_range(-extent..=extent);
            let y = rng.gen_range(-extent..=extent);
            let floor = rng.gen_range(1..=max_floor) as f32;
            coords.extend_from_slice(&[x, y, floor]);
            prices.push(self.house_price(f64::from(x), f64::from(y), f64::from(floor)) as f32);
        }
        AttributedPoints::new(PointSet::new(coords, 3)?, prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn noiseless() -> CityParams {
        CityParams {
            noise_factor: 0.0,
            ..CityParams::default()
        }
    }

    #[test]
    fn test_peak_at_main_centre() {
        assert_relative_eq!(noiseless().house_price(0.0, 0.0, 1.0), 2000.0);
    }

    #[test]
    fn test_base_price_far_away() {
        assert_relative_eq!(noiseless().house_price(100.0, 100.0, 1.0), 200.0);
    }

    #[test]
    fn test_floor_premium_compounds() {
        let city = noiseless();
        let ground = city.house_price(100.0, 100.0, 1.0);
        assert_relative_eq!(city.house_price(100.0, 100.0, 3.0), ground * 1.05 * 1.05, epsilon = 1e-9);
    }

    #[test]
    fn test_noise_is_deterministic_and_bounded() {
        let city = CityParams::default();
        let a = city.house_price(1.5, -2.25, 2.0);
        let b = city.house_price(1.5, -2.25, 2.0);
        assert_eq!(a, b);

        let clean = noiseless().house_price(1.5, -2.25, 2.0);
        assert!((a / clean - 1.0).abs() <= 0.05 + 1e-12);
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let json = serde_json::to_string(&CityParams::default()).unwrap();
        assert_eq!(CityParams::from_json_str(&json).unwrap(), CityParams::default());

        let bad = r#"{"high_end_centers": [{"x": 0, "y": 0, "peak_price": 1, "influence_radius": 0}],
                      "base_price": 1, "floor_premium": 0, "distance_decay": 1, "noise_factor": 0}"#;
        assert!(matches!(CityParams::from_json_str(bad), Err(KnnError::ConfigError(_))));
        assert!(matches!(CityParams::from_json_str("{"), Err(KnnError::Json(_))));
        assert!(matches!(
            CityParams::from_json_file("/nonexistent/city.json"),
            Err(KnnError::Io(_))
        ));
    }

    #[test]
    fn test_sample_reference() {
        let mut rng = StdRng::seed_from_u64(7);
        let homes = CityParams::default().sample_reference(50, 8.0, 5, &mut rng).unwrap();
        assert_eq!(homes.points().len(), 50);
        assert_eq!(homes.points().dim(), 3);
        for (p, &price) in homes.points().rows().zip(homes.values()) {
            assert!(p[0].abs() <= 8.0 && p[1].abs() <= 8.0);
            assert!((1.0..=5.0).contains(&p[2]) && p[2].fract() == 0.0);
            assert!(price > 0.0);
        }
        assert!(CityParams::default().sample_reference(5, 0.0, 5, &mut rng).is_err());
    }
}
