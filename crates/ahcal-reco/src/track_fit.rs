//! Straight-line track fit.
//!
//! Two independent weighted linear regressions over the (z, x) and (z, y)
//! projections. Hits below half a MIP are excluded from the fit; every
//! input hit is then classified against the fitted line by its residual
//! pair.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::{Algorithm, EventStore, RunContext};
use ahcal_types::{geometry, RecoHit, SimpleFittedTrack};

/// Configuration of [`TrackFitAlg`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackFitCfg {
    /// Store key of the input calibrated hits.
    pub in_recohit_key: String,
    /// Store key of the output fitted track.
    pub out_track_key: String,
    /// In-track residual threshold in x and y, mm.
    pub threshold_xy: f64,
}

impl Default for TrackFitCfg {
    fn default() -> Self {
        Self {
            in_recohit_key: "RecoHits".to_owned(),
            out_track_key: "SimpleFittedTrack".to_owned(),
            threshold_xy: geometry::XY_SIZE / 2.0,
        }
    }
}

const SLOPE_LIMIT: f64 = 20.0;

pub(crate) struct Projection {
    pub(crate) intercept: f64,
    pub(crate) slope: f64,
    pub(crate) chi2: f64,
}

/// Weighted least squares of `dep = intercept + slope * ind`.
///
/// The independent-coordinate error is folded into the weight through the
/// current slope (effective variance), iterated a few times from a flat
/// start. The slope is constrained by clamping and refitting the
/// intercept at the clamped value.
pub(crate) fn fit_projection(
    points: &[(f64, f64)],
    sigma_ind: f64,
    sigma_dep: f64,
) -> Option<Projection> {
    if points.len() < 2 {
        return None;
    }
    let mut slope = 0.0f64;
    let mut intercept = 0.0f64;
    for _ in 0..3 {
        let var = sigma_dep * sigma_dep + slope * slope * sigma_ind * sigma_ind;
        let w = 1.0 / var;
        let mut sw = 0.0;
        let mut sz = 0.0;
        let mut sx = 0.0;
        let mut szz = 0.0;
        let mut szx = 0.0;
        for &(z, x) in points {
            sw += w;
            sz += w * z;
            sx += w * x;
            szz += w * z * z;
            szx += w * z * x;
        }
        let det = sw * szz - sz * sz;
        if det.abs() < 1e-12 {
            return None;
        }
        slope = (sw * szx - sz * sx) / det;
        intercept = (szz * sx - sz * szx) / det;
        if slope.abs() > SLOPE_LIMIT {
            slope = slope.clamp(-SLOPE_LIMIT, SLOPE_LIMIT);
            intercept = (sx - slope * sz) / sw;
        }
    }

    let var = sigma_dep * sigma_dep + slope * slope * sigma_ind * sigma_ind;
    let chi2 = points
        .iter()
        .map(|&(z, x)| {
            let r = x - (intercept + slope * z);
            r * r / var
        })
        .sum();
    Some(Projection {
        intercept,
        slope,
        chi2,
    })
}

/// The straight-line fit pipeline stage.
pub struct TrackFitAlg {
    name: String,
    cfg: TrackFitCfg,
}

impl TrackFitAlg {
    /// Build the stage from its `cfg` node.
    pub fn from_config(cfg: &serde_yaml::Value, name: &str) -> Result<Self> {
        let cfg: TrackFitCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid TrackFitAlg cfg")?;
        Ok(Self {
            name: name.to_owned(),
            cfg,
        })
    }
}

impl Algorithm for TrackFitAlg {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, store: &mut EventStore) -> Result<()> {
        let recohits = store.get::<Vec<RecoHit>>(&self.cfg.in_recohit_key)?.clone();

        let mut track = SimpleFittedTrack::default();
        if recohits.is_empty() {
            debug!("no input reco hits");
            store.put(self.cfg.out_track_key.clone(), track);
            return Ok(());
        }

        let mut xz = Vec::new();
        let mut yz = Vec::new();
        for hit in &recohits {
            if hit.nmip < 0.5 {
                continue;
            }
            track.n_total_hits += 1;
            xz.push((hit.z(), hit.x()));
            yz.push((hit.z(), hit.y()));
        }
        if track.n_total_hits < 3 {
            debug!(hits = track.n_total_hits, "not enough hits to fit a track");
            store.put(self.cfg.out_track_key.clone(), track);
            return Ok(());
        }

        let sigma_z = geometry::Z_SIZE / 2.0;
        let sigma_xy = geometry::XY_SIZE / 2.0;
        let (fit_x, fit_y) = match (
            fit_projection(&xz, sigma_z, sigma_xy),
            fit_projection(&yz, sigma_z, sigma_xy),
        ) {
            (Some(fx), Some(fy)) => (fx, fy),
            _ => {
                debug!("fit failed");
                store.put(self.cfg.out_track_key.clone(), track);
                return Ok(());
            }
        };

        track.valid = true;
        track.init_pos_x = fit_x.intercept;
        track.init_pos_y = fit_y.intercept;
        track.direction_x = fit_x.slope;
        track.direction_y = fit_y.slope;
        track.chi2_x = fit_x.chi2;
        track.chi2_y = fit_y.chi2;
        track.ndf = track.n_total_hits - 2;

        for (index, hit) in recohits.iter().enumerate() {
            let x_pred = fit_x.intercept + fit_x.slope * hit.z();
            let y_pred = fit_y.intercept + fit_y.slope * hit.z();
            let dx = hit.x() - x_pred;
            let dy = hit.y() - y_pred;
            if dx.abs() < self.cfg.threshold_xy && dy.abs() < self.cfg.threshold_xy {
                track.in_track_hits.push(*hit);
                track.in_track_hit_indices.push(index as i32);
            } else {
                track.out_track_hits.push(*hit);
                track.out_track_hit_indices.push(index as i32);
            }
        }

        store.put(self.cfg.out_track_key.clone(), track);
        Ok(())
    }
}

pub(crate) fn create(
    _ctx: &RunContext,
    cfg: &serde_yaml::Value,
    name: &str,
) -> Result<Box<dyn Algorithm>> {
    Ok(Box::new(TrackFitAlg::from_config(cfg, name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahcal_types::edm::pack_cell_id;

    fn alg(threshold_xy: f64) -> TrackFitAlg {
        let cfg = serde_yaml::from_str(&format!("{{threshold_xy: {threshold_xy}}}")).unwrap();
        TrackFitAlg::from_config(&cfg, "TrackFitAlg").unwrap()
    }

    fn hit_on(layer: i32, chip: i32, channel: i32, nmip: f64, index: i32) -> RecoHit {
        RecoHit {
            cell_id: pack_cell_id(layer, chip, channel),
            edep: nmip * 0.461,
            nmip,
            index,
        }
    }

    #[test]
    fn a_vertical_line_of_hits_fits_exactly() {
        // One tile per layer, same tile everywhere: slope 0, chi2 0.
        let hits: Vec<RecoHit> = (0..5).map(|l| hit_on(l, 0, 0, 1.0, l)).collect();
        let x0 = hits[0].x();
        let y0 = hits[0].y();

        let mut store = EventStore::new();
        store.put("RecoHits", hits);
        alg(1.0).execute(&mut store).unwrap();

        let t: &SimpleFittedTrack = store.get("SimpleFittedTrack").unwrap();
        assert!(t.valid);
        assert_eq!(t.n_total_hits, 5);
        assert_eq!(t.ndf, 3);
        assert!(t.direction_x.abs() < 1e-9);
        assert!(t.direction_y.abs() < 1e-9);
        assert!((t.init_pos_x - x0).abs() < 1e-9);
        assert!((t.init_pos_y - y0).abs() < 1e-9);
        assert!(t.chi2_x.abs() < 1e-9);
        assert!(t.chi2_y.abs() < 1e-9);
        assert_eq!(t.in_track_hit_indices, vec![0, 1, 2, 3, 4]);
        assert!(t.out_track_hit_indices.is_empty());
    }

    #[test]
    fn two_hits_are_not_enough() {
        let hits: Vec<RecoHit> = (0..2).map(|l| hit_on(l, 0, 0, 1.0, l)).collect();
        let mut store = EventStore::new();
        store.put("RecoHits", hits);
        alg(1.0).execute(&mut store).unwrap();

        let t: &SimpleFittedTrack = store.get("SimpleFittedTrack").unwrap();
        assert!(!t.valid);
        assert_eq!(t.n_total_hits, 2);
        assert!(t.in_track_hit_indices.is_empty());
        assert!(t.out_track_hit_indices.is_empty());
    }

    #[test]
    fn low_mip_hits_are_classified_but_not_fitted() {
        let mut hits: Vec<RecoHit> = (0..4).map(|l| hit_on(l, 0, 0, 1.0, l)).collect();
        // A noise hit on a distant tile, below the fit threshold.
        hits.push(hit_on(2, 8, 20, 0.2, 4));

        let mut store = EventStore::new();
        store.put("RecoHits", hits);
        alg(20.0).execute(&mut store).unwrap();

        let t: &SimpleFittedTrack = store.get("SimpleFittedTrack").unwrap();
        assert!(t.valid);
        // Only the four line hits entered the fit.
        assert_eq!(t.n_total_hits, 4);
        assert_eq!(t.ndf, 2);
        // All five hits were classified; the partition covers the input.
        assert_eq!(
            t.in_track_hit_indices.len() + t.out_track_hit_indices.len(),
            5
        );
        assert_eq!(t.out_track_hit_indices, vec![4]);
    }

    #[test]
    fn empty_input_publishes_an_invalid_track() {
        let mut store = EventStore::new();
        store.put("RecoHits", Vec::<RecoHit>::new());
        alg(1.0).execute(&mut store).unwrap();
        let t: &SimpleFittedTrack = store.get("SimpleFittedTrack").unwrap();
        assert!(!t.valid);
        assert_eq!(t.n_total_hits, 0);
    }

    #[test]
    fn steep_fits_clamp_the_slope() {
        // Two clusters far apart in x over a tiny z lever arm.
        let points = vec![(0.0, 0.0), (1.0, 500.0), (2.0, 1000.0)];
        let fit = fit_projection(&points, 1.5, 20.0).unwrap();
        assert_eq!(fit.slope, SLOPE_LIMIT);
    }

    #[test]
    fn single_layer_hits_cannot_be_fitted() {
        let points = vec![(10.0, 0.0), (10.0, 40.0), (10.0, 80.0)];
        assert!(fit_projection(&points, 1.5, 20.0).is_none());
    }
}
