//! Kalman-filter muon tagging.
//!
//! A 4-state linear filter `(x, y, tx, ty)` swept backward over the
//! populated layers of a trailing window. Seeds are built from hit pairs
//! in the back layer and a handful of earlier layers; at each layer the
//! nearest hit to the prediction is gated on its Mahalanobis distance
//! before the standard update. The best-scoring seed wins.
//!
//! The matrices are 4x4 and 2x2 throughout; the innovation covariance is
//! inverted in closed form and a determinant below 1e-24 rejects the
//! update.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::{Algorithm, EventStore, RunContext};
use ahcal_types::{geometry, RecoHit, Track};

/// Configuration of [`MuonKfAlg`]. Field names follow the YAML keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MuonKfCfg {
    /// Store key of the input calibrated hits.
    pub in_recohit_key: String,
    /// Store key of the output track.
    pub out_track_key: String,
    /// Use only the last N populated layers.
    #[serde(rename = "lastNLayers")]
    pub last_n_layers: i32,
    /// Minimum number of recorded hits for a seed to qualify.
    #[serde(rename = "minUsedLayers")]
    pub min_used_layers: i32,
    /// Terminate a sweep after this many skipped layers in a row.
    #[serde(rename = "maxConsecutiveSkips")]
    pub max_consecutive_skips: i32,
    /// Whether to restrict candidate hits to an Nmip window.
    #[serde(rename = "useNmipWindow")]
    pub use_nmip_window: bool,
    /// Lower edge of the Nmip window.
    #[serde(rename = "nmipMin")]
    pub nmip_min: f64,
    /// Upper edge of the Nmip window.
    #[serde(rename = "nmipMax")]
    pub nmip_max: f64,
    /// Measurement resolution in mm; non-positive means pitch/sqrt(12).
    #[serde(rename = "measSigmaXY_mm")]
    pub meas_sigma_xy_mm: f64,
    /// Slope process noise added per propagation step, rad.
    #[serde(rename = "sigmaTheta")]
    pub sigma_theta: f64,
    /// Gate on the Mahalanobis distance of the innovation.
    #[serde(rename = "gateD2")]
    pub gate_d2: f64,
    /// Minimum layer gap between the two seed layers.
    #[serde(rename = "seedLayerGap")]
    pub seed_layer_gap: i32,
    /// Candidate hits kept per seed layer, ranked by |Nmip - 1|.
    #[serde(rename = "maxSeedHitsPerLayer")]
    pub max_seed_hits_per_layer: i32,
    /// Layers excluded from the filter.
    #[serde(rename = "skipLayers")]
    pub skip_layers: Vec<i32>,
}

impl Default for MuonKfCfg {
    fn default() -> Self {
        Self {
            in_recohit_key: "RecoHits".to_owned(),
            out_track_key: "MuonKFTrack".to_owned(),
            last_n_layers: 40,
            min_used_layers: 10,
            max_consecutive_skips: 3,
            use_nmip_window: true,
            nmip_min: 0.2,
            nmip_max: 3.0,
            meas_sigma_xy_mm: 0.0,
            sigma_theta: 0.004,
            gate_d2: 9.0,
            seed_layer_gap: 4,
            max_seed_hits_per_layer: 8,
            skip_layers: vec![0, 2, 14],
        }
    }
}

const NLAYER: usize = geometry::LAYER_NO;

fn skip_mask(skip_layers: &[i32]) -> [bool; NLAYER] {
    let mut mask = [false; NLAYER];
    for &layer in skip_layers {
        if (0..NLAYER as i32).contains(&layer) {
            mask[layer as usize] = true;
        }
    }
    mask
}

fn default_sigma_mm() -> f64 {
    // Uniform tile response: sigma = pitch / sqrt(12).
    geometry::XY_SIZE / 12.0f64.sqrt()
}

//─────────────────────────────
//  Minimal linear algebra (4D state, 2D measurement)
//─────────────────────────────

type Mat4 = [[f64; 4]; 4];

fn mat4_eye() -> Mat4 {
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut r = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            let mut s = 0.0;
            for (k, bk) in b.iter().enumerate() {
                s += a[i][k] * bk[j];
            }
            r[i][j] = s;
        }
    }
    r
}

fn mat4_transpose(a: &Mat4) -> Mat4 {
    let mut r = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            r[i][j] = a[j][i];
        }
    }
    r
}

fn mat4_vec4(a: &Mat4, x: &[f64; 4]) -> [f64; 4] {
    let mut r = [0.0; 4];
    for i in 0..4 {
        let mut s = 0.0;
        for (j, xj) in x.iter().enumerate() {
            s += a[i][j] * xj;
        }
        r[i] = s;
    }
    r
}

struct KfState {
    xv: [f64; 4],
    c: Mat4,
    z: f64,
    chi2: f64,
    ndof: i32,
    consecutive_skips: i32,
    used: Vec<usize>,
}

fn propagate(trk: &mut KfState, z_to: f64, sigma_theta: f64) {
    let dz = z_to - trk.z;

    let mut f = mat4_eye();
    f[0][2] = dz;
    f[1][3] = dz;

    trk.xv = mat4_vec4(&f, &trk.xv);

    let ft = mat4_transpose(&f);
    let mut c = mat4_mul(&mat4_mul(&f, &trk.c), &ft);
    c[2][2] += sigma_theta * sigma_theta;
    c[3][3] += sigma_theta * sigma_theta;
    trk.c = c;

    trk.z = z_to;
}

fn update_with_hit(
    trk: &mut KfState,
    hit_idx: usize,
    hit: &RecoHit,
    sigma_xy: f64,
    gate_d2: f64,
) -> bool {
    let rx = hit.x() - trk.xv[0];
    let ry = hit.y() - trk.xv[1];

    // S = top-left 2x2 of C + R.
    let s00 = trk.c[0][0] + sigma_xy * sigma_xy;
    let s01 = trk.c[0][1];
    let s10 = trk.c[1][0];
    let s11 = trk.c[1][1] + sigma_xy * sigma_xy;

    let det = s00 * s11 - s01 * s10;
    if det.abs() < 1e-24 {
        return false;
    }
    let inv00 = s11 / det;
    let inv01 = -s01 / det;
    let inv10 = -s10 / det;
    let inv11 = s00 / det;

    let d2 = rx * (inv00 * rx + inv01 * ry) + ry * (inv10 * rx + inv11 * ry);
    if d2 > gate_d2 {
        return false;
    }

    // K = C H^T S^-1 (4x2), H picks (x, y).
    let mut k = [[0.0; 2]; 4];
    for i in 0..4 {
        let c0 = trk.c[i][0];
        let c1 = trk.c[i][1];
        k[i][0] = c0 * inv00 + c1 * inv10;
        k[i][1] = c0 * inv01 + c1 * inv11;
    }

    for i in 0..4 {
        trk.xv[i] += k[i][0] * rx + k[i][1] * ry;
    }

    // C <- (I - K H) C; (I - K H) only touches columns 0 and 1.
    let mut m = mat4_eye();
    for i in 0..4 {
        m[i][0] -= k[i][0];
        m[i][1] -= k[i][1];
    }
    trk.c = mat4_mul(&m, &trk.c);

    trk.chi2 += d2;
    trk.ndof += 2;
    trk.consecutive_skips = 0;
    trk.used.push(hit_idx);
    true
}

fn nmip_in_window(hit: &RecoHit, cfg: &MuonKfCfg) -> bool {
    !cfg.use_nmip_window || (hit.nmip >= cfg.nmip_min && hit.nmip <= cfg.nmip_max)
}

fn pick_nearest_hit(
    layer_hits: &[usize],
    hits: &[RecoHit],
    xpred: f64,
    ypred: f64,
    cfg: &MuonKfCfg,
) -> Option<usize> {
    let mut best = None;
    let mut best_d2 = f64::INFINITY;
    for &i in layer_hits {
        let h = &hits[i];
        if !nmip_in_window(h, cfg) {
            continue;
        }
        let dx = h.x() - xpred;
        let dy = h.y() - ypred;
        let d2 = dx * dx + dy * dy;
        if d2 < best_d2 {
            best_d2 = d2;
            best = Some(i);
        }
    }
    best
}

fn top_k_for_seed(layer_hits: &[usize], hits: &[RecoHit], cfg: &MuonKfCfg) -> Vec<usize> {
    let mut candidates: Vec<usize> = layer_hits
        .iter()
        .copied()
        .filter(|&i| nmip_in_window(&hits[i], cfg))
        .collect();
    candidates.sort_by(|&a, &b| {
        let da = (hits[a].nmip - 1.0).abs();
        let db = (hits[b].nmip - 1.0).abs();
        da.total_cmp(&db)
    });
    candidates.truncate(cfg.max_seed_hits_per_layer.max(0) as usize);
    candidates
}

/// Run the Kalman-filter muon search over one event's hits. Returns
/// `None` when no seed qualifies.
pub fn find_muon_track(reco_hits: &[RecoHit], cfg: &MuonKfCfg) -> Option<Track> {
    if reco_hits.is_empty() {
        return None;
    }

    let skip = skip_mask(&cfg.skip_layers);
    let mut by_layer: Vec<Vec<usize>> = vec![Vec::new(); NLAYER];
    let mut max_layer: i32 = -1;
    for (i, hit) in reco_hits.iter().enumerate() {
        let layer = hit.layer();
        if !(0..NLAYER as i32).contains(&layer) || skip[layer as usize] {
            continue;
        }
        by_layer[layer as usize].push(i);
        max_layer = max_layer.max(layer);
    }
    if max_layer < 0 {
        return None;
    }

    let l_end = max_layer;
    let l_start = (l_end - cfg.last_n_layers + 1).max(0);

    let layers: Vec<i32> = (l_start..=l_end)
        .filter(|&l| !skip[l as usize] && !by_layer[l as usize].is_empty())
        .collect();
    if layers.len() < 3 {
        return None;
    }

    let sigma_xy = if cfg.meas_sigma_xy_mm > 0.0 {
        cfg.meas_sigma_xy_mm
    } else {
        default_sigma_mm()
    };

    // Back seed layer: the last populated one in the window.
    let l2 = *layers.last()?;
    let hits_l2 = top_k_for_seed(&by_layer[l2 as usize], reco_hits, cfg);
    if hits_l2.is_empty() {
        return None;
    }

    // Up to four earlier seed layers with a sufficient gap.
    let mut seed_l1s = Vec::new();
    for &l1 in layers.iter().rev().skip(1) {
        if l2 - l1 >= cfg.seed_layer_gap {
            seed_l1s.push(l1);
        }
        if seed_l1s.len() >= 4 {
            break;
        }
    }
    if seed_l1s.is_empty() {
        return None;
    }

    let z2 = geometry::pos_z(l2);
    let mut best: Option<(f64, KfState)> = None;

    for &l1 in &seed_l1s {
        let hits_l1 = top_k_for_seed(&by_layer[l1 as usize], reco_hits, cfg);
        let z1 = geometry::pos_z(l1);
        let dz = z2 - z1;
        if dz.abs() < 1e-6 {
            continue;
        }

        for &h1 in &hits_l1 {
            for &h2 in &hits_l2 {
                let mut trk = KfState {
                    xv: [
                        reco_hits[h2].x(),
                        reco_hits[h2].y(),
                        (reco_hits[h2].x() - reco_hits[h1].x()) / dz,
                        (reco_hits[h2].y() - reco_hits[h1].y()) / dz,
                    ],
                    c: [[0.0; 4]; 4],
                    z: z2,
                    chi2: 0.0,
                    ndof: 0,
                    consecutive_skips: 0,
                    used: vec![h2],
                };
                let slope0 = 0.05; // loose slope prior
                trk.c[0][0] = sigma_xy * sigma_xy;
                trk.c[1][1] = sigma_xy * sigma_xy;
                trk.c[2][2] = slope0 * slope0;
                trk.c[3][3] = slope0 * slope0;

                // Sweep backward over the remaining active layers.
                for &layer in layers.iter().rev().skip(1) {
                    let z = geometry::pos_z(layer);
                    propagate(&mut trk, z, cfg.sigma_theta);

                    let xpred = trk.xv[0];
                    let ypred = trk.xv[1];
                    let picked = pick_nearest_hit(
                        &by_layer[layer as usize],
                        reco_hits,
                        xpred,
                        ypred,
                        cfg,
                    );
                    let updated = match picked {
                        Some(i) => update_with_hit(&mut trk, i, &reco_hits[i], sigma_xy, cfg.gate_d2),
                        None => false,
                    };
                    if !updated {
                        trk.consecutive_skips += 1;
                        if trk.consecutive_skips > cfg.max_consecutive_skips {
                            break;
                        }
                    }
                }

                let n_used = trk.used.len() as i32;
                if n_used < cfg.min_used_layers {
                    continue;
                }
                let chi2_ndof = if trk.ndof > 0 {
                    trk.chi2 / f64::from(trk.ndof)
                } else {
                    1e9
                };
                let score = chi2_ndof + 2.0 / f64::from(n_used);
                if best.as_ref().map_or(true, |(s, _)| score < *s) {
                    best = Some((score, trk));
                }
            }
        }
    }

    let (_, state) = best?;

    let mut track = Track {
        x: state.xv[0],
        y: state.xv[1],
        tx: state.xv[2],
        ty: state.xv[3],
        z: state.z,
        chi2: state.chi2,
        ndof: state.ndof,
        consecutive_skips: state.consecutive_skips,
        valid: true,
        ..Track::default()
    };
    for &i in &state.used {
        track.in_track_hits.push(reco_hits[i]);
        track.in_track_hit_indices.push(reco_hits[i].index);
        track.n_in_track_hits += 1;
    }
    for (i, hit) in reco_hits.iter().enumerate() {
        if !state.used.contains(&i) {
            track.out_track_hits.push(*hit);
            track.out_track_hit_indices.push(hit.index);
            track.n_out_track_hits += 1;
        }
    }
    Some(track)
}

/// The muon-tagging pipeline stage.
pub struct MuonKfAlg {
    name: String,
    cfg: MuonKfCfg,
}

impl MuonKfAlg {
    /// Build the stage from its `cfg` node.
    pub fn from_config(cfg: &serde_yaml::Value, name: &str) -> Result<Self> {
        let cfg: MuonKfCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid MuonKFAlg cfg")?;
        Ok(Self {
            name: name.to_owned(),
            cfg,
        })
    }
}

impl Algorithm for MuonKfAlg {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, store: &mut EventStore) -> Result<()> {
        let recohits = store.get::<Vec<RecoHit>>(&self.cfg.in_recohit_key)?.clone();

        match find_muon_track(&recohits, &self.cfg) {
            Some(track) => {
                debug!(
                    n_used = track.n_in_track_hits,
                    chi2 = track.chi2,
                    "muon track found"
                );
                store.put(self.cfg.out_track_key.clone(), track);
            }
            None => {
                debug!("no muon track");
                store.put(self.cfg.out_track_key.clone(), Track::default());
            }
        }
        Ok(())
    }
}

pub(crate) fn create(
    _ctx: &RunContext,
    cfg: &serde_yaml::Value,
    name: &str,
) -> Result<Box<dyn Algorithm>> {
    Ok(Box::new(MuonKfAlg::from_config(cfg, name)?))
}
