//! Pedestal collection and fitting.
//!
//! Per channel and per gain stage, ADC spectra accumulate over the whole
//! run. At finalization each spectrum with enough entries gets a two-pass
//! Gaussian fit (window seeded from the modal bin and a clamped RMS,
//! then re-centered on the first-pass result). One row per channel is
//! written to the `pedestal` table; the per-layer occupancy of means,
//! widths and entries goes to the `ped_map2d` companion table on the
//! fixed 18x18 tile grid. The write is guarded so it happens exactly
//! once.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info};

use ahcal_core::{Algorithm, EventStore, RunContext};
use ahcal_io::file::{write_tables, Table};
use ahcal_types::{geometry, RawHit};

/// Configuration of [`PedestalAlg`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PedestalCfg {
    /// Store key of the input raw hits.
    pub in_rawhit_key: String,
    /// Whether to write the pedestal file at all.
    pub pedestal_to_file: bool,
    /// Output file path.
    pub out_pedestal_filename: String,
    /// Number of histogram bins.
    pub nbin: usize,
    /// Lower histogram edge, ADC counts.
    pub xmin: f64,
    /// Upper histogram edge, ADC counts.
    pub xmax: f64,
    /// Minimum entries required before fitting a spectrum.
    pub min_entries: u64,
    /// First fit window half-width, in units of the seed sigma.
    pub nsigma_win1: f64,
    /// Second fit window half-width, in units of the first-pass sigma.
    pub nsigma_win2: f64,
    /// Lower clamp of the fitted sigma.
    pub sigma_min: f64,
    /// Upper clamp of the fitted sigma.
    pub sigma_max: f64,
    /// Whether to select hits by tag.
    pub use_hittag: bool,
    /// The tag selecting pedestal-like hits.
    pub select_hittag: i32,
}

impl Default for PedestalCfg {
    fn default() -> Self {
        Self {
            in_rawhit_key: "RawHits".to_owned(),
            pedestal_to_file: true,
            out_pedestal_filename: "pedestal.root".to_owned(),
            nbin: 800,
            xmin: 0.0,
            xmax: 2000.0,
            min_entries: 200,
            nsigma_win1: 2.0,
            nsigma_win2: 1.5,
            sigma_min: 0.5,
            sigma_max: 200.0,
            use_hittag: true,
            select_hittag: 0,
        }
    }
}

//─────────────────────────────
//  Histogram and Gaussian fit
//─────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct Hist1D {
    nbin: usize,
    xmin: f64,
    xmax: f64,
    counts: Vec<f64>,
    entries: u64,
    sum: f64,
    sum2: f64,
}

impl Hist1D {
    pub(crate) fn new(nbin: usize, xmin: f64, xmax: f64) -> Self {
        Self {
            nbin,
            xmin,
            xmax,
            counts: vec![0.0; nbin],
            entries: 0,
            sum: 0.0,
            sum2: 0.0,
        }
    }

    pub(crate) fn fill(&mut self, v: f64) {
        if v < self.xmin || v > self.xmax {
            return;
        }
        let width = (self.xmax - self.xmin) / self.nbin as f64;
        let bin = (((v - self.xmin) / width) as usize).min(self.nbin - 1);
        self.counts[bin] += 1.0;
        self.entries += 1;
        self.sum += v;
        self.sum2 += v * v;
    }

    pub(crate) fn entries(&self) -> u64 {
        self.entries
    }

    fn bin_center(&self, bin: usize) -> f64 {
        let width = (self.xmax - self.xmin) / self.nbin as f64;
        self.xmin + (bin as f64 + 0.5) * width
    }

    fn modal_center(&self) -> f64 {
        let mut best = 0;
        for (i, c) in self.counts.iter().enumerate() {
            if *c > self.counts[best] {
                best = i;
            }
        }
        self.bin_center(best)
    }

    fn rms(&self) -> f64 {
        if self.entries == 0 {
            return 0.0;
        }
        let n = self.entries as f64;
        let mean = self.sum / n;
        (self.sum2 / n - mean * mean).max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FitOut {
    pub(crate) mean: f64,
    pub(crate) sigma: f64,
    pub(crate) status: i32,
    pub(crate) ok: bool,
}

impl Default for FitOut {
    fn default() -> Self {
        Self {
            mean: -1.0,
            sigma: -1.0,
            status: 999,
            ok: false,
        }
    }
}

fn solve3(mut m: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let mut pivot = col;
        for row in col + 1..3 {
            if m[row][col].abs() > m[pivot][col].abs() {
                pivot = row;
            }
        }
        if m[pivot][col].abs() < 1e-300 {
            return None;
        }
        m.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..3 {
            let f = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= f * m[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let mut s = b[row];
        for k in row + 1..3 {
            s -= m[row][k] * x[k];
        }
        x[row] = s / m[row][row];
    }
    Some(x)
}

// Weighted log-parabola Gaussian estimate over one window: fit
// ln y = a + b x + c x^2 with weights y^2, then mu = -b/2c and
// sigma^2 = -1/2c. Needs a concave parabola and at least three
// populated bins.
fn gauss_fit_window(h: &Hist1D, x1: f64, x2: f64) -> Option<(f64, f64)> {
    let mut m = [[0.0; 3]; 3];
    let mut rhs = [0.0; 3];
    let mut populated = 0;
    for (bin, &y) in h.counts.iter().enumerate() {
        let x = h.bin_center(bin);
        if x < x1 || x > x2 || y <= 0.0 {
            continue;
        }
        populated += 1;
        let w = y * y;
        let ln = y.ln();
        let xs = [1.0, x, x * x];
        for r in 0..3 {
            for c in 0..3 {
                m[r][c] += w * xs[r] * xs[c];
            }
            rhs[r] += w * xs[r] * ln;
        }
    }
    if populated < 3 {
        return None;
    }
    let sol = solve3(m, rhs)?;
    let c = sol[2];
    if c >= 0.0 {
        return None;
    }
    let sigma = (-1.0 / (2.0 * c)).sqrt();
    let mean = -sol[1] / (2.0 * c);
    if !mean.is_finite() || !sigma.is_finite() {
        return None;
    }
    Some((mean, sigma))
}

pub(crate) fn fit_pedestal(h: &Hist1D, cfg: &PedestalCfg) -> FitOut {
    let mut out = FitOut::default();
    if h.entries() < cfg.min_entries {
        return out;
    }

    let mu0 = h.modal_center();
    let mut rms = h.rms();
    if !(rms > 0.0) {
        rms = 10.0;
    }
    let sig0 = rms.clamp(cfg.sigma_min, cfg.sigma_max);

    let x1 = (mu0 - cfg.nsigma_win1 * sig0).max(h.xmin);
    let x2 = (mu0 + cfg.nsigma_win1 * sig0).min(h.xmax);
    if x2 <= x1 {
        return out;
    }

    let (mu1, sg1) = match gauss_fit_window(h, x1, x2) {
        Some((m, s)) => (m, s.abs().clamp(cfg.sigma_min, cfg.sigma_max)),
        None => (mu0, sig0),
    };

    let y1 = (mu1 - cfg.nsigma_win2 * sg1).max(h.xmin);
    let y2 = (mu1 + cfg.nsigma_win2 * sg1).min(h.xmax);
    if y2 <= y1 {
        return out;
    }

    match gauss_fit_window(h, y1, y2) {
        Some((mean, sigma)) => {
            out.mean = mean;
            out.sigma = sigma.abs().clamp(cfg.sigma_min, cfg.sigma_max);
            out.status = 0;
            out.ok = true;
        }
        None => {
            out.mean = mu1;
            out.sigma = sg1;
            out.status = 1;
            out.ok = false;
        }
    }
    out
}

//─────────────────────────────
//  The pipeline stage
//─────────────────────────────

/// The pedestal-collector pipeline stage.
pub struct PedestalAlg {
    name: String,
    cfg: PedestalCfg,
    hg_hist: HashMap<i32, Hist1D>,
    lg_hist: HashMap<i32, Hist1D>,
    written: bool,
}

impl PedestalAlg {
    /// Build the stage from its `cfg` node.
    pub fn from_config(cfg: &serde_yaml::Value, name: &str) -> Result<Self> {
        let cfg: PedestalCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid PedestalAlg cfg")?;
        Ok(Self {
            name: name.to_owned(),
            cfg,
            hg_hist: HashMap::new(),
            lg_hist: HashMap::new(),
            written: false,
        })
    }

    fn fill(&mut self, hit: &RawHit) {
        if self.cfg.use_hittag && hit.hittag != self.cfg.select_hittag {
            return;
        }
        let cfg = &self.cfg;
        let hg = self
            .hg_hist
            .entry(hit.cell_id)
            .or_insert_with(|| Hist1D::new(cfg.nbin, cfg.xmin, cfg.xmax));
        hg.fill(f64::from(hit.hg_adc));
        let lg = self
            .lg_hist
            .entry(hit.cell_id)
            .or_insert_with(|| Hist1D::new(cfg.nbin, cfg.xmin, cfg.xmax));
        lg.fill(f64::from(hit.lg_adc));
    }

    fn write(&mut self) -> Result<()> {
        if !self.cfg.pedestal_to_file || self.written {
            return Ok(());
        }
        self.written = true;

        let mut keys: Vec<i32> = self
            .hg_hist
            .keys()
            .chain(self.lg_hist.keys())
            .copied()
            .collect();
        keys.sort_unstable();
        keys.dedup();

        // Per-layer maps on the fixed tile grid, per gain stage.
        const NBIN_XY: usize = geometry::MAP_NBIN_XY;
        type Grid = Vec<[[f64; NBIN_XY]; NBIN_XY]>;
        let empty_grid = || vec![[[0.0; NBIN_XY]; NBIN_XY]; geometry::LAYER_NO];
        let mut grids: HashMap<(&str, &str), Grid> = HashMap::new();
        for gain in ["HG", "LG"] {
            for what in ["mean", "sigma", "entries"] {
                grids.insert((gain, what), empty_grid());
            }
        }
        let grid_bin = |v: f64| -> Option<usize> {
            let rel = (v + geometry::X_MAX) / (2.0 * geometry::X_MAX);
            let bin = (rel * NBIN_XY as f64).floor();
            if (0.0..NBIN_XY as f64).contains(&bin) {
                Some(bin as usize)
            } else {
                None
            }
        };

        let mut cellid_col = Vec::new();
        let mut hg_peak = Vec::new();
        let mut lg_peak = Vec::new();
        let mut hg_sigma = Vec::new();
        let mut lg_sigma = Vec::new();
        let mut entries_hg = Vec::new();
        let mut entries_lg = Vec::new();
        let mut status_hg = Vec::new();
        let mut status_lg = Vec::new();
        let mut ok_hg = Vec::new();
        let mut ok_lg = Vec::new();
        let mut x_col = Vec::new();
        let mut y_col = Vec::new();

        let mut n_ok_hg = 0u32;
        let mut n_all_hg = 0u32;
        let mut n_ok_lg = 0u32;
        let mut n_all_lg = 0u32;

        for cellid in keys {
            let layer = cellid / 100_000;
            let chip = (cellid / 10_000) % 10;
            let channel = cellid % 10_000;
            let x = geometry::pos_x(channel as usize, chip as usize);
            let y = geometry::pos_y(channel as usize, chip as usize);

            let mut fit_gain = |hist: Option<&Hist1D>,
                               gain: &'static str,
                               n_all: &mut u32,
                               n_ok: &mut u32|
             -> (FitOut, u64) {
                let Some(h) = hist else {
                    return (FitOut::default(), 0);
                };
                *n_all += 1;
                let fit = fit_pedestal(h, &self.cfg);
                if fit.ok {
                    *n_ok += 1;
                }
                if h.entries() > 0 && (0..geometry::LAYER_NO as i32).contains(&layer) {
                    if let (Some(bx), Some(by)) = (grid_bin(x), grid_bin(y)) {
                        let l = layer as usize;
                        if let Some(g) = grids.get_mut(&(gain, "mean")) {
                            g[l][bx][by] = fit.mean;
                        }
                        if let Some(g) = grids.get_mut(&(gain, "sigma")) {
                            g[l][bx][by] = fit.sigma;
                        }
                        if let Some(g) = grids.get_mut(&(gain, "entries")) {
                            g[l][bx][by] = h.entries() as f64;
                        }
                    }
                }
                (fit, h.entries())
            };

            let (fit_hg, n_hg) = fit_gain(self.hg_hist.get(&cellid), "HG", &mut n_all_hg, &mut n_ok_hg);
            let (fit_lg, n_lg) = fit_gain(self.lg_hist.get(&cellid), "LG", &mut n_all_lg, &mut n_ok_lg);

            cellid_col.push(cellid);
            hg_peak.push(fit_hg.mean);
            lg_peak.push(fit_lg.mean);
            hg_sigma.push(fit_hg.sigma);
            lg_sigma.push(fit_lg.sigma);
            entries_hg.push(n_hg as i32);
            entries_lg.push(n_lg as i32);
            status_hg.push(fit_hg.status);
            status_lg.push(fit_lg.status);
            ok_hg.push(i32::from(fit_hg.ok));
            ok_lg.push(i32::from(fit_lg.ok));
            x_col.push(x);
            y_col.push(y);
        }

        let mut pedestal = Table::new("pedestal");
        pedestal.push_column::<i32>("cellid", &cellid_col)?;
        pedestal.push_column::<f64>("highgain_peak", &hg_peak)?;
        pedestal.push_column::<f64>("lowgain_peak", &lg_peak)?;
        pedestal.push_column::<f64>("highgain_sigma", &hg_sigma)?;
        pedestal.push_column::<f64>("lowgain_sigma", &lg_sigma)?;
        pedestal.push_column::<i32>("entries_hg", &entries_hg)?;
        pedestal.push_column::<i32>("entries_lg", &entries_lg)?;
        pedestal.push_column::<i32>("fitStatus_hg", &status_hg)?;
        pedestal.push_column::<i32>("fitStatus_lg", &status_lg)?;
        pedestal.push_column::<i32>("fitOk_hg", &ok_hg)?;
        pedestal.push_column::<i32>("fitOk_lg", &ok_lg)?;
        pedestal.push_column::<f64>("x_mm", &x_col)?;
        pedestal.push_column::<f64>("y_mm", &y_col)?;

        // Flatten the populated grid cells into the companion table.
        let mut map_layer = Vec::new();
        let mut map_gain = Vec::new();
        let mut map_ix = Vec::new();
        let mut map_iy = Vec::new();
        let mut map_x = Vec::new();
        let mut map_y = Vec::new();
        let mut map_mean = Vec::new();
        let mut map_sigma = Vec::new();
        let mut map_entries = Vec::new();
        for gain in ["HG", "LG"] {
            let entries = &grids[&(gain, "entries")];
            let means = &grids[&(gain, "mean")];
            let sigmas = &grids[&(gain, "sigma")];
            for layer in 0..geometry::LAYER_NO {
                for ix in 0..NBIN_XY {
                    for iy in 0..NBIN_XY {
                        if entries[layer][ix][iy] <= 0.0 {
                            continue;
                        }
                        map_layer.push(layer as i32);
                        map_gain.push(gain.to_owned());
                        map_ix.push(ix as i32);
                        map_iy.push(iy as i32);
                        let cell = 2.0 * geometry::X_MAX / NBIN_XY as f64;
                        map_x.push(-geometry::X_MAX + (ix as f64 + 0.5) * cell);
                        map_y.push(-geometry::X_MAX + (iy as f64 + 0.5) * cell);
                        map_mean.push(means[layer][ix][iy]);
                        map_sigma.push(sigmas[layer][ix][iy]);
                        map_entries.push(entries[layer][ix][iy] as i32);
                    }
                }
            }
        }
        let mut maps = Table::new("ped_map2d");
        maps.push_column::<i32>("layer", &map_layer)?;
        maps.push_column::<String>("gain", &map_gain)?;
        maps.push_column::<i32>("ix", &map_ix)?;
        maps.push_column::<i32>("iy", &map_iy)?;
        maps.push_column::<f64>("x", &map_x)?;
        maps.push_column::<f64>("y", &map_y)?;
        maps.push_column::<f64>("mean", &map_mean)?;
        maps.push_column::<f64>("sigma", &map_sigma)?;
        maps.push_column::<i32>("entries", &map_entries)?;

        write_tables(&self.cfg.out_pedestal_filename, vec![pedestal, maps])?;
        info!(
            file = %self.cfg.out_pedestal_filename,
            hg_ok = n_ok_hg,
            hg_all = n_all_hg,
            lg_ok = n_ok_lg,
            lg_all = n_all_lg,
            "wrote pedestal table"
        );
        Ok(())
    }
}

impl Algorithm for PedestalAlg {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, store: &mut EventStore) -> Result<()> {
        let raw_hits = store.get::<Vec<RawHit>>(&self.cfg.in_rawhit_key)?.clone();
        for hit in &raw_hits {
            self.fill(hit);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.write()
    }
}

impl Drop for PedestalAlg {
    fn drop(&mut self) {
        if let Err(e) = self.write() {
            error!(error = %e, "pedestal write failed on drop");
        }
    }
}

pub(crate) fn create(
    _ctx: &RunContext,
    cfg: &serde_yaml::Value,
    name: &str,
) -> Result<Box<dyn Algorithm>> {
    Ok(Box::new(PedestalAlg::from_config(cfg, name)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::{CalibMaps, TableCfg};
    use ahcal_types::edm::pack_cell_id;

    // Fill a textbook Gaussian spectrum: count(k) ~ A exp(-k^2/2s^2).
    fn fill_gaussian(h: &mut Hist1D, mu: f64, sigma: f64, amplitude: f64) {
        let span = (4.0 * sigma) as i32;
        for k in -span..=span {
            let v = mu + f64::from(k);
            let n = (amplitude * (-f64::from(k * k) / (2.0 * sigma * sigma)).exp()).round();
            for _ in 0..n as i64 {
                h.fill(v);
            }
        }
    }

    #[test]
    fn the_two_pass_fit_recovers_the_peak() {
        let cfg = PedestalCfg::default();
        let mut h = Hist1D::new(cfg.nbin, cfg.xmin, cfg.xmax);
        fill_gaussian(&mut h, 390.0, 12.0, 60.0);
        assert!(h.entries() >= cfg.min_entries);

        let fit = fit_pedestal(&h, &cfg);
        assert!(fit.ok);
        assert_eq!(fit.status, 0);
        assert!((fit.mean - 390.0).abs() < 2.0, "mean = {}", fit.mean);
        assert!((fit.sigma - 12.0).abs() < 3.0, "sigma = {}", fit.sigma);
    }

    #[test]
    fn sparse_spectra_are_not_fitted() {
        let cfg = PedestalCfg::default();
        let mut h = Hist1D::new(cfg.nbin, cfg.xmin, cfg.xmax);
        for _ in 0..10 {
            h.fill(400.0);
        }
        let fit = fit_pedestal(&h, &cfg);
        assert!(!fit.ok);
        assert_eq!(fit.mean, -1.0);
        assert_eq!(fit.status, 999);
    }

    #[test]
    fn fitted_sigmas_are_clamped() {
        let cfg = PedestalCfg {
            min_entries: 10,
            ..PedestalCfg::default()
        };
        // A two-valued spectrum produces a degenerate first pass; the
        // clamps keep the reported sigma in range either way.
        let mut h = Hist1D::new(cfg.nbin, cfg.xmin, cfg.xmax);
        fill_gaussian(&mut h, 800.0, 1.0, 50.0);
        let fit = fit_pedestal(&h, &cfg);
        if fit.mean > 0.0 {
            assert!(fit.sigma >= cfg.sigma_min && fit.sigma <= cfg.sigma_max);
        }
    }

    #[test]
    fn collected_pedestals_feed_the_calibration_loader() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pedestal.root");

        let cellid = pack_cell_id(3, 2, 1);
        let cfg = serde_yaml::from_str(&format!(
            "{{out_pedestal_filename: {}, min_entries: 100}}",
            out.display()
        ))
        .unwrap();
        let mut alg = PedestalAlg::from_config(&cfg, "PedestalAlg").unwrap();

        // Run events through the stage; HG around 390, LG around 384.
        let mut store = EventStore::new();
        for k in -30i32..=30 {
            let weight = (20.0 * (-f64::from(k * k) / (2.0 * 144.0)).exp()).round() as i32;
            let mut hits = Vec::new();
            for _ in 0..weight {
                hits.push(RawHit {
                    cell_id: cellid,
                    hg_adc: 390 + k,
                    lg_adc: 384 + k,
                    hittag: 0,
                    bcid: 0,
                    index: 0,
                });
            }
            store.put("RawHits", hits);
            alg.execute(&mut store).unwrap();
            store.clear();
        }
        alg.finalize().unwrap();
        // The write is idempotent.
        alg.finalize().unwrap();

        let mut maps = CalibMaps::new();
        maps.load_pedestal(&TableCfg {
            file: out.display().to_string(),
            cut: String::new(),
            cellid_version: 1,
        })
        .unwrap();
        assert!((maps.hg_ped(cellid) - 390.0).abs() < 3.0);
        assert!((maps.lg_ped(cellid) - 384.0).abs() < 3.0);
    }

    #[test]
    fn tagged_hits_are_selected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pedestal.root");
        let cfg = serde_yaml::from_str(&format!(
            "{{out_pedestal_filename: {}, select_hittag: 0}}",
            out.display()
        ))
        .unwrap();
        let mut alg = PedestalAlg::from_config(&cfg, "PedestalAlg").unwrap();

        let cellid = pack_cell_id(0, 0, 0);
        let mut store = EventStore::new();
        store.put(
            "RawHits",
            vec![
                RawHit { cell_id: cellid, hg_adc: 390, lg_adc: 384, hittag: 0, bcid: 0, index: 0 },
                RawHit { cell_id: cellid, hg_adc: 900, lg_adc: 700, hittag: 1, bcid: 0, index: 1 },
            ],
        );
        alg.execute(&mut store).unwrap();
        assert_eq!(alg.hg_hist[&cellid].entries(), 1);
    }
}
