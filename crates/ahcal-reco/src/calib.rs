//! Calibration-constant tables.
//!
//! MIP, pedestal and DAC constants are loaded from column files with an
//! optional row predicate (`cut`). After loading, every in-bounds
//! `(layer, chip, channel)` triple holds an entry: missing channels fall
//! back to the reference constants, and MIP values at or below 100 ADC
//! counts are treated as unusable and replaced as well. Tables are
//! read-only after initialization.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, info, warn};

use ahcal_io::cut::Predicate;
use ahcal_io::{IoError, TableReader};
use ahcal_types::edm::pack_cell_id;
use ahcal_types::{geometry, reference};

/// Location and filtering of one calibration table.
#[derive(Debug, Clone, Deserialize)]
pub struct TableCfg {
    /// Path of the column file.
    pub file: String,
    /// Optional row predicate, passed to the table layer.
    #[serde(default)]
    pub cut: String,
    /// cellID convention of the file: 0 remaps physical to logical
    /// layers, 1 is identity.
    #[serde(default = "default_cellid_version")]
    pub cellid_version: i32,
}

fn default_cellid_version() -> i32 {
    1
}

/// Calibration-table load failures. All of them are recoverable: the
/// caller decides whether to continue without the table.
#[derive(Debug, thiserror::Error)]
pub enum CalibError {
    /// The file or table could not be read.
    #[error(transparent)]
    Io(#[from] IoError),
    /// The predicate filtered out every row.
    #[error("no entries left after applying cut '{0}'")]
    EmptyAfterCut(String),
}

/// Convert a file cellID into the in-memory convention.
pub fn cellid_conversion(cellid_version: i32, input_cellid: i32) -> i32 {
    match cellid_version {
        1 => input_cellid,
        0 => {
            let layer = input_cellid / 100_000;
            let new_layer = geometry::pos_to_layer_id(layer);
            new_layer * 100_000 + input_cellid % 100_000
        }
        other => {
            warn!(cellid_version = other, "unknown cellid_version, keeping cellID as is");
            input_cellid
        }
    }
}

/// Per-channel calibration constants.
#[derive(Debug, Clone, Default)]
pub struct CalibMaps {
    mip: HashMap<i32, f64>,
    hg_ped: HashMap<i32, f64>,
    lg_ped: HashMap<i32, f64>,
    gain_ratio: HashMap<i32, f64>,
    gain_plat: HashMap<i32, i32>,
}

struct LoadedRows {
    reader: TableReader,
    predicate: Predicate,
    kept: usize,
}

impl LoadedRows {
    fn open(cfg: &TableCfg, table: &str) -> Result<Self, CalibError> {
        let reader = TableReader::open(&cfg.file, table)?;
        let predicate = Predicate::parse(&cfg.cut)?;
        Ok(Self {
            reader,
            predicate,
            kept: 0,
        })
    }

    fn next_row(&mut self) -> Result<bool, CalibError> {
        while self.reader.next() {
            if self.predicate.eval(&mut self.reader)? {
                self.kept += 1;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish(self, cfg: &TableCfg) -> Result<usize, CalibError> {
        if !self.predicate.is_empty() {
            if self.kept == 0 {
                return Err(CalibError::EmptyAfterCut(cfg.cut.clone()));
            }
            info!(cut = %cfg.cut, "applied cut string");
        }
        Ok(self.kept)
    }
}

impl CalibMaps {
    /// Create empty maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the `mip` table (`cellid`, `MPV`). Returns the number of rows
    /// kept.
    pub fn load_mip(&mut self, cfg: &TableCfg) -> Result<usize, CalibError> {
        let mut rows = LoadedRows::open(cfg, "mip")?;
        while rows.next_row()? {
            let cellid = *rows.reader.value::<i32>("cellid")?;
            let mpv = *rows.reader.value::<f64>("MPV")?;
            self.mip.insert(cellid_conversion(cfg.cellid_version, cellid), mpv);
        }
        let kept = rows.finish(cfg)?;
        info!(entries = kept, file = %cfg.file, "loaded MIP table");
        Ok(kept)
    }

    /// Load the `pedestal` table (`cellid`, `highgain_peak`,
    /// `lowgain_peak`). Returns the number of rows kept.
    pub fn load_pedestal(&mut self, cfg: &TableCfg) -> Result<usize, CalibError> {
        let mut rows = LoadedRows::open(cfg, "pedestal")?;
        while rows.next_row()? {
            let cellid = *rows.reader.value::<i32>("cellid")?;
            let hg = *rows.reader.value::<f64>("highgain_peak")?;
            let lg = *rows.reader.value::<f64>("lowgain_peak")?;
            let cellid = cellid_conversion(cfg.cellid_version, cellid);
            self.hg_ped.insert(cellid, hg);
            self.lg_ped.insert(cellid, lg);
        }
        let kept = rows.finish(cfg)?;
        info!(entries = kept, file = %cfg.file, "loaded pedestal table");
        Ok(kept)
    }

    /// Load the `dac` table (`cellid`, `slope`, `plat`). Returns the
    /// number of rows kept.
    pub fn load_dac(&mut self, cfg: &TableCfg) -> Result<usize, CalibError> {
        let mut rows = LoadedRows::open(cfg, "dac")?;
        while rows.next_row()? {
            let cellid = *rows.reader.value::<i32>("cellid")?;
            let slope = *rows.reader.value::<f32>("slope")?;
            let plat = *rows.reader.value::<f32>("plat")?;
            let cellid = cellid_conversion(cfg.cellid_version, cellid);
            self.gain_ratio.insert(cellid, f64::from(slope));
            self.gain_plat.insert(cellid, plat as i32);
        }
        let kept = rows.finish(cfg)?;
        info!(entries = kept, file = %cfg.file, "loaded DAC table");
        Ok(kept)
    }

    /// Fill every in-bounds channel that has no entry with the reference
    /// constants, and replace unusable MIP values.
    pub fn fill_missing_with_references(&mut self) {
        let mut fallbacks = 0usize;
        for layer in 0..geometry::LAYER_NO as i32 {
            for chip in 0..geometry::CHIP_NO as i32 {
                for channel in 0..geometry::CHANNEL_NO as i32 {
                    let cellid = pack_cell_id(layer, chip, channel);
                    match self.mip.get(&cellid) {
                        None => {
                            self.mip.insert(cellid, reference::REF_MIP);
                            fallbacks += 1;
                        }
                        Some(&mpv) if mpv <= 100.0 => {
                            debug!(cellid, mpv, "low MIP value, using reference");
                            self.mip.insert(cellid, reference::REF_MIP);
                        }
                        Some(_) => {}
                    }
                    self.hg_ped.entry(cellid).or_insert(reference::REF_PED_HIGHGAIN);
                    self.lg_ped.entry(cellid).or_insert(reference::REF_PED_LOWGAIN);
                    self.gain_ratio.entry(cellid).or_insert(reference::REF_GAIN_RATIO);
                    self.gain_plat.entry(cellid).or_insert(reference::LOWGAIN_PLAT);
                }
            }
        }
        info!(fallbacks, "reference values assigned for missing channels");
    }

    /// MIP most-probable value of a channel, ADC counts.
    pub fn mip(&self, cellid: i32) -> f64 {
        self.mip.get(&cellid).copied().unwrap_or(reference::REF_MIP)
    }

    /// High-gain pedestal of a channel, ADC counts.
    pub fn hg_ped(&self, cellid: i32) -> f64 {
        self.hg_ped
            .get(&cellid)
            .copied()
            .unwrap_or(reference::REF_PED_HIGHGAIN)
    }

    /// Low-gain pedestal of a channel, ADC counts.
    pub fn lg_ped(&self, cellid: i32) -> f64 {
        self.lg_ped
            .get(&cellid)
            .copied()
            .unwrap_or(reference::REF_PED_LOWGAIN)
    }

    /// LG-to-HG gain ratio of a channel.
    pub fn gain_ratio(&self, cellid: i32) -> f64 {
        self.gain_ratio
            .get(&cellid)
            .copied()
            .unwrap_or(reference::REF_GAIN_RATIO)
    }

    /// Low-gain plateau of a channel, ADC counts.
    pub fn gain_plat(&self, cellid: i32) -> i32 {
        self.gain_plat
            .get(&cellid)
            .copied()
            .unwrap_or(reference::LOWGAIN_PLAT)
    }

    /// Install one channel's constants directly. Test support for
    /// algorithm-level checks that need exact values.
    pub fn insert_channel(&mut self, cellid: i32, mip: f64, hg_ped: f64, lg_ped: f64, gain_ratio: f64, gain_plat: i32) {
        self.mip.insert(cellid, mip);
        self.hg_ped.insert(cellid, hg_ped);
        self.lg_ped.insert(cellid, lg_ped);
        self.gain_ratio.insert(cellid, gain_ratio);
        self.gain_plat.insert(cellid, gain_plat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahcal_io::file::{write_tables, Table};
    use std::path::Path;

    fn write_mip_file(path: &Path, cellids: &[i32], mpvs: &[f64]) {
        let mut t = Table::new("mip");
        t.push_column::<i32>("cellid", cellids).unwrap();
        t.push_column::<f64>("MPV", mpvs).unwrap();
        write_tables(path, vec![t]).unwrap();
    }

    #[test]
    fn every_channel_has_an_entry_after_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mip.root");
        write_mip_file(
            &path,
            &[pack_cell_id(1, 2, 3), pack_cell_id(4, 5, 6)],
            &[320.0, 50.0],
        );

        let cfg = TableCfg {
            file: path.display().to_string(),
            cut: String::new(),
            cellid_version: 1,
        };
        let mut maps = CalibMaps::new();
        assert_eq!(maps.load_mip(&cfg).unwrap(), 2);
        maps.fill_missing_with_references();

        for layer in 0..geometry::LAYER_NO as i32 {
            for chip in 0..geometry::CHIP_NO as i32 {
                for channel in 0..geometry::CHANNEL_NO as i32 {
                    let cellid = pack_cell_id(layer, chip, channel);
                    assert!(maps.mip(cellid) > 100.0);
                    assert!(maps.hg_ped(cellid) > 0.0);
                    assert!(maps.lg_ped(cellid) > 0.0);
                    assert!(maps.gain_ratio(cellid) > 0.0);
                    assert!(maps.gain_plat(cellid) > 0);
                }
            }
        }
        // Measured value survives; the unusable one was replaced.
        assert_eq!(maps.mip(pack_cell_id(1, 2, 3)), 320.0);
        assert_eq!(maps.mip(pack_cell_id(4, 5, 6)), reference::REF_MIP);
    }

    #[test]
    fn a_cut_that_removes_everything_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mip.root");
        write_mip_file(&path, &[pack_cell_id(1, 2, 3)], &[320.0]);

        let cfg = TableCfg {
            file: path.display().to_string(),
            cut: "MPV > 1000".to_owned(),
            cellid_version: 1,
        };
        let mut maps = CalibMaps::new();
        let err = maps.load_mip(&cfg).unwrap_err();
        assert!(matches!(err, CalibError::EmptyAfterCut(_)));
    }

    #[test]
    fn version_zero_remaps_the_layer() {
        // Physical position 39 is mounted as logical layer 0.
        let physical = pack_cell_id(39, 2, 7);
        let logical = cellid_conversion(0, physical);
        assert_eq!(logical / 100_000, 0);
        assert_eq!(logical % 100_000, 2 * 10_000 + 7);
        // Version 1 is identity.
        assert_eq!(cellid_conversion(1, physical), physical);
    }

    #[test]
    fn pedestal_and_dac_tables_load_row_wise() {
        let dir = tempfile::tempdir().unwrap();

        let ped_path = dir.path().join("ped.root");
        let mut ped = Table::new("pedestal");
        ped.push_column::<i32>("cellid", &[pack_cell_id(0, 1, 2)]).unwrap();
        ped.push_column::<f64>("highgain_peak", &[388.5]).unwrap();
        ped.push_column::<f64>("lowgain_peak", &[382.25]).unwrap();
        write_tables(&ped_path, vec![ped]).unwrap();

        let dac_path = dir.path().join("dac.root");
        let mut dac = Table::new("dac");
        dac.push_column::<i32>("cellid", &[pack_cell_id(0, 1, 2)]).unwrap();
        dac.push_column::<f32>("slope", &[27.5]).unwrap();
        dac.push_column::<f32>("plat", &[1900.0]).unwrap();
        write_tables(&dac_path, vec![dac]).unwrap();

        let mut maps = CalibMaps::new();
        maps.load_pedestal(&TableCfg {
            file: ped_path.display().to_string(),
            cut: String::new(),
            cellid_version: 1,
        })
        .unwrap();
        maps.load_dac(&TableCfg {
            file: dac_path.display().to_string(),
            cut: String::new(),
            cellid_version: 1,
        })
        .unwrap();

        let cellid = pack_cell_id(0, 1, 2);
        assert_eq!(maps.hg_ped(cellid), 388.5);
        assert_eq!(maps.lg_ped(cellid), 382.25);
        assert!((maps.gain_ratio(cellid) - 27.5).abs() < 1e-6);
        assert_eq!(maps.gain_plat(cellid), 1900);
    }
}
