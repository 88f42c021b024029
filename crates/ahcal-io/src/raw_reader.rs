//! Reader of DAQ-converted raw-hit files (tabular dataset `Raw_Hit`).
//!
//! Each entry holds the flat per-event columns the DAQ conversion
//! produces: parallel hit vectors plus the scalar TLU block. Hits receive
//! their in-event `index` from vector position.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::EventStore;
use ahcal_types::{RawHit, TluRawData};

use crate::reader::TableReader;
use crate::source::EventSource;

/// Dataset name of DAQ-converted raw-hit files.
pub const RAW_HIT_TREE: &str = "Raw_Hit";

#[derive(Debug, Deserialize)]
struct RawReaderCfg {
    out_rawhits_key: String,
    out_tlu_key: String,
}

/// Event source over a `Raw_Hit` dataset.
pub struct RootRawHitReader {
    table: TableReader,
    hits_key: String,
    tlu_key: String,
}

impl RootRawHitReader {
    /// Open `path` with the reader `cfg` node (`out_rawhits_key`,
    /// `out_tlu_key`).
    pub fn new(path: impl AsRef<Path>, cfg: &serde_yaml::Value) -> Result<Self> {
        let cfg: RawReaderCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid RootRawHitReader cfg")?;
        let table = TableReader::open(path.as_ref(), RAW_HIT_TREE)
            .with_context(|| format!("cannot open raw-hit input {}", path.as_ref().display()))?;
        debug!(entries = table.entries(), "opened raw-hit input");
        Ok(Self {
            table,
            hits_key: cfg.out_rawhits_key,
            tlu_key: cfg.out_tlu_key,
        })
    }
}

impl EventSource for RootRawHitReader {
    fn next_event(&mut self, store: &mut EventStore) -> Result<bool> {
        if !self.table.next() {
            return Ok(false);
        }

        let cell_ids = self.table.value::<Vec<i32>>("cellID")?.clone();
        let hg = self.table.value::<Vec<u16>>("hg")?.clone();
        let lg = self.table.value::<Vec<u16>>("lg")?.clone();
        let bcid = self.table.value::<Vec<u16>>("bcid")?.clone();
        let hittag = self.table.value::<Vec<u16>>("hitTag")?.clone();
        ensure!(
            cell_ids.len() == hg.len()
                && cell_ids.len() == lg.len()
                && cell_ids.len() == bcid.len()
                && cell_ids.len() == hittag.len(),
            "hit columns disagree on length at entry {}",
            self.table.current_entry()
        );

        let mut hits = Vec::with_capacity(cell_ids.len());
        for (i, cell_id) in cell_ids.iter().enumerate() {
            hits.push(RawHit {
                cell_id: *cell_id,
                hg_adc: i32::from(hg[i]),
                lg_adc: i32::from(lg[i]),
                hittag: i32::from(hittag[i]),
                bcid: i32::from(bcid[i]),
                index: i as i32,
            });
        }

        let tlu = TluRawData {
            timestamp: *self.table.value::<i32>("timestamp")?,
            bcid_tlu: *self.table.value::<i32>("bc_id_tlu")?,
            inputs: self.table.value::<Vec<i32>>("inputs")?.clone(),
            fine_timestamps: self.table.value::<Vec<i32>>("fine_timestamps")?.clone(),
            run_no: *self.table.value::<i32>("runNo")?,
            cycle_id: *self.table.value::<i32>("cycleID")?,
            trigger_id: *self.table.value::<i32>("triggerID")?,
            event_time: *self.table.value::<i32>("Event_Time")?,
        };

        store.put(self.hits_key.clone(), hits);
        store.put(self.tlu_key.clone(), tlu);
        Ok(true)
    }

    fn entries(&self) -> Option<i64> {
        Some(self.table.entries())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::file::{write_tables, Table};

    /// Write a minimal two-event `Raw_Hit` file for reader tests.
    pub(crate) fn write_raw_hit_file(path: &Path) {
        let mut t = Table::new(RAW_HIT_TREE);
        t.push_column::<Vec<i32>>("cellID", &[vec![100_000, 200_011], vec![300_022]])
            .unwrap();
        t.push_column::<Vec<u16>>("hg", &[vec![900, 901], vec![902]])
            .unwrap();
        t.push_column::<Vec<u16>>("lg", &[vec![400, 401], vec![402]])
            .unwrap();
        t.push_column::<Vec<u16>>("bcid", &[vec![1, 2], vec![3]])
            .unwrap();
        t.push_column::<Vec<u16>>("hitTag", &[vec![0, 0], vec![0]])
            .unwrap();
        t.push_column::<i32>("timestamp", &[10, 11]).unwrap();
        t.push_column::<i32>("bc_id_tlu", &[5, 6]).unwrap();
        t.push_column::<Vec<i32>>("inputs", &[vec![0; 6], vec![1; 6]])
            .unwrap();
        t.push_column::<Vec<i32>>("fine_timestamps", &[vec![0; 6], vec![0; 6]])
            .unwrap();
        t.push_column::<i32>("runNo", &[42, 42]).unwrap();
        t.push_column::<i32>("cycleID", &[1, 1]).unwrap();
        t.push_column::<i32>("triggerID", &[7, 8]).unwrap();
        t.push_column::<i32>("Event_Time", &[1000, 1001]).unwrap();
        write_tables(path, vec![t]).unwrap();
    }

    pub(crate) fn reader_cfg() -> serde_yaml::Value {
        serde_yaml::from_str("{out_rawhits_key: RawHits, out_tlu_key: TLU}").unwrap()
    }
}
