//! Generic column reader driven by an `inputlist`.
//!
//! Each `inputlist` entry is a `[type-name, key]` pair; the type name is
//! resolved through the process-wide type registry, the key selects the
//! column prefix and the event-store slot. Any registered record type can
//! be read back without this reader knowing about it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::EventStore;

use crate::reader::TableReader;
use crate::registry::{self, ReaderRegistry};
use crate::source::EventSource;

/// Dataset name of pipeline-written event files.
pub const EVENTS_TREE: &str = "events";

#[derive(Debug, Deserialize)]
struct ColumnInputCfg {
    inputlist: Vec<(String, String)>,
}

/// Event source over a pipeline-written `events` dataset.
pub struct RootInput {
    table: TableReader,
    readers: ReaderRegistry,
    inputs: Vec<(String, String)>,
}

impl RootInput {
    /// Open `path` with the reader `cfg` node (`inputlist`).
    pub fn new(path: impl AsRef<Path>, cfg: &serde_yaml::Value) -> Result<Self> {
        let cfg: ColumnInputCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid RootInput cfg")?;
        let mut readers = ReaderRegistry::new();
        for (type_name, key) in &cfg.inputlist {
            registry::add_reader_for(type_name, &mut readers)
                .with_context(|| format!("inputlist entry [{type_name}, {key}]"))?;
        }
        let table = TableReader::open(path.as_ref(), EVENTS_TREE)
            .with_context(|| format!("cannot open column input {}", path.as_ref().display()))?;
        debug!(entries = table.entries(), "opened column input");
        Ok(Self {
            table,
            readers,
            inputs: cfg.inputlist,
        })
    }
}

impl EventSource for RootInput {
    fn next_event(&mut self, store: &mut EventStore) -> Result<bool> {
        if !self.table.next() {
            return Ok(false);
        }
        for (type_name, key) in &self.inputs {
            registry::read_and_put(type_name, store, &self.readers, &mut self.table, key)
                .with_context(|| format!("reading '{key}' as {type_name}"))?;
        }
        Ok(true)
    }

    fn entries(&self) -> Option<i64> {
        Some(self.table.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahcal_types::{RecoHit, Track};

    use crate::registry::WriterRegistry;
    use crate::writer::TableWriter;
    use std::any::TypeId;

    #[test]
    fn registered_types_come_back_through_the_inputlist() {
        crate::register_builtin().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.root");

        let hits = vec![
            RecoHit { cell_id: 100_000, edep: 0.4, nmip: 0.9, index: 0 },
            RecoHit { cell_id: 110_001, edep: 0.6, nmip: 1.3, index: 1 },
        ];
        let mut track = Track::default();
        track.valid = true;
        track.chi2 = 4.5;
        track.in_track_hit_indices = vec![0, 1];

        let mut writers = WriterRegistry::new();
        writers.register_record_vec::<RecoHit>();
        writers.register_record::<Track>();
        let mut out = TableWriter::create(&path, EVENTS_TREE).unwrap();
        writers
            .write_any("RecoHits", TypeId::of::<Vec<RecoHit>>(), &hits, &mut out)
            .unwrap();
        writers
            .write_any("MuonTrack", TypeId::of::<Track>(), &track, &mut out)
            .unwrap();
        out.fill();
        out.finish().unwrap();

        let cfg = serde_yaml::from_str(
            "inputlist:\n  - [AHCALRecoHit, RecoHits]\n  - [Track, MuonTrack]\n",
        )
        .unwrap();
        let mut input = RootInput::new(&path, &cfg).unwrap();
        let mut store = EventStore::new();
        assert!(input.next_event(&mut store).unwrap());

        let back_hits: &Vec<RecoHit> = store.get("RecoHits").unwrap();
        assert_eq!(back_hits.len(), 2);
        assert_eq!(back_hits[1].cell_id, 110_001);
        let back_track: &Track = store.get("MuonTrack").unwrap();
        assert!(back_track.valid);
        assert_eq!(back_track.in_track_hit_indices, vec![0, 1]);

        store.clear();
        assert!(!input.next_event(&mut store).unwrap());
    }

    #[test]
    fn unknown_inputlist_types_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.root");
        let mut out = TableWriter::create(&path, EVENTS_TREE).unwrap();
        out.fill();
        out.finish().unwrap();

        let cfg = serde_yaml::from_str("inputlist:\n  - [NoSuchType, X]\n").unwrap();
        assert!(RootInput::new(&path, &cfg).is_err());
    }
}
