//! The column-writer pipeline stage.
//!
//! Walks every key of the event store, flattens the payloads whose types
//! appear in its `outputlist` into columns, and advances the dataset by
//! one row per event. Payloads without a registered writer are skipped.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::registry::register_algorithm;
use ahcal_core::{Algorithm, EventStore, RunContext};

use crate::column_input::EVENTS_TREE;
use crate::error::IoError;
use crate::registry::{self, WriterRegistry};
use crate::writer::TableWriter;

/// YAML type name of the column-writer stage.
pub const WRITER_ALG_TYPE: &str = "RootWriterAlg";

#[derive(Debug, Deserialize)]
struct WriterAlgCfg {
    outputlist: Vec<String>,
}

/// Pipeline stage that persists registered payloads column-wise.
pub struct ColumnWriterAlg {
    name: String,
    out: TableWriter,
    writers: WriterRegistry,
}

impl ColumnWriterAlg {
    /// Build the stage from its `cfg` node (`outputlist`), writing to the
    /// run's output file.
    pub fn from_config(ctx: &RunContext, cfg: &serde_yaml::Value, name: &str) -> Result<Self> {
        let cfg: WriterAlgCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid RootWriterAlg cfg")?;
        let mut writers = WriterRegistry::new();
        for type_name in &cfg.outputlist {
            registry::add_writer_for(type_name, &mut writers)
                .with_context(|| format!("outputlist entry '{type_name}'"))?;
        }
        let out = TableWriter::create(&ctx.config.output, EVENTS_TREE)?;
        Ok(Self {
            name: name.to_owned(),
            out,
            writers,
        })
    }
}

impl Algorithm for ColumnWriterAlg {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, store: &mut EventStore) -> Result<()> {
        for key in store.keys() {
            let view = store.any(&key)?;
            if !self.writers.can_write(view.type_id) {
                debug!(key = %key, r#type = view.type_name, "skip unregistered payload");
                continue;
            }
            self.writers
                .write_any(&key, view.type_id, view.payload, &mut self.out)?;
        }
        self.out.fill();
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.out.finish()?;
        Ok(())
    }
}

fn create(
    ctx: &RunContext,
    cfg: &serde_yaml::Value,
    name: &str,
) -> Result<Box<dyn Algorithm>> {
    Ok(Box::new(ColumnWriterAlg::from_config(ctx, cfg, name)?))
}

/// Register the column-writer stage in the algorithm registry.
pub fn register_writer_alg() -> Result<(), IoError> {
    register_algorithm(WRITER_ALG_TYPE, create)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahcal_types::{RecoHit, SimpleFittedTrack};

    use crate::column_input::RootInput;
    use crate::source::EventSource;

    fn test_ctx(output: &std::path::Path) -> RunContext {
        let run: ahcal_core::RunConfig = serde_yaml::from_str(&format!(
            "{{input: in.root, output: {}, log_file: '', log_level: info}}",
            output.display()
        ))
        .unwrap();
        RunContext::new(run)
    }

    #[test]
    fn write_then_read_back_field_by_field() {
        crate::register_builtin().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("events.root");
        let ctx = test_ctx(&out_path);
        let cfg = serde_yaml::from_str(
            "outputlist:\n  - AHCALRecoHit\n  - SimpleFittedTrack\n",
        )
        .unwrap();
        let mut alg = ColumnWriterAlg::from_config(&ctx, &cfg, WRITER_ALG_TYPE).unwrap();

        let hits = vec![
            RecoHit { cell_id: 100_000, edep: 0.25, nmip: 0.55, index: 0 },
            RecoHit { cell_id: 100_001, edep: 0.75, nmip: 1.65, index: 1 },
            RecoHit { cell_id: 100_002, edep: 1.25, nmip: 2.75, index: 2 },
        ];
        let track = SimpleFittedTrack {
            init_pos_x: 1.0,
            init_pos_y: 2.0,
            direction_x: 0.01,
            direction_y: -0.01,
            chi2_x: 0.5,
            chi2_y: 0.6,
            ndf: 1,
            in_track_hit_indices: vec![0, 2],
            out_track_hit_indices: vec![1],
            n_total_hits: 3,
            valid: true,
            ..SimpleFittedTrack::default()
        };

        let mut store = EventStore::new();
        store.put("RecoHits", hits.clone());
        store.put("Fitted", track.clone());
        // An unregistered payload type is skipped, not an error.
        store.put("Scratch", 42i32);
        alg.execute(&mut store).unwrap();
        alg.finalize().unwrap();

        let cfg = serde_yaml::from_str(
            "inputlist:\n  - [AHCALRecoHit, RecoHits]\n  - [SimpleFittedTrack, Fitted]\n",
        )
        .unwrap();
        let mut input = RootInput::new(&out_path, &cfg).unwrap();
        let mut store = EventStore::new();
        assert!(input.next_event(&mut store).unwrap());

        let back: &Vec<RecoHit> = store.get("RecoHits").unwrap();
        assert_eq!(back.len(), 3);
        for (a, b) in back.iter().zip(&hits) {
            assert_eq!(a.cell_id, b.cell_id);
            assert_eq!(a.edep, b.edep);
            assert_eq!(a.nmip, b.nmip);
        }
        let t: &SimpleFittedTrack = store.get("Fitted").unwrap();
        assert_eq!(t.in_track_hit_indices, track.in_track_hit_indices);
        assert_eq!(t.chi2_y, track.chi2_y);
        assert!(t.valid);
    }

    #[test]
    fn unknown_outputlist_types_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(&dir.path().join("out.root"));
        let cfg = serde_yaml::from_str("outputlist:\n  - NoSuchType\n").unwrap();
        assert!(ColumnWriterAlg::from_config(&ctx, &cfg, WRITER_ALG_TYPE).is_err());
    }
}
