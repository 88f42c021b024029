//! Reader of framed binary DAQ streams.
//!
//! The stream is a sequence of length-prefixed event frames. Fragment
//! decoding into per-tile hits and the TLU block is a blob-to-struct
//! concern of the [`daq`] helper; this reader only packs the decoded
//! frames into event-store records.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use ahcal_core::EventStore;
use ahcal_types::{edm::pack_cell_id, RawHit, TluRawData};

use crate::source::EventSource;

/// Frame codec for the binary DAQ stream.
pub mod daq {
    use std::io::{ErrorKind, Read, Write};

    use serde::{Deserialize, Serialize};

    use crate::error::IoError;

    /// One decoded tile readout inside a frame.
    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    pub struct DaqHit {
        /// Layer index.
        pub layer: i32,
        /// Chip index.
        pub chip: i32,
        /// Channel index.
        pub channel: i32,
        /// High-gain ADC value.
        pub hg_adc: i32,
        /// Low-gain ADC value.
        pub lg_adc: i32,
        /// DAQ hit tag.
        pub hittag: i32,
        /// Bunch-crossing id.
        pub bcid: i32,
    }

    /// One decoded event frame.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct EventFrame {
        /// Run number.
        pub run_no: i32,
        /// Acquisition cycle id.
        pub cycle_id: i32,
        /// Trigger id.
        pub trigger_id: i32,
        /// Event wall-clock time.
        pub event_time: i32,
        /// Coarse TLU timestamp.
        pub timestamp: i32,
        /// Bunch-crossing id as seen by the TLU.
        pub bcid_tlu: i32,
        /// State of the six digital inputs.
        pub inputs: Vec<i32>,
        /// Fine timestamp per digital input.
        pub fine_timestamps: Vec<i32>,
        /// Decoded tile readouts.
        pub hits: Vec<DaqHit>,
    }

    /// Read one frame. Returns `Ok(None)` at a clean end of stream.
    pub fn read_frame(r: &mut impl Read, entry: i64) -> Result<Option<EventFrame>, IoError> {
        let mut len_bytes = [0u8; 4];
        match r.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(IoError::BadFrame {
                    entry,
                    reason: e.to_string(),
                })
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload).map_err(|e| IoError::BadFrame {
            entry,
            reason: format!("truncated payload: {e}"),
        })?;
        bincode::deserialize(&payload).map_err(|e| IoError::BadFrame {
            entry,
            reason: e.to_string(),
        })
    }

    /// Write one frame with its length prefix.
    pub fn write_frame(w: &mut impl Write, frame: &EventFrame) -> Result<(), IoError> {
        let payload = bincode::serialize(frame).map_err(|e| IoError::BadFrame {
            entry: -1,
            reason: e.to_string(),
        })?;
        let io_err = |e: std::io::Error| IoError::BadFrame {
            entry: -1,
            reason: e.to_string(),
        };
        w.write_all(&(payload.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        w.write_all(&payload).map_err(io_err)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BinaryReaderCfg {
    out_rawhits_key: String,
    out_tlu_key: String,
}

/// Event source over a framed binary DAQ stream.
pub struct BinaryRawHitReader {
    input: BufReader<File>,
    entry: i64,
    hits_key: String,
    tlu_key: String,
}

impl BinaryRawHitReader {
    /// Open `path` with the reader `cfg` node (`out_rawhits_key`,
    /// `out_tlu_key`).
    pub fn new(path: impl AsRef<Path>, cfg: &serde_yaml::Value) -> Result<Self> {
        let path = path.as_ref();
        let cfg: BinaryReaderCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid BinaryRawHitReader cfg")?;
        let file = File::open(path)
            .with_context(|| format!("cannot open binary raw input {}", path.display()))?;
        info!(path = %path.display(), "opened binary raw-hit stream");
        Ok(Self {
            input: BufReader::new(file),
            entry: -1,
            hits_key: cfg.out_rawhits_key,
            tlu_key: cfg.out_tlu_key,
        })
    }
}

impl EventSource for BinaryRawHitReader {
    fn next_event(&mut self, store: &mut EventStore) -> Result<bool> {
        self.entry += 1;
        let frame = match daq::read_frame(&mut self.input, self.entry)? {
            Some(frame) => frame,
            None => return Ok(false),
        };

        let mut hits = Vec::with_capacity(frame.hits.len());
        for (i, h) in frame.hits.iter().enumerate() {
            hits.push(RawHit {
                cell_id: pack_cell_id(h.layer, h.chip, h.channel),
                hg_adc: h.hg_adc,
                lg_adc: h.lg_adc,
                hittag: h.hittag,
                bcid: h.bcid,
                index: i as i32,
            });
        }
        let tlu = TluRawData {
            timestamp: frame.timestamp,
            bcid_tlu: frame.bcid_tlu,
            inputs: frame.inputs,
            fine_timestamps: frame.fine_timestamps,
            run_no: frame.run_no,
            cycle_id: frame.cycle_id,
            trigger_id: frame.trigger_id,
            event_time: frame.event_time,
        };

        store.put(self.hits_key.clone(), hits);
        store.put(self.tlu_key.clone(), tlu);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::daq::{read_frame, write_frame, DaqHit, EventFrame};
    use super::*;
    use std::io::Write as _;

    fn sample_frame(trigger_id: i32) -> EventFrame {
        EventFrame {
            run_no: 17,
            cycle_id: 2,
            trigger_id,
            event_time: 123,
            timestamp: 456,
            bcid_tlu: 7,
            inputs: vec![1, 0, 0, 0, 0, 0],
            fine_timestamps: vec![9; 6],
            hits: vec![DaqHit {
                layer: 3,
                chip: 4,
                channel: 5,
                hg_adc: 800,
                lg_adc: 420,
                hittag: 0,
                bcid: 12,
            }],
        }
    }

    #[test]
    fn frames_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample_frame(1)).unwrap();
        write_frame(&mut buf, &sample_frame(2)).unwrap();

        let mut cursor = &buf[..];
        let first = read_frame(&mut cursor, 0).unwrap().unwrap();
        assert_eq!(first.trigger_id, 1);
        let second = read_frame(&mut cursor, 1).unwrap().unwrap();
        assert_eq!(second.trigger_id, 2);
        assert!(read_frame(&mut cursor, 2).unwrap().is_none());
    }

    #[test]
    fn truncated_frames_fail() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &sample_frame(1)).unwrap();
        buf.truncate(buf.len() - 3);
        let mut cursor = &buf[..];
        assert!(read_frame(&mut cursor, 0).is_err());
    }

    #[test]
    fn the_reader_packs_cell_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.raw");
        {
            let mut f = File::create(&path).unwrap();
            let mut bytes = Vec::new();
            write_frame(&mut bytes, &sample_frame(1)).unwrap();
            f.write_all(&bytes).unwrap();
        }

        let cfg = serde_yaml::from_str("{out_rawhits_key: RawHits, out_tlu_key: TLU}").unwrap();
        let mut reader = BinaryRawHitReader::new(&path, &cfg).unwrap();
        let mut store = EventStore::new();
        assert!(reader.next_event(&mut store).unwrap());
        let hits: &Vec<RawHit> = store.get("RawHits").unwrap();
        assert_eq!(hits[0].cell_id, 3 * 100_000 + 4 * 10_000 + 5);
        let tlu: &TluRawData = store.get("TLU").unwrap();
        assert_eq!(tlu.run_no, 17);
        store.clear();
        assert!(!reader.next_event(&mut store).unwrap());
    }
}
