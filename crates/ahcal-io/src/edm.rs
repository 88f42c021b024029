//! Field descriptors and type registration for the event data model.
//!
//! Column suffixes keep the names the persisted files always carried;
//! adding a field appends a column and stays backward compatible. The
//! transient `index` handles are rebuilt from row order and are not
//! persisted.

use ahcal_types::{RawHit, RecoHit, SimpleFittedTrack, TluRawData, Track};

use crate::descriptor::{Field, Record, SeqField};
use crate::error::IoError;
use crate::registry;

impl Record for RawHit {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("cellID", |h: &RawHit| h.cell_id, |h: &mut RawHit, v| h.cell_id = v),
            Field::new("hg_adc", |h: &RawHit| h.hg_adc, |h: &mut RawHit, v| h.hg_adc = v),
            Field::new("lg_adc", |h: &RawHit| h.lg_adc, |h: &mut RawHit, v| h.lg_adc = v),
            Field::new("hittag", |h: &RawHit| h.hittag, |h: &mut RawHit, v| h.hittag = v),
            Field::new("bcid", |h: &RawHit| h.bcid, |h: &mut RawHit, v| h.bcid = v),
        ]
    }

    fn seq_fields() -> Vec<SeqField<Self>> {
        vec![
            SeqField::new("v.cellID", |h: &RawHit| h.cell_id, |h: &mut RawHit, v| h.cell_id = v),
            SeqField::new("v.hg_adc", |h: &RawHit| h.hg_adc, |h: &mut RawHit, v| h.hg_adc = v),
            SeqField::new("v.lg_adc", |h: &RawHit| h.lg_adc, |h: &mut RawHit, v| h.lg_adc = v),
            SeqField::new("v.hittag", |h: &RawHit| h.hittag, |h: &mut RawHit, v| h.hittag = v),
            SeqField::new("v.bcid", |h: &RawHit| h.bcid, |h: &mut RawHit, v| h.bcid = v),
        ]
    }
}

impl Record for TluRawData {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new(
                "Timestamp",
                |t: &TluRawData| t.timestamp,
                |t: &mut TluRawData, v| t.timestamp = v,
            ),
            Field::new(
                "BCID_TLU",
                |t: &TluRawData| t.bcid_tlu,
                |t: &mut TluRawData, v| t.bcid_tlu = v,
            ),
            Field::new(
                "Inputs",
                |t: &TluRawData| t.inputs.clone(),
                |t: &mut TluRawData, v| t.inputs = v,
            ),
            Field::new(
                "FineTimestamps",
                |t: &TluRawData| t.fine_timestamps.clone(),
                |t: &mut TluRawData, v| t.fine_timestamps = v,
            ),
            Field::new(
                "RunNo",
                |t: &TluRawData| t.run_no,
                |t: &mut TluRawData, v| t.run_no = v,
            ),
            Field::new(
                "CycleID",
                |t: &TluRawData| t.cycle_id,
                |t: &mut TluRawData, v| t.cycle_id = v,
            ),
            Field::new(
                "TriggerID",
                |t: &TluRawData| t.trigger_id,
                |t: &mut TluRawData, v| t.trigger_id = v,
            ),
            Field::new(
                "Event_Time",
                |t: &TluRawData| t.event_time,
                |t: &mut TluRawData, v| t.event_time = v,
            ),
        ]
    }
}

impl Record for RecoHit {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("cellID", |h: &RecoHit| h.cell_id, |h: &mut RecoHit, v| h.cell_id = v),
            Field::new("Edep", |h: &RecoHit| h.edep, |h: &mut RecoHit, v| h.edep = v),
            Field::new("Nmip", |h: &RecoHit| h.nmip, |h: &mut RecoHit, v| h.nmip = v),
        ]
    }

    fn seq_fields() -> Vec<SeqField<Self>> {
        vec![
            SeqField::new("v.cellID", |h: &RecoHit| h.cell_id, |h: &mut RecoHit, v| h.cell_id = v),
            SeqField::new("v.Edep", |h: &RecoHit| h.edep, |h: &mut RecoHit, v| h.edep = v),
            SeqField::new("v.Nmip", |h: &RecoHit| h.nmip, |h: &mut RecoHit, v| h.nmip = v),
        ]
    }
}

impl Record for Track {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new("x", |t: &Track| t.x, |t: &mut Track, v| t.x = v),
            Field::new("y", |t: &Track| t.y, |t: &mut Track, v| t.y = v),
            Field::new("tx", |t: &Track| t.tx, |t: &mut Track, v| t.tx = v),
            Field::new("ty", |t: &Track| t.ty, |t: &mut Track, v| t.ty = v),
            Field::new("z", |t: &Track| t.z, |t: &mut Track, v| t.z = v),
            Field::new("chi2", |t: &Track| t.chi2, |t: &mut Track, v| t.chi2 = v),
            Field::new("ndof", |t: &Track| t.ndof, |t: &mut Track, v| t.ndof = v),
            Field::new(
                "consecutive_skips",
                |t: &Track| t.consecutive_skips,
                |t: &mut Track, v| t.consecutive_skips = v,
            ),
            Field::new(
                "nInTrackHits",
                |t: &Track| t.n_in_track_hits,
                |t: &mut Track, v| t.n_in_track_hits = v,
            ),
            Field::new(
                "nOutTrackHits",
                |t: &Track| t.n_out_track_hits,
                |t: &mut Track, v| t.n_out_track_hits = v,
            ),
            Field::new(
                "inTrackHitsIndices",
                |t: &Track| t.in_track_hit_indices.clone(),
                |t: &mut Track, v| t.in_track_hit_indices = v,
            ),
            Field::new(
                "outTrackHitsIndices",
                |t: &Track| t.out_track_hit_indices.clone(),
                |t: &mut Track, v| t.out_track_hit_indices = v,
            ),
            Field::new("valid", |t: &Track| t.valid, |t: &mut Track, v| t.valid = v),
        ]
    }
}

impl Record for SimpleFittedTrack {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::new(
                "init_pos_x",
                |t: &SimpleFittedTrack| t.init_pos_x,
                |t: &mut SimpleFittedTrack, v| t.init_pos_x = v,
            ),
            Field::new(
                "init_pos_y",
                |t: &SimpleFittedTrack| t.init_pos_y,
                |t: &mut SimpleFittedTrack, v| t.init_pos_y = v,
            ),
            Field::new(
                "direction_x",
                |t: &SimpleFittedTrack| t.direction_x,
                |t: &mut SimpleFittedTrack, v| t.direction_x = v,
            ),
            Field::new(
                "direction_y",
                |t: &SimpleFittedTrack| t.direction_y,
                |t: &mut SimpleFittedTrack, v| t.direction_y = v,
            ),
            Field::new(
                "chi2_x",
                |t: &SimpleFittedTrack| t.chi2_x,
                |t: &mut SimpleFittedTrack, v| t.chi2_x = v,
            ),
            Field::new(
                "chi2_y",
                |t: &SimpleFittedTrack| t.chi2_y,
                |t: &mut SimpleFittedTrack, v| t.chi2_y = v,
            ),
            Field::new(
                "ndf",
                |t: &SimpleFittedTrack| t.ndf,
                |t: &mut SimpleFittedTrack, v| t.ndf = v,
            ),
            Field::new(
                "inTrackHitsIndices",
                |t: &SimpleFittedTrack| t.in_track_hit_indices.clone(),
                |t: &mut SimpleFittedTrack, v| t.in_track_hit_indices = v,
            ),
            Field::new(
                "outTrackHitsIndices",
                |t: &SimpleFittedTrack| t.out_track_hit_indices.clone(),
                |t: &mut SimpleFittedTrack, v| t.out_track_hit_indices = v,
            ),
            Field::new(
                "nTotalHits",
                |t: &SimpleFittedTrack| t.n_total_hits,
                |t: &mut SimpleFittedTrack, v| t.n_total_hits = v,
            ),
            Field::new(
                "valid",
                |t: &SimpleFittedTrack| t.valid,
                |t: &mut SimpleFittedTrack, v| t.valid = v,
            ),
        ]
    }
}

/// Install every builtin record under its public type name.
pub fn register_builtin_records() -> Result<(), IoError> {
    registry::register_record_vec_type::<RawHit>("AHCALRawHit")?;
    registry::register_record_type::<TluRawData>("AHCALTLURawData")?;
    registry::register_record_vec_type::<RecoHit>("AHCALRecoHit")?;
    registry::register_record_type::<Track>("Track")?;
    registry::register_record_type::<SimpleFittedTrack>("SimpleFittedTrack")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::TableReader;
    use crate::writer::TableWriter;

    #[test]
    fn descriptor_order_is_stable() {
        let first: Vec<&str> = RecoHit::fields().iter().map(|f| f.name()).collect();
        let second: Vec<&str> = RecoHit::fields().iter().map(|f| f.name()).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["cellID", "Edep", "Nmip"]);
    }

    #[test]
    fn scalar_record_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlu.root");

        let tlu = TluRawData {
            timestamp: 7,
            bcid_tlu: 9,
            inputs: vec![1, 0, 1, 0, 1, 0],
            fine_timestamps: vec![5; 6],
            run_no: 42,
            cycle_id: 3,
            trigger_id: 11,
            event_time: 99,
        };

        let mut w = TableWriter::create(&path, "events").unwrap();
        for f in TluRawData::fields() {
            f.write(&tlu, &mut w, "TLU").unwrap();
        }
        w.fill();
        w.finish().unwrap();

        let mut r = TableReader::open(&path, "events").unwrap();
        assert!(r.next());
        let mut back = TluRawData::default();
        for f in TluRawData::fields() {
            f.read(&mut back, &mut r, "TLU").unwrap();
        }
        assert_eq!(back, tlu);
    }

    #[test]
    fn sequence_record_roundtrips_with_v_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.root");

        let hits = vec![
            RecoHit { cell_id: 100_000, edep: 0.5, nmip: 1.1, index: 0 },
            RecoHit { cell_id: 200_011, edep: 0.7, nmip: 1.5, index: 1 },
            RecoHit { cell_id: 300_022, edep: 0.9, nmip: 2.0, index: 2 },
        ];

        let mut w = TableWriter::create(&path, "events").unwrap();
        let refs: Vec<&RecoHit> = hits.iter().collect();
        for f in RecoHit::seq_fields() {
            f.write(&refs, &mut w, "RecoHits").unwrap();
        }
        w.fill();
        w.finish().unwrap();

        let mut r = TableReader::open(&path, "events").unwrap();
        assert!(r.next());
        assert!(r.has_column("RecoHits.v.cellID"));
        assert!(r.has_column("RecoHits.v.Edep"));
        assert!(r.has_column("RecoHits.v.Nmip"));

        let fields = RecoHit::seq_fields();
        let n = fields[0].len(&mut r, "RecoHits").unwrap();
        let mut back = vec![RecoHit::default(); n];
        for f in &fields {
            f.read(&mut back, &mut r, "RecoHits").unwrap();
        }
        assert_eq!(back.len(), 3);
        for (a, b) in back.iter().zip(&hits) {
            assert_eq!(a.cell_id, b.cell_id);
            assert_eq!(a.edep, b.edep);
            assert_eq!(a.nmip, b.nmip);
        }
    }
}
