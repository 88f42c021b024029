//! Event data model.
//!
//! All records are plain value types. A cell is addressed by a packed
//! `cellID = layer * 100000 + chip * 10000 + channel`; the subfields are
//! always derived from the packed id and never stored independently.

use serde::{Deserialize, Serialize};

use crate::geometry;

/// Pack a `(layer, chip, channel)` triple into a cellID.
pub fn pack_cell_id(layer: i32, chip: i32, channel: i32) -> i32 {
    layer * 100_000 + chip * 10_000 + channel
}

//─────────────────────────────
//  Raw records
//─────────────────────────────

/// One scintillator-tile readout as delivered by the DAQ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHit {
    /// Packed cell id: `layer * 100000 + chip * 10000 + channel`.
    pub cell_id: i32,
    /// High-gain ADC value (12 bit).
    pub hg_adc: i32,
    /// Low-gain ADC value (12 bit).
    pub lg_adc: i32,
    /// DAQ hit tag.
    pub hittag: i32,
    /// Bunch-crossing id of the hit.
    pub bcid: i32,
    /// Position of the hit within its event; stable handle for track
    /// membership.
    pub index: i32,
}

impl RawHit {
    /// Layer index, 0..39.
    pub fn layer(&self) -> i32 {
        self.cell_id / 100_000
    }

    /// Chip index, 0..8.
    pub fn chip(&self) -> i32 {
        (self.cell_id / 10_000) % 10
    }

    /// Channel index, 0..35.
    pub fn channel(&self) -> i32 {
        self.cell_id % 10_000
    }
}

/// Per-event Trigger Logic Unit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TluRawData {
    /// Coarse TLU timestamp.
    pub timestamp: i32,
    /// Bunch-crossing id as seen by the TLU.
    pub bcid_tlu: i32,
    /// State of the six digital inputs.
    pub inputs: Vec<i32>,
    /// Fine timestamp per digital input.
    pub fine_timestamps: Vec<i32>,
    /// Run number of the acquisition session.
    pub run_no: i32,
    /// Acquisition cycle id.
    pub cycle_id: i32,
    /// Trigger id within the cycle.
    pub trigger_id: i32,
    /// Event wall-clock time.
    pub event_time: i32,
}

impl Default for TluRawData {
    fn default() -> Self {
        Self {
            timestamp: 0,
            bcid_tlu: 0,
            inputs: vec![0; 6],
            fine_timestamps: vec![0; 6],
            run_no: 0,
            cycle_id: 0,
            trigger_id: 0,
            event_time: 0,
        }
    }
}

//─────────────────────────────
//  Calibrated records
//─────────────────────────────

/// One calibrated energy deposit. Position is a pure function of the
/// cell id through the geometry tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoHit {
    /// Packed cell id: `layer * 100000 + chip * 10000 + channel`.
    pub cell_id: i32,
    /// Deposited energy in MeV.
    pub edep: f64,
    /// Deposited energy in units of MIP.
    pub nmip: f64,
    /// Position of the source raw hit within its event.
    pub index: i32,
}

impl RecoHit {
    /// Layer index, 0..39.
    pub fn layer(&self) -> i32 {
        self.cell_id / 100_000
    }

    /// Chip index, 0..8.
    pub fn chip(&self) -> i32 {
        (self.cell_id / 10_000) % 10
    }

    /// Channel index, 0..35.
    pub fn channel(&self) -> i32 {
        self.cell_id % 10_000
    }

    /// Tile center x, mm.
    pub fn x(&self) -> f64 {
        geometry::pos_x(self.channel() as usize, self.chip() as usize)
    }

    /// Tile center y, mm.
    pub fn y(&self) -> f64 {
        geometry::pos_y(self.channel() as usize, self.chip() as usize)
    }

    /// Scintillator front-face z, mm.
    pub fn z(&self) -> f64 {
        geometry::pos_z(self.layer())
    }

    /// Column of the tile on the 18x18 layer grid.
    pub fn x_index(&self) -> i32 {
        (self.x() / 40.3 + 9.0) as i32
    }

    /// Row of the tile on the 18x18 layer grid.
    pub fn y_index(&self) -> i32 {
        (self.y() / 40.3 + 9.0) as i32
    }
}

//─────────────────────────────
//  Track records
//─────────────────────────────

/// Output of the Kalman-filter muon tagger.
///
/// The index lists partition the input hits of the event: every input hit
/// index appears in exactly one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Track x at `z`, mm.
    pub x: f64,
    /// Track y at `z`, mm.
    pub y: f64,
    /// Track slope dx/dz.
    pub tx: f64,
    /// Track slope dy/dz.
    pub ty: f64,
    /// z of the last filter update, mm.
    pub z: f64,
    /// Sum of accepted gating distances.
    pub chi2: f64,
    /// Degrees of freedom: two per accepted update.
    pub ndof: i32,
    /// Consecutive unassociated layers when the sweep ended.
    pub consecutive_skips: i32,
    /// Whether a track was found at all.
    pub valid: bool,
    /// Number of hits attached to the track.
    pub n_in_track_hits: i32,
    /// Number of input hits not attached to the track.
    pub n_out_track_hits: i32,
    /// Event indices of the attached hits.
    pub in_track_hit_indices: Vec<i32>,
    /// Event indices of the remaining hits.
    pub out_track_hit_indices: Vec<i32>,
    /// Attached hits, copied for downstream consumers.
    pub in_track_hits: Vec<RecoHit>,
    /// Remaining hits, copied for downstream consumers.
    pub out_track_hits: Vec<RecoHit>,
}

/// Output of the straight-line least-squares fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleFittedTrack {
    /// Fitted x at z = 0, mm.
    pub init_pos_x: f64,
    /// Fitted y at z = 0, mm.
    pub init_pos_y: f64,
    /// Fitted slope dx/dz.
    pub direction_x: f64,
    /// Fitted slope dy/dz.
    pub direction_y: f64,
    /// Chi-square of the x-z projection fit.
    pub chi2_x: f64,
    /// Chi-square of the y-z projection fit.
    pub chi2_y: f64,
    /// Degrees of freedom, shared by both projections.
    pub ndf: i32,
    /// Event indices of hits compatible with the fitted line.
    pub in_track_hit_indices: Vec<i32>,
    /// Event indices of the remaining hits.
    pub out_track_hit_indices: Vec<i32>,
    /// Number of hits that entered the fit.
    pub n_total_hits: i32,
    /// Whether the fit succeeded.
    pub valid: bool,
    /// Compatible hits, copied for downstream consumers.
    pub in_track_hits: Vec<RecoHit>,
    /// Remaining hits, copied for downstream consumers.
    pub out_track_hits: Vec<RecoHit>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cell_id_decodes_into_its_parts() {
        let hit = RawHit {
            cell_id: pack_cell_id(12, 3, 35),
            ..RawHit::default()
        };
        assert_eq!(hit.layer(), 12);
        assert_eq!(hit.chip(), 3);
        assert_eq!(hit.channel(), 35);
    }

    #[test]
    fn reco_hit_position_follows_geometry() {
        let hit = RecoHit {
            cell_id: pack_cell_id(7, 4, 17),
            ..RecoHit::default()
        };
        assert_eq!(hit.x(), geometry::pos_x(17, 4));
        assert_eq!(hit.y(), geometry::pos_y(17, 4));
        assert_eq!(hit.z(), geometry::pos_z(7));
    }

    #[test]
    fn tlu_defaults_carry_six_inputs() {
        let tlu = TluRawData::default();
        assert_eq!(tlu.inputs.len(), 6);
        assert_eq!(tlu.fine_timestamps.len(), 6);
    }

    proptest! {
        #[test]
        fn cell_id_roundtrips(layer in 0i32..40, chip in 0i32..9, channel in 0i32..36) {
            let id = pack_cell_id(layer, chip, channel);
            let hit = RawHit { cell_id: id, ..RawHit::default() };
            prop_assert_eq!(pack_cell_id(hit.layer(), hit.chip(), hit.channel()), id);
        }
    }
}
