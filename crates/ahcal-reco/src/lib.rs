#![forbid(unsafe_code)]

//! **ahcal-reco** – Reconstruction and calibration algorithms.
//!
//! The four pipeline stages: ADC-to-energy conversion with gain switching,
//! the straight-line least-squares track fit, the Kalman-filter muon
//! tagger and the pedestal collector. Each stage parses its own `cfg`
//! node and registers itself under its YAML type name through
//! [`register_builtin`].

pub mod adc_to_energy;
pub mod calib;
pub mod muon_kf;
pub mod pedestal;
pub mod track_fit;

use anyhow::Result;
use once_cell::sync::OnceCell;

use ahcal_core::registry::register_algorithm;

static BUILTIN: OnceCell<()> = OnceCell::new();

/// Install the builtin reconstruction algorithms. Idempotent.
pub fn register_builtin() -> Result<()> {
    if BUILTIN.set(()).is_err() {
        return Ok(());
    }
    register_algorithm("AdcToEnergyAlg", adc_to_energy::create)?;
    register_algorithm("TrackFitAlg", track_fit::create)?;
    register_algorithm("MuonKFAlg", muon_kf::create)?;
    register_algorithm("PedestalAlg", pedestal::create)?;
    Ok(())
}
