//! ADC-to-energy conversion with gain switching.
//!
//! Per hit: the pedestal-subtracted high-gain amplitude is used while it
//! sits below the gain plateau minus the switch margin; beyond that the
//! low-gain amplitude is scaled back to the high-gain scale with the
//! channel's gain ratio. The result is expressed in MIPs and in MeV.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use ahcal_core::{Algorithm, EventStore, RunContext};
use ahcal_types::{reference, RawHit, RecoHit};

use crate::calib::{CalibMaps, TableCfg};

/// Configuration of [`AdcToEnergyAlg`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdcToEnergyCfg {
    /// Store key of the input raw hits.
    pub in_rawhit_key: String,
    /// Store key of the output calibrated hits.
    pub out_recohit_key: String,
    /// MIP table, when measured constants are available.
    pub mip: Option<TableCfg>,
    /// Pedestal table, when measured constants are available.
    pub pedestal: Option<TableCfg>,
    /// DAC (gain) table, when measured constants are available.
    pub dac: Option<TableCfg>,
}

impl Default for AdcToEnergyCfg {
    fn default() -> Self {
        Self {
            in_rawhit_key: "RawHits".to_owned(),
            out_recohit_key: "RecoHits".to_owned(),
            mip: None,
            pedestal: None,
            dac: None,
        }
    }
}

/// Reconstruct one hit with the given calibration constants.
pub fn reconstruct_hit(calib: &CalibMaps, raw: &RawHit) -> RecoHit {
    let mpv = calib.mip(raw.cell_id);
    let hg_ped = calib.hg_ped(raw.cell_id);
    let lg_ped = calib.lg_ped(raw.cell_id);
    let gain_ratio = calib.gain_ratio(raw.cell_id);
    let gain_plat = calib.gain_plat(raw.cell_id);

    let hg = f64::from(raw.hg_adc);
    let lg = f64::from(raw.lg_adc);

    let mut hit = RecoHit {
        cell_id: raw.cell_id,
        index: raw.index,
        ..RecoHit::default()
    };
    if (hg - hg_ped) < (f64::from(gain_plat) - reference::SWITCH_POINT) {
        hit.nmip = (hg - hg_ped) / mpv;
        hit.edep = (hg - hg_ped) * reference::MIP_E / mpv;
    } else {
        hit.nmip = (lg - lg_ped) * gain_ratio / mpv;
        hit.edep = (lg - lg_ped) * gain_ratio * reference::MIP_E / mpv;
    }
    if hit.edep < 0.0 {
        hit.edep = 0.0;
        hit.nmip = 0.0;
    }
    hit
}

/// The ADC-to-energy pipeline stage.
pub struct AdcToEnergyAlg {
    name: String,
    cfg: AdcToEnergyCfg,
    calib: CalibMaps,
}

impl AdcToEnergyAlg {
    /// Build the stage from its `cfg` node.
    pub fn from_config(cfg: &serde_yaml::Value, name: &str) -> Result<Self> {
        let cfg: AdcToEnergyCfg =
            serde_yaml::from_value(cfg.clone()).context("invalid AdcToEnergyAlg cfg")?;
        Ok(Self {
            name: name.to_owned(),
            cfg,
            calib: CalibMaps::new(),
        })
    }

    /// Read-only access to the loaded constants.
    pub fn calib(&self) -> &CalibMaps {
        &self.calib
    }
}

impl Algorithm for AdcToEnergyAlg {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self) -> Result<()> {
        if let Some(mip) = &self.cfg.mip {
            self.calib
                .load_mip(mip)
                .with_context(|| format!("loading MIP table {}", mip.file))?;
        }
        if let Some(ped) = &self.cfg.pedestal {
            self.calib
                .load_pedestal(ped)
                .with_context(|| format!("loading pedestal table {}", ped.file))?;
        }
        if let Some(dac) = &self.cfg.dac {
            self.calib
                .load_dac(dac)
                .with_context(|| format!("loading DAC table {}", dac.file))?;
        }
        self.calib.fill_missing_with_references();
        Ok(())
    }

    fn execute(&mut self, store: &mut EventStore) -> Result<()> {
        let raw_hits = store.get::<Vec<RawHit>>(&self.cfg.in_rawhit_key)?;

        let mut reco_hits = Vec::with_capacity(raw_hits.len());
        for raw in raw_hits {
            let hit = reconstruct_hit(&self.calib, raw);
            if hit.nmip > 1e6 {
                debug!(
                    cellid = hit.cell_id,
                    nmip = hit.nmip,
                    hg = raw.hg_adc,
                    lg = raw.lg_adc,
                    "large Nmip"
                );
            }
            reco_hits.push(hit);
        }
        debug!(hits = reco_hits.len(), "converted raw hits");
        store.put(self.cfg.out_recohit_key.clone(), reco_hits);
        Ok(())
    }
}

pub(crate) fn create(
    _ctx: &RunContext,
    cfg: &serde_yaml::Value,
    name: &str,
) -> Result<Box<dyn Algorithm>> {
    Ok(Box::new(AdcToEnergyAlg::from_config(cfg, name)?))
}
