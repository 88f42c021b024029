//! Reference calibration constants.
//!
//! Used wherever a channel has no measured calibration entry, and for the
//! high-gain/low-gain switch decision.

/// Energy of one MIP in MeV.
pub const MIP_E: f64 = 0.461;
/// Distance below the low-gain plateau at which the readout switches gain.
pub const SWITCH_POINT: f64 = 500.0;
/// Default high-gain pedestal, ADC counts.
pub const REF_PED_HIGHGAIN: f64 = 390.0;
/// Default low-gain pedestal, ADC counts.
pub const REF_PED_LOWGAIN: f64 = 384.0;
/// Default MIP most-probable value, ADC counts.
pub const REF_MIP: f64 = 344.3;
/// Default LG-to-HG gain ratio.
pub const REF_GAIN_RATIO: f64 = 26.0;
/// Default low-gain plateau, ADC counts.
pub const LOWGAIN_PLAT: i32 = 2000;
