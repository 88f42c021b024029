//! Fixed geometry of the AHCAL prototype.
//!
//! Tile positions are tabulated per SPIROC channel and transformed by chip
//! and HBU placement. The tables are construction-time constants; a
//! geometry database is intentionally not part of this crate.

/// Number of instrumented layers.
pub const LAYER_NO: usize = 40;
/// Number of readout chips per layer.
pub const CHIP_NO: usize = 9;
/// Number of channels per chip.
pub const CHANNEL_NO: usize = 36;

/// Tile pitch in x and y, mm.
pub const XY_SIZE: f64 = 40.0;
/// Scintillator thickness in z, mm.
pub const Z_SIZE: f64 = 3.0;
/// Half extent of the 18x18 tile grid, mm.
pub const X_MAX: f64 = 40.3 * 18.0 / 2.0;
/// Half extent of the 18x18 tile grid, mm.
pub const Y_MAX: f64 = X_MAX;

/// Number of bins per axis of the per-layer 2D maps.
pub const MAP_NBIN_XY: usize = 18;

const CHIP_DIS_Y: f64 = 241.8;
const HBU_X: f64 = 239.3;

// Per-channel tile centers on one chip, before chip/HBU placement.
const POS_X: [f64; CHANNEL_NO] = [
    100.2411, 100.2411, 100.2411, 59.94146, 59.94146, 59.94146, 19.64182, 19.64182, 19.64182,
    19.64182, 59.94146, 100.2411, 100.2411, 59.94146, 19.64182, 100.2411, 59.94146, 19.64182,
    -20.65782, -60.95746, -101.2571, -20.65782, -60.95746, -101.2571, -101.2571, -60.95746,
    -20.65782, -20.65782, -20.65782, -20.65782, -60.95746, -60.95746, -60.95746, -101.2571,
    -101.2571, -101.2571,
];
const POS_Y: [f64; CHANNEL_NO] = [
    141.04874, 181.34838, 221.64802, 141.04874, 181.34838, 221.64802, 141.04874, 181.34838,
    221.64802, 261.94766, 261.94766, 261.94766, 302.2473, 302.2473, 302.2473, 342.54694,
    342.54694, 342.54694, 342.54694, 342.54694, 342.54694, 302.2473, 302.2473, 302.2473,
    261.94766, 261.94766, 261.94766, 221.64802, 181.34838, 141.04874, 221.64802, 181.34838,
    141.04874, 221.64802, 181.34838, 141.04874,
];

// Physical mounting order of the HBUs along the beam axis.
const HBU_POSITION_ORDER: [i32; LAYER_NO] = [
    39, 38, 37, 27, 14, 6, 7, 9, 12, 0, //
    2, 3, 5, 8, 10, 11, 13, 15, 16, 1, //
    17, 18, 19, 20, 21, 22, 23, 24, 25, 4, //
    26, 28, 29, 30, 31, 32, 33, 35, 34, 36,
];

/// Tile center x for a `(channel, chip)` pair, mm.
///
/// Channels 0/2 and 33/35 are mirrored on the non-leading chips of an HBU
/// row; this reproduces the cabling of the prototype.
pub fn pos_x(channel_id: usize, chip_id: usize) -> f64 {
    let chip = chip_id % 3;
    let mut ch = channel_id;
    if chip != 0 {
        ch = match ch {
            2 => 0,
            0 => 2,
            33 => 35,
            35 => 33,
            other => other,
        };
    }
    POS_Y[ch] - chip as f64 * CHIP_DIS_Y
}

/// Tile center y for a `(channel, chip)` pair, mm.
pub fn pos_y(channel_id: usize, chip_id: usize) -> f64 {
    let hbu_id = (chip_id / 3) as f64;
    -(-POS_X[channel_id] + (hbu_id - 1.0) * HBU_X)
}

/// Front-face z of the scintillator of `layer`, mm.
pub fn pos_z(layer_id: i32) -> f64 {
    layer_id as f64 * 29.63 + 1.5
}

/// Map a physical mounting position back to the logical layer index.
///
/// Returns -1 when the position is not part of the mounting table.
pub fn pos_to_layer_id(position_order: i32) -> i32 {
    for (layer, pos) in HBU_POSITION_ORDER.iter().enumerate() {
        if *pos == position_order {
            return layer as i32;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_positions_are_monotonic() {
        for layer in 0..LAYER_NO as i32 - 1 {
            assert!(pos_z(layer) < pos_z(layer + 1));
        }
        assert_eq!(pos_z(0), 1.5);
    }

    #[test]
    fn mounting_order_is_a_permutation() {
        for layer in 0..LAYER_NO as i32 {
            let pos = HBU_POSITION_ORDER[layer as usize];
            assert_eq!(pos_to_layer_id(pos), layer);
        }
        assert_eq!(pos_to_layer_id(123), -1);
    }

    #[test]
    fn tile_positions_stay_on_the_grid() {
        for chip in 0..CHIP_NO {
            for channel in 0..CHANNEL_NO {
                let x = pos_x(channel, chip);
                let y = pos_y(channel, chip);
                assert!(x.abs() <= X_MAX + XY_SIZE, "x out of range: {x}");
                assert!(y.abs() <= Y_MAX + XY_SIZE, "y out of range: {y}");
            }
        }
    }

    #[test]
    fn mirrored_channels_only_on_trailing_chips() {
        // Chip 0 keeps the tabulated order, chip 1 swaps 0<->2.
        assert_eq!(pos_x(0, 0), POS_Y[0]);
        assert_eq!(pos_x(0, 1), POS_Y[2] - CHIP_DIS_Y);
        assert_eq!(pos_x(2, 1), POS_Y[0] - CHIP_DIS_Y);
    }
}
