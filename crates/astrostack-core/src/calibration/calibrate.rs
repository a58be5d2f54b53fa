use ndarray::{Array3, Zip};

use crate::consts::{DIVIDE_IDENTITY, SUBTRACT_IDENTITY, WORKING_MAX};
use crate::error::{Result, StackError};
use crate::frame::{CalibratedFrame, MasterFrame, RawFrame};

/// Dark-subtract and flat-divide one light frame, producing 16-bit output.
///
/// An absent master contributes its identity element: 0 for the dark, 1 for
/// the flat. Zero flat pixels divide by 1. Negative results clamp to zero and
/// values beyond the 16-bit range saturate.
pub fn calibrate(
    raw: &RawFrame,
    master_dark: Option<&MasterFrame>,
    master_flat: Option<&MasterFrame>,
) -> Result<CalibratedFrame> {
    for master in [master_dark, master_flat].into_iter().flatten() {
        if master.shape() != raw.shape() {
            return Err(StackError::DimensionMismatch {
                class: master.class,
                expected: master.shape(),
                found: raw.shape(),
            });
        }
    }

    let mut data = Array3::<u16>::zeros(raw.shape());
    Zip::indexed(&mut data)
        .and(&raw.data)
        .par_for_each(|idx, out, &value| {
            let dark = master_dark.map_or(SUBTRACT_IDENTITY, |m| m.data[idx]);
            let flat = master_flat.map_or(DIVIDE_IDENTITY, |m| flat_divisor(m.data[idx]));
            *out = to_working_depth((value - dark) / flat);
        });

    Ok(CalibratedFrame {
        data,
        source_bit_depth: raw.bit_depth,
        path: raw.path.clone(),
    })
}

fn flat_divisor(value: f32) -> f32 {
    if value == 0.0 {
        DIVIDE_IDENTITY
    } else {
        value
    }
}

fn to_working_depth(value: f32) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, WORKING_MAX as f32) as u16
}
