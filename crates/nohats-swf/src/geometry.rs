//! Bit-packed SWF records: rectangles, matrices and color transforms.
//!
//! Each record starts on a byte boundary and is padded to the next one.
//! Component widths are stored in the record itself.

use nohats_binary::{BitStruct, Bits, Fields, Result, SBits};

fn width(f: &mut Fields<'_>, name: &str, bits: u32) -> Result<u32> {
    Ok(f.add(name, Bits::new(bits))?.value().to_u64()? as u32)
}

fn flag(f: &mut Fields<'_>, name: &str) -> Result<bool> {
    Ok(f.add(name, Bits::new(1))?.value().to_u64()? == 1)
}

/// `RECT`: a 5-bit width then four signed coordinates in twips.
pub fn rect() -> BitStruct {
    BitStruct::new(|f: &mut Fields<'_>| {
        let n = width(f, "nbits", 5)?;
        for name in ["xmin", "xmax", "ymin", "ymax"] {
            f.add(name, SBits::new(n))?;
        }
        Ok(())
    })
}

/// `MATRIX`: optional scale and rotate pairs, then the translation.
pub fn matrix() -> BitStruct {
    BitStruct::new(|f: &mut Fields<'_>| {
        if flag(f, "has_scale")? {
            let n = width(f, "n_scale_bits", 5)?;
            f.add("scale_x", SBits::new(n))?;
            f.add("scale_y", SBits::new(n))?;
        }
        if flag(f, "has_rotate")? {
            let n = width(f, "n_rotate_bits", 5)?;
            f.add("rotate_skew0", SBits::new(n))?;
            f.add("rotate_skew1", SBits::new(n))?;
        }
        let n = width(f, "n_translate_bits", 5)?;
        f.add("translate_x", SBits::new(n))?;
        f.add("translate_y", SBits::new(n))?;
        Ok(())
    })
}

/// `CXFORMWITHALPHA`: optional multiply and add terms for all four channels.
pub fn color_transform() -> BitStruct {
    BitStruct::new(|f: &mut Fields<'_>| {
        let add = flag(f, "has_add_terms")?;
        let mult = flag(f, "has_mult_terms")?;
        let n = width(f, "nbits", 4)?;
        if mult {
            for name in ["red_mult", "green_mult", "blue_mult", "alpha_mult"] {
                f.add(name, SBits::new(n))?;
            }
        }
        if add {
            for name in ["red_add", "green_add", "blue_add", "alpha_add"] {
                f.add(name, SBits::new(n))?;
            }
        }
        Ok(())
    })
}
