//! NROM (mapper 0): no registers, no switching.
//!
//! 16 KiB PRG images mirror across both slots; 32 KiB images map straight
//! through. PRG RAM is left disabled and CHR keeps the identity mapping.

use crate::mapper::Mapper;

pub fn power_on(m: &mut Mapper) {
    m.set_prg_geometry(0x4000);
    m.set_prg_bank(0, 0);
    m.set_prg_bank(1, if m.prg_bank_count() >= 2 { 1 } else { 0 });
}
