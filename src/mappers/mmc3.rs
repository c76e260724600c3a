//! MMC3 (mapper 4): 8 KiB PRG banking, 1 KiB CHR banking, scanline IRQ.
//!
//! Register pairs are selected by address range and parity. The IRQ
//! counter is clocked once per rendered scanline (the PPU calls
//! `Mapper::notify_scanline` at dot 260) and pulses the IRQ line when it
//! reaches zero while enabled.

use crate::mapper::{Mapper, Mirroring};

#[derive(Debug, Default)]
pub struct Mmc3 {
    bank_select: u8,
    bank_regs: [u8; 8],
    prg_ram_protect: u8,
    irq_latch: u8,
    irq_counter: u8,
    irq_enabled: bool,
    irq_reload: bool,
}

pub fn power_on(m: &mut Mapper, k: &mut Mmc3) {
    m.set_prg_geometry(0x2000);
    m.set_prg_ram(true, true);
    k.bank_select = 0;
    setup_banks(m, k);
}

pub fn store_prg(m: &mut Mapper, k: &mut Mmc3, addr: u16, val: u8) {
    match addr {
        0x8000..=0x9FFF => {
            if addr & 1 == 0 {
                // Bank select. Re-map only when the mode bits change; the
                // register index takes effect on the next data write.
                let old = k.bank_select;
                k.bank_select = val;
                if (val ^ old) & 0xC0 != 0 {
                    setup_banks(m, k);
                }
            } else {
                // Bank data.
                k.bank_regs[(k.bank_select & 0x7) as usize] = val;
                setup_banks(m, k);
            }
        }
        0xA000..=0xBFFF => {
            if addr & 1 == 0 {
                m.set_mirroring(if val & 1 != 0 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                });
            } else {
                k.prg_ram_protect = val;
                m.set_prg_ram(val & 0x80 != 0, val & 0x40 != 0);
            }
        }
        0xC000..=0xDFFF => {
            if addr & 1 == 0 {
                k.irq_counter = k.irq_latch;
            } else {
                k.irq_latch = val;
                k.irq_reload = true;
            }
        }
        _ => {
            if addr & 1 == 0 {
                k.irq_enabled = false;
                m.ack_irq();
            } else {
                k.irq_enabled = true;
            }
        }
    }
}

fn setup_banks(m: &mut Mapper, k: &mut Mmc3) {
    // CHR: two 2 KiB pairs and four 1 KiB banks, halves swapped by bit 7.
    let r = &k.bank_regs;
    if k.bank_select & 0x80 == 0 {
        m.set_chr_bank(0, (r[0] & 0xFE) as usize);
        m.set_chr_bank(1, (r[0] | 0x01) as usize);
        m.set_chr_bank(2, (r[1] & 0xFE) as usize);
        m.set_chr_bank(3, (r[1] | 0x01) as usize);
        m.set_chr_bank(4, r[2] as usize);
        m.set_chr_bank(5, r[3] as usize);
        m.set_chr_bank(6, r[4] as usize);
        m.set_chr_bank(7, r[5] as usize);
    } else {
        m.set_chr_bank(0, r[2] as usize);
        m.set_chr_bank(1, r[3] as usize);
        m.set_chr_bank(2, r[4] as usize);
        m.set_chr_bank(3, r[5] as usize);
        m.set_chr_bank(4, (r[0] & 0xFE) as usize);
        m.set_chr_bank(5, (r[0] | 0x01) as usize);
        m.set_chr_bank(6, (r[1] & 0xFE) as usize);
        m.set_chr_bank(7, (r[1] | 0x01) as usize);
    }

    // PRG: slot 1 switchable, slot 3 fixed to the last bank; slots 0 and 2
    // swap between r6 and the next-to-last bank on bit 6.
    let count = m.prg_bank_count();
    m.set_prg_bank(1, r[7] as usize);
    m.set_prg_bank(3, count - 1);
    if k.bank_select & 0x40 == 0 {
        m.set_prg_bank(0, r[6] as usize);
        m.set_prg_bank(2, count.saturating_sub(2));
    } else {
        m.set_prg_bank(0, count.saturating_sub(2));
        m.set_prg_bank(2, r[6] as usize);
    }
}

/// One scanline tick from the PPU.
pub fn notify_scanline(m: &mut Mapper, k: &mut Mmc3) {
    if k.irq_reload {
        k.irq_counter = k.irq_latch;
        k.irq_reload = false;
    }

    if k.irq_counter > 0 {
        k.irq_counter -= 1;
    }

    if k.irq_counter == 0 {
        if k.irq_enabled {
            m.raise_irq();
        }
        k.irq_counter = k.irq_latch;
    }
}
