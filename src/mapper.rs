/*!
Cartridge mapper: bank-switched PRG/CHR routing and per-mapper write
handling.

Design
- One concrete `Mapper` struct owns the cartridge memories (PRG ROM, PRG
  RAM, CHR ROM or RAM) and the generic bank state; a tagged `MapperKind`
  variant holds the per-mapper registers. Dispatch is a plain `match` —
  no trait hierarchy.
- Banks are expressed as byte *offsets* into the owned buffers, never as
  pointers. PRG geometry follows the hardware: 1-4 bank slots of 0x4000 or
  0x2000 bytes selected by shift/mask; CHR banking is uniformly 1 KiB
  granular (eight slots covering $0000-$1FFF of PPU space), with coarser
  mappers programming groups of slots.
- The bus forwards CPU traffic: reads in $8000-$FFFF via `load_prg`,
  writes there via `store_prg` (bank reconfiguration), and $6000-$7FFF via
  `load_ram`/`store_ram` honoring the enable/write-protect bits. The PPU
  reads pattern data via `load_chr` and drives the MMC3 scanline counter
  via `notify_scanline`.

Supported mappers: 0 (NROM), 1 (MMC1), 3 (CNROM), 4 (MMC3).
*/

use crate::mappers::{Cnrom, Mmc1, Mmc3};

const PRG_WINDOW: u16 = 0x8000;
const CHR_BANK_SIZE: usize = 0x400;

/// Nametable mirroring arrangement. The cartridge header supplies the
/// initial value; MMC1 and MMC3 reprogram it at runtime (except in the
/// four-screen case, which is wired on the board).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

/// Per-mapper register state.
#[derive(Debug)]
pub enum MapperKind {
    Nrom,
    Cnrom(Cnrom),
    Mmc1(Mmc1),
    Mmc3(Mmc3),
}

#[derive(Debug)]
pub struct Mapper {
    pub(crate) kind: MapperKind,

    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,

    // PRG ROM window geometry: banks[(addr >> shift) & max] + (addr & mask).
    prg_banks: [usize; 4],
    prg_bank_shift: u32,
    prg_bank_mask: u16,
    prg_bank_max: u16,

    // Eight 1 KiB CHR slots.
    chr_banks: [usize; 8],

    prg_ram_enabled: bool,
    prg_ram_write_protected: bool,

    mirroring: Mirroring,
    four_screen: bool,

    irq_pending: bool,
}

impl Mapper {
    pub(crate) fn with_kind(
        kind: MapperKind,
        prg_rom: Vec<u8>,
        prg_ram: Vec<u8>,
        chr: Vec<u8>,
        chr_writable: bool,
        mirroring: Mirroring,
    ) -> Self {
        let mut m = Self {
            kind,
            prg_rom,
            prg_ram,
            chr,
            chr_writable,
            prg_banks: [0; 4],
            prg_bank_shift: 14,
            prg_bank_mask: 0x3FFF,
            prg_bank_max: 1,
            chr_banks: [0; 8],
            prg_ram_enabled: false,
            prg_ram_write_protected: false,
            mirroring,
            four_screen: mirroring == Mirroring::FourScreen,
            irq_pending: false,
        };
        // Identity CHR mapping until the mapper programs the slots.
        for (i, slot) in m.chr_banks.iter_mut().enumerate() {
            *slot = i * CHR_BANK_SIZE;
        }
        m.power_on();
        m
    }

    /// Mapper-specific power-on bank configuration.
    fn power_on(&mut self) {
        // The register file is detached during dispatch so the per-mapper
        // code can borrow the bank helpers on `self`.
        let mut kind = std::mem::replace(&mut self.kind, MapperKind::Nrom);
        match &mut kind {
            MapperKind::Nrom => crate::mappers::nrom::power_on(self),
            MapperKind::Cnrom(k) => crate::mappers::cnrom::power_on(self, k),
            MapperKind::Mmc1(k) => crate::mappers::mmc1::power_on(self, k),
            MapperKind::Mmc3(k) => crate::mappers::mmc3::power_on(self, k),
        }
        self.kind = kind;
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            MapperKind::Nrom => "NROM",
            MapperKind::Cnrom(_) => "CNROM",
            MapperKind::Mmc1(_) => "MMC1",
            MapperKind::Mmc3(_) => "MMC3",
        }
    }

    // ---------------------------------------------------------------------
    // Generic bank plumbing (used by the per-mapper modules)
    // ---------------------------------------------------------------------

    /// Configure the PRG window geometry: `bank_size` is 0x4000 (two
    /// slots) or 0x2000 (four slots).
    pub(crate) fn set_prg_geometry(&mut self, bank_size: usize) {
        match bank_size {
            0x4000 => {
                self.prg_bank_shift = 14;
                self.prg_bank_mask = 0x3FFF;
                self.prg_bank_max = 1;
            }
            0x2000 => {
                self.prg_bank_shift = 13;
                self.prg_bank_mask = 0x1FFF;
                self.prg_bank_max = 3;
            }
            other => unreachable!("unsupported PRG bank size {other:#x}"),
        }
    }

    /// Number of PRG banks at the current geometry.
    pub(crate) fn prg_bank_count(&self) -> usize {
        (self.prg_rom.len() >> self.prg_bank_shift).max(1)
    }

    /// Point PRG slot `slot` at bank number `bank` (wrapped to the ROM).
    pub(crate) fn set_prg_bank(&mut self, slot: usize, bank: usize) {
        let bank = bank % self.prg_bank_count();
        self.prg_banks[slot] = bank << self.prg_bank_shift;
    }

    /// Number of 1 KiB CHR banks.
    pub(crate) fn chr_bank_count(&self) -> usize {
        (self.chr.len() / CHR_BANK_SIZE).max(1)
    }

    /// Point 1 KiB CHR slot `slot` at 1 KiB bank number `bank`.
    pub(crate) fn set_chr_bank(&mut self, slot: usize, bank: usize) {
        let bank = bank % self.chr_bank_count();
        self.chr_banks[slot & 7] = bank * CHR_BANK_SIZE;
    }

    pub(crate) fn set_mirroring(&mut self, mirroring: Mirroring) {
        if !self.four_screen {
            self.mirroring = mirroring;
        }
    }

    pub(crate) fn set_prg_ram(&mut self, enabled: bool, write_protected: bool) {
        self.prg_ram_enabled = enabled;
        self.prg_ram_write_protected = write_protected;
    }

    pub(crate) fn raise_irq(&mut self) {
        self.irq_pending = true;
    }

    pub(crate) fn ack_irq(&mut self) {
        self.irq_pending = false;
    }

    // ---------------------------------------------------------------------
    // CPU-facing interface
    // ---------------------------------------------------------------------

    /// Read from the PRG ROM window ($8000-$FFFF).
    #[inline]
    pub fn load_prg(&self, addr: u16) -> u8 {
        debug_assert!(addr >= PRG_WINDOW);
        let slot = ((addr >> self.prg_bank_shift) & self.prg_bank_max) as usize;
        let offset = self.prg_banks[slot] + (addr & self.prg_bank_mask) as usize;
        self.prg_rom[offset % self.prg_rom.len().max(1)]
    }

    /// CPU write in $8000-$FFFF: reconfigure banks per mapper.
    pub fn store_prg(&mut self, addr: u16, val: u8) {
        let mut kind = std::mem::replace(&mut self.kind, MapperKind::Nrom);
        match &mut kind {
            MapperKind::Nrom => {}
            MapperKind::Cnrom(k) => crate::mappers::cnrom::store_prg(self, k, addr, val),
            MapperKind::Mmc1(k) => crate::mappers::mmc1::store_prg(self, k, addr, val),
            MapperKind::Mmc3(k) => crate::mappers::mmc3::store_prg(self, k, addr, val),
        }
        self.kind = kind;
    }

    /// Read from the PRG RAM window ($6000-$7FFF). Disabled RAM reads as
    /// open bus (0).
    #[inline]
    pub fn load_ram(&self, addr: u16) -> u8 {
        if !self.prg_ram_enabled || self.prg_ram.is_empty() {
            return 0;
        }
        self.prg_ram[(addr as usize & 0x1FFF) % self.prg_ram.len()]
    }

    /// Write to the PRG RAM window, honoring enable and write protection.
    #[inline]
    pub fn store_ram(&mut self, addr: u16, val: u8) {
        if !self.prg_ram_enabled || self.prg_ram_write_protected || self.prg_ram.is_empty() {
            return;
        }
        let len = self.prg_ram.len();
        self.prg_ram[(addr as usize & 0x1FFF) % len] = val;
    }

    // ---------------------------------------------------------------------
    // PPU-facing interface
    // ---------------------------------------------------------------------

    /// Pattern table read ($0000-$1FFF of PPU space) through the CHR banks.
    #[inline]
    pub fn load_chr(&self, addr: u16) -> u8 {
        let addr = addr as usize & 0x1FFF;
        let offset = self.chr_banks[addr / CHR_BANK_SIZE] + (addr & (CHR_BANK_SIZE - 1));
        self.chr[offset % self.chr.len().max(1)]
    }

    /// Pattern table write; only effective when CHR is RAM.
    #[inline]
    pub fn store_chr(&mut self, addr: u16, val: u8) {
        if !self.chr_writable {
            return;
        }
        let addr = addr as usize & 0x1FFF;
        let offset = self.chr_banks[addr / CHR_BANK_SIZE] + (addr & (CHR_BANK_SIZE - 1));
        let len = self.chr.len();
        if len > 0 {
            self.chr[offset % len] = val;
        }
    }

    /// Scanline notification from the PPU (dot 260 of visible scanlines
    /// while rendering). Drives the MMC3 IRQ counter.
    pub fn notify_scanline(&mut self) {
        let mut kind = std::mem::replace(&mut self.kind, MapperKind::Nrom);
        if let MapperKind::Mmc3(k) = &mut kind {
            crate::mappers::mmc3::notify_scanline(self, k);
        }
        self.kind = kind;
    }

    /// Take the pending IRQ pulse, clearing it.
    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending)
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}
