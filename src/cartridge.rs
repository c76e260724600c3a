/*!
Cartridge: iNES (v1) loader and mapper construction.

Layout of an iNES image:
- 16-byte header (magic, PRG/CHR unit counts, flags 6/7, PRG-RAM units)
- optional 512-byte trainer (skipped)
- PRG ROM banks (16 KiB units)
- CHR ROM banks (8 KiB units); a missing CHR ROM implies 8 KiB of CHR RAM

Notes:
- A PRG-RAM unit count of 0 means one 8 KiB bank by convention.
- NES 2.0 images are detected and rejected.
- The mapper is shared as `Rc<RefCell<_>>` between the CPU bus and the PPU:
  the bus routes PRG traffic and register writes, the PPU reads pattern
  data and clocks the MMC3 scanline counter.
*/

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::info;

use crate::error::LoadError;
use crate::mapper::{Mapper, MapperKind, Mirroring};
use crate::mappers::{Cnrom, Mmc1, Mmc3};

pub struct Cartridge {
    pub mapper: Rc<RefCell<Mapper>>,

    mapper_id: u8,
    mirroring: Mirroring,
    battery: bool,
    prg_rom_len: usize,
    chr_len: usize,
    chr_is_ram: bool,
    prg_ram_len: usize,
}

impl std::fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cartridge")
            .field("mapper_id", &self.mapper_id)
            .field("mirroring", &self.mirroring)
            .field("battery", &self.battery)
            .field("prg_rom_len", &self.prg_rom_len)
            .field("chr_len", &self.chr_len)
            .field("chr_is_ram", &self.chr_is_ram)
            .field("prg_ram_len", &self.prg_ram_len)
            .finish()
    }
}

impl Cartridge {
    /// Parse an iNES image and construct the mapper.
    pub fn from_ines_bytes(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < 16 {
            return Err(LoadError::Truncated { what: "header" });
        }
        if &data[0..4] != b"NES\x1A" {
            return Err(LoadError::BadMagic);
        }

        let prg_units = data[4] as usize;
        let chr_units = data[5] as usize;
        let flags6 = data[6];
        let flags7 = data[7];
        // Zero PRG-RAM units means one bank by convention.
        let prg_ram_units = match data[8] {
            0 => 1,
            n => n as usize,
        };

        // NES 2.0 if bits 2-3 of flags 7 read 0b10.
        if flags7 & 0x0C == 0x08 {
            return Err(LoadError::Ines2Unsupported);
        }

        let mapper_id = (flags7 & 0xF0) | (flags6 >> 4);
        let four_screen = flags6 & 0b0000_1000 != 0;
        let vertical = flags6 & 0b0000_0001 != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if vertical {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let battery = flags6 & 0b0000_0010 != 0;
        let has_trainer = flags6 & 0b0000_0100 != 0;

        info!(
            "iNES header: prg={prg_units}x16K chr={chr_units}x8K mapper={mapper_id} \
             mirroring={mirroring:?} battery={battery}"
        );

        let mut offset = 16;
        if has_trainer {
            if data.len() < offset + 512 {
                return Err(LoadError::Truncated { what: "trainer" });
            }
            offset += 512;
        }

        let prg_rom_len = prg_units * 0x4000;
        if data.len() < offset + prg_rom_len {
            return Err(LoadError::Truncated { what: "PRG ROM" });
        }
        let prg_rom = data[offset..offset + prg_rom_len].to_vec();
        offset += prg_rom_len;

        let (chr, chr_is_ram) = if chr_units == 0 {
            (vec![0u8; 0x2000], true)
        } else {
            let chr_len = chr_units * 0x2000;
            if data.len() < offset + chr_len {
                return Err(LoadError::Truncated { what: "CHR ROM" });
            }
            (data[offset..offset + chr_len].to_vec(), false)
        };
        let chr_len = chr.len();

        let prg_ram_len = prg_ram_units * 0x2000;
        let prg_ram = vec![0u8; prg_ram_len];

        let kind = match mapper_id {
            0 => MapperKind::Nrom,
            1 => MapperKind::Mmc1(Mmc1::default()),
            3 => MapperKind::Cnrom(Cnrom::default()),
            4 => MapperKind::Mmc3(Mmc3::default()),
            other => return Err(LoadError::UnsupportedMapper(other)),
        };
        let mapper = Mapper::with_kind(kind, prg_rom, prg_ram, chr, chr_is_ram, mirroring);
        info!("selected mapper {} ({})", mapper_id, mapper.name());

        Ok(Self {
            mapper: Rc::new(RefCell::new(mapper)),
            mapper_id,
            mirroring,
            battery,
            prg_rom_len,
            chr_len,
            chr_is_ram,
            prg_ram_len,
        })
    }

    /// Load a cartridge from an iNES file (.nes).
    pub fn from_ines_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let bytes = fs::read(path)?;
        Self::from_ines_bytes(&bytes)
    }

    pub fn mapper_id(&self) -> u8 {
        self.mapper_id
    }

    /// Header mirroring (the mapper may override it at runtime).
    pub fn header_mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn battery_backed(&self) -> bool {
        self.battery
    }

    pub fn prg_rom_len(&self) -> usize {
        self.prg_rom_len
    }

    pub fn chr_len(&self) -> usize {
        self.chr_len
    }

    pub fn chr_is_ram(&self) -> bool {
        self.chr_is_ram
    }

    pub fn prg_ram_len(&self) -> usize {
        self.prg_ram_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_ines;

    #[test]
    fn parse_simple_nrom_32k_chr8k() {
        let flags6 = 0b0000_0001; // vertical mirroring
        let data = build_ines(2, 1, flags6, 0, 1, None);
        let cart = Cartridge::from_ines_bytes(&data).expect("parse");

        assert_eq!(cart.mapper_id(), 0);
        assert_eq!(cart.header_mirroring(), Mirroring::Vertical);
        assert_eq!(cart.prg_rom_len(), 32 * 1024);
        assert_eq!(cart.chr_len(), 8 * 1024);
        assert!(!cart.chr_is_ram());

        // Pattern-filled PRG from the builder maps through at both ends.
        assert_eq!(cart.mapper.borrow().load_prg(0x8000), 0xAA);
        assert_eq!(cart.mapper.borrow().load_prg(0xFFFF), 0xAA);
    }

    #[test]
    fn missing_chr_becomes_chr_ram() {
        let data = build_ines(1, 0, 0, 0, 0, None);
        let cart = Cartridge::from_ines_bytes(&data).expect("parse");
        assert!(cart.chr_is_ram());
        assert_eq!(cart.chr_len(), 8 * 1024);
        // PRG-RAM unit count 0 still allocates one bank.
        assert_eq!(cart.prg_ram_len(), 8 * 1024);
    }

    #[test]
    fn trainer_moves_data_offset() {
        let trainer = [0x55u8; 512];
        let flags6 = 0b0000_0100;
        let data = build_ines(1, 1, flags6, 0, 1, Some(&trainer));
        let cart = Cartridge::from_ines_bytes(&data).expect("parse");
        assert_eq!(cart.mapper_id(), 0);
        // The trainer is skipped, not mapped: PRG still reads its pattern.
        assert_eq!(cart.mapper.borrow().load_prg(0x8000), 0xAA);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut data = build_ines(1, 1, 0, 0, 1, None);
        data[0] = b'X';
        assert!(matches!(
            Cartridge::from_ines_bytes(&data),
            Err(LoadError::BadMagic)
        ));
    }

    #[test]
    fn ines2_rejected() {
        let data = build_ines(1, 1, 0, 0b0000_1000, 1, None);
        assert!(matches!(
            Cartridge::from_ines_bytes(&data),
            Err(LoadError::Ines2Unsupported)
        ));
    }

    #[test]
    fn unsupported_mapper_rejected() {
        // Mapper 2 (UNROM) low nibble in flags 6.
        let data = build_ines(1, 1, 0b0010_0000, 0, 1, None);
        assert!(matches!(
            Cartridge::from_ines_bytes(&data),
            Err(LoadError::UnsupportedMapper(2))
        ));
    }

    #[test]
    fn truncated_prg_rejected() {
        let mut data = build_ines(2, 1, 0, 0, 1, None);
        data.truncate(16 + 1000);
        assert!(matches!(
            Cartridge::from_ines_bytes(&data),
            Err(LoadError::Truncated { .. })
        ));
    }
}
