/*!
CPU address space.

Routes 16-bit CPU addresses to their devices:

```text
$0000-$1FFF  2 KiB internal RAM, mirrored every $0800
$2000-$3FFF  PPU registers, mirrored every 8 bytes
$4014        OAM DMA trigger
$4016        controller strobe/serial port
$4000-$4013, $4015, $4017  APU/reserved: open-bus reads, writes ignored
$4020-$5FFF  open bus
$6000-$7FFF  PRG RAM through the mapper (enable/write-protect applies)
$8000-$FFFF  PRG ROM through the mapper bank pointers
```

`load` carries the PPU register read side effects; `store` threads the CPU
cycle counter so OAM DMA can force a PPU catch-up and account its stall.
Unmapped reads return 0 (real hardware would float the last bus value).
*/

use std::cell::RefCell;
use std::rc::Rc;

use crate::cartridge::Cartridge;
use crate::controller::Controller;
use crate::mapper::Mapper;
use crate::ppu::Ppu;

const OAMDMA_ADDR: u16 = 0x4014;
const JOYPAD1_ADDR: u16 = 0x4016;

/// Internal CPU RAM. The 256-byte alignment is required by the
/// recompiler: compiled stack code wraps SP by adjusting only the low
/// byte of a host pointer into page 1, which is only correct when the
/// page base is 256-aligned.
#[repr(C, align(256))]
pub struct Ram {
    bytes: [u8; 0x800],
}

impl Ram {
    fn new() -> Self {
        Self { bytes: [0; 0x800] }
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.bytes[(addr & 0x7FF) as usize]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, val: u8) {
        self.bytes[(addr & 0x7FF) as usize] = val;
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }
}

pub struct Bus {
    pub ram: Ram,
    pub ppu: Ppu,
    pub controller: Controller,
    cartridge: Cartridge,
    mapper: Rc<RefCell<Mapper>>,
}

impl Bus {
    pub fn new(cartridge: Cartridge) -> Self {
        let mapper = Rc::clone(&cartridge.mapper);
        let ppu = Ppu::new(Rc::clone(&mapper));
        Self {
            ram: Ram::new(),
            ppu,
            controller: Controller::new(),
            cartridge,
            mapper,
        }
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn mapper(&self) -> &Rc<RefCell<Mapper>> {
        &self.mapper
    }

    /// Load a byte from the CPU address space. PPU register reads have
    /// side effects ($2002 clears vblank and the write toggle, $2004 and
    /// $2007 advance internal pointers).
    pub fn load(&mut self, addr: u16) -> u8 {
        if addr >= 0x8000 {
            self.mapper.borrow().load_prg(addr)
        } else if addr < 0x2000 {
            self.ram.read(addr)
        } else if addr < 0x4000 {
            self.ppu.read_register(addr)
        } else if addr == JOYPAD1_ADDR {
            self.controller.read_register()
        } else if addr < 0x6000 {
            // APU/reserved and the expansion range: open bus.
            0
        } else {
            self.mapper.borrow().load_ram(addr)
        }
    }

    /// Store a byte into the CPU address space. `cycles` is the CPU cycle
    /// counter; a write to $4014 advances it by the DMA stall.
    pub fn store(&mut self, addr: u16, val: u8, cycles: &mut u64) {
        if addr < 0x2000 {
            self.ram.write(addr, val);
        } else if addr >= 0x8000 {
            self.mapper.borrow_mut().store_prg(addr, val);
        } else if addr < 0x4000 {
            self.ppu.write_register(addr, val);
        } else if addr == JOYPAD1_ADDR {
            self.controller.write_register(val);
        } else if addr == OAMDMA_ADDR {
            self.oam_dma(val, cycles);
        } else if addr < 0x6000 {
            // APU/reserved and expansion: ignored.
        } else {
            self.mapper.borrow_mut().store_ram(addr, val);
        }
    }

    /// Side-effect-free read, used for vector fetches, block discovery and
    /// disassembly. PPU and I/O registers read as 0 here.
    pub fn peek(&self, addr: u16) -> u8 {
        if addr >= 0x8000 {
            self.mapper.borrow().load_prg(addr)
        } else if addr < 0x2000 {
            self.ram.read(addr)
        } else if addr >= 0x6000 {
            self.mapper.borrow().load_ram(addr)
        } else {
            0
        }
    }

    /// Little-endian word peek.
    pub fn peek_word(&self, addr: u16) -> u16 {
        let lo = self.peek(addr) as u16;
        let hi = self.peek(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// OAM DMA: copy 256 bytes from page `val << 8` into PPU OAM.
    ///
    /// The PPU is synchronized first so OAM lands in a state consistent
    /// with the CPU's view, then the CPU is stalled 513 cycles (514 when
    /// the transfer starts on an odd cycle).
    fn oam_dma(&mut self, val: u8, cycles: &mut u64) {
        self.ppu.sync(*cycles);
        let page = (val as u16) << 8;
        for offset in 0..0x100 {
            let byte = self.load(page + offset);
            self.ppu.dma_transfer(byte);
        }
        *cycles += 513 + (*cycles & 1);
    }
}
