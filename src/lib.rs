#![doc = r#"
Famicore library crate.

Execution core of a cycle-accurate NES emulator: a 6502 interpreter, an
x86-64 dynamic recompiler with a block cache, and the CPU/PPU
co-scheduler, plus the collaborators needed to actually run cartridges.

Modules:
- machine: the co-scheduler loop; owns every subsystem, no globals
- bus: CPU address space (RAM mirroring, PPU registers, OAM DMA, mapper)
- cpu: 6502 state, descriptor table, interpreter, trace ring
- jit: block recompiler (x86-64 unix hosts; elsewhere interpreter-only)
- ppu: picture processor peer (registers, timing, scanline renderer)
- cartridge: iNES v1 loader
- mapper / mappers: NROM, MMC1, CNROM, MMC3 as a tagged variant
- controller: strobe/serial joypad on $4016
- events: cross-thread pause/quit flags
- error: load-time and runtime fault types

In tests, shared iNES builders are available under `crate::test_utils`.
"#]

pub mod bus;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod events;
pub mod machine;
pub mod mapper;
pub mod mappers;
pub mod ppu;

#[cfg(all(target_arch = "x86_64", unix))]
pub mod jit;

// Re-export commonly used types at the crate root for convenience.
pub use bus::Bus;
pub use cartridge::Cartridge;
pub use cpu::CpuState;
pub use error::{EmuError, LoadError};
pub use events::Events;
pub use machine::Machine;

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
