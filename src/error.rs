/*!
Error types shared across the emulator core.

Two families:
- `LoadError`: cartridge parsing / startup failures. These abort before the
  emulation loop starts and map to a nonzero process exit.
- `EmuError`: faults raised while emulating (interpreter or recompiler).
  The scheduler catches these at the loop boundary, logs a backtrace of the
  last executed instructions, signals quit and shuts down in order.
*/

use thiserror::Error;

/// Startup-time cartridge/ROM failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read cartridge file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid iNES header magic (expected NES<1A>)")]
    BadMagic,

    #[error("iNES image truncated: {what}")]
    Truncated { what: &'static str },

    #[error("NES 2.0 format is not supported")]
    Ines2Unsupported,

    #[error("unsupported mapper id: {0}")]
    UnsupportedMapper(u8),
}

/// Runtime emulation faults. All of these are fatal to the emulation loop.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EmuError {
    /// Opcode present in the instruction matrix but deliberately not
    /// implemented (analog-unstable undocumented instructions).
    #[error("unsupported instruction {opcode:#04x} at {pc:#06x}")]
    UnsupportedInstruction { opcode: u8, pc: u16 },

    /// KIL family opcode: the hardware would hang until reset.
    #[error("jamming instruction {opcode:#04x} at {pc:#06x}")]
    JammingInstruction { opcode: u8, pc: u16 },

    /// The recompiler's code buffer is exhausted. There is no eviction
    /// policy; this is fatal by design.
    #[error("recompiler code buffer exhausted")]
    CodeBufferFull,
}
