/*!
Addressing mode resolution for the interpreter.

`resolve` consumes the operand bytes at PC and produces either an immediate
value, the accumulator, or an effective address annotated with page-cross
information. Two hardware quirks live here:

- Zero-page pointer arithmetic wraps within page zero: `LDA ($FF,X)` reads
  the pointer high byte from $00, not $100.
- Indexed modes report both whether the index addition crossed a page and
  the partially-computed address `(base & $FF00) | (eff & $FF)` that the
  hardware touches on a crossing (the "oops" dummy read).

`JMP (ind)` with its page-boundary bug is handled by the interpreter's JMP
path, and branch offsets by its branch path; neither goes through here.
*/

use crate::bus::Bus;
use crate::cpu::opcodes::AddrMode;
use crate::cpu::state::CpuState;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    None,
    Accumulator,
    Immediate(u8),
    Address {
        addr: u16,
        /// The indexed address computation crossed a page.
        crossed: bool,
        /// Partially-computed address the hardware reads on a crossing.
        partial: u16,
    },
}

impl Operand {
    /// Effective address of a memory operand.
    pub fn address(self) -> u16 {
        match self {
            Operand::Address { addr, .. } => addr,
            _ => unreachable!("operand has no address"),
        }
    }
}

#[inline]
fn fetch(state: &mut CpuState, bus: &mut Bus) -> u8 {
    let b = bus.load(state.pc);
    state.pc = state.pc.wrapping_add(1);
    b
}

#[inline]
fn fetch_word(state: &mut CpuState, bus: &mut Bus) -> u16 {
    let lo = fetch(state, bus) as u16;
    let hi = fetch(state, bus) as u16;
    (hi << 8) | lo
}

/// Read a pointer from the zero page, wrapping the high-byte fetch.
#[inline]
pub fn load_zero_page_word(bus: &mut Bus, ptr: u8) -> u16 {
    let lo = bus.load(ptr as u16) as u16;
    let hi = bus.load(ptr.wrapping_add(1) as u16) as u16;
    (hi << 8) | lo
}

#[inline]
fn indexed(base: u16, index: u8) -> Operand {
    let addr = base.wrapping_add(index as u16);
    Operand::Address {
        addr,
        crossed: (base ^ addr) & 0xFF00 != 0,
        partial: (base & 0xFF00) | (addr & 0x00FF),
    }
}

/// Resolve the operand for `mode`, advancing PC past the operand bytes.
pub fn resolve(state: &mut CpuState, bus: &mut Bus, mode: AddrMode) -> Operand {
    match mode {
        AddrMode::Imp => Operand::None,
        AddrMode::Acc => Operand::Accumulator,
        AddrMode::Imm => Operand::Immediate(fetch(state, bus)),

        AddrMode::Zpg => {
            let addr = fetch(state, bus) as u16;
            Operand::Address {
                addr,
                crossed: false,
                partial: addr,
            }
        }
        AddrMode::Zpx => {
            let addr = fetch(state, bus).wrapping_add(state.x) as u16;
            Operand::Address {
                addr,
                crossed: false,
                partial: addr,
            }
        }
        AddrMode::Zpy => {
            let addr = fetch(state, bus).wrapping_add(state.y) as u16;
            Operand::Address {
                addr,
                crossed: false,
                partial: addr,
            }
        }

        AddrMode::Abs => {
            let addr = fetch_word(state, bus);
            Operand::Address {
                addr,
                crossed: false,
                partial: addr,
            }
        }
        AddrMode::Abx => {
            let base = fetch_word(state, bus);
            indexed(base, state.x)
        }
        AddrMode::Aby => {
            let base = fetch_word(state, bus);
            indexed(base, state.y)
        }

        AddrMode::Inx => {
            let ptr = fetch(state, bus).wrapping_add(state.x);
            let addr = load_zero_page_word(bus, ptr);
            Operand::Address {
                addr,
                crossed: false,
                partial: addr,
            }
        }
        AddrMode::Iny => {
            let ptr = fetch(state, bus);
            let base = load_zero_page_word(bus, ptr);
            indexed(base, state.y)
        }

        // REL and IND are consumed by the branch and JMP paths.
        AddrMode::Rel | AddrMode::Ind => unreachable!("mode resolved by the dispatcher"),
    }
}
