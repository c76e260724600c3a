/*!
Cycle-accurate 6502 interpreter.

`step` fetches, decodes via the descriptor table, executes one instruction
with its side effects, and advances PC, P, the registers and the cycle
counter. The timing edge cases are all here:

- oops cycle plus dummy read on page-crossing indexed reads,
- read-modify-write double write-back (old value first) with the extra
  cycle folded into the table,
- branch timing: +1 taken, +2 taken across a page,
- `JMP ($xxFF)` fetching its high byte from `$xx00`,
- interrupt-style BRK entry (B set on the pushed status).

The KIL family raises `JammingInstruction`; the analog-unstable
undocumented opcodes (ANE, SHA, SHS, SHX, SHY, LAS) raise
`UnsupportedInstruction`. The remaining undocumented matrix (LAX, SAX,
DCP, ISB, SLO, SRE, RLA, RRA, AAC, ASR, ARR, ATX, AXS, the NOP variants
and SBC $EB) is implemented.
*/

use crate::bus::Bus;
use crate::cpu::addressing::{Operand, resolve};
use crate::cpu::opcodes::{AddrMode, Mnemonic, OPCODES, page_cross_penalty};
use crate::cpu::state::{
    BREAK, CARRY, CpuState, IRQ_DISABLE, IRQ_VECTOR, NEGATIVE, OVERFLOW, UNUSED, ZERO,
};
use crate::cpu::trace::{TraceBuffer, TraceEntry};
use crate::error::EmuError;

/// Execute one instruction.
pub fn step(state: &mut CpuState, bus: &mut Bus, trace: &mut TraceBuffer) -> Result<(), EmuError> {
    let pc0 = state.pc;
    let opcode = bus.load(pc0);
    let descr = &OPCODES[opcode as usize];

    trace.record(TraceEntry::capture(
        state,
        opcode,
        bus.peek(pc0.wrapping_add(1)),
        bus.peek(pc0.wrapping_add(2)),
    ));

    if descr.jam {
        return Err(EmuError::JammingInstruction { opcode, pc: pc0 });
    }

    use Mnemonic::*;
    if matches!(descr.mnemonic, Ane | Sha | Shs | Shx | Shy | Las) {
        return Err(EmuError::UnsupportedInstruction { opcode, pc: pc0 });
    }

    state.pc = state.pc.wrapping_add(1);
    let mut cycles = descr.cycles as u64;

    match descr.mnemonic {
        // ----------------------------------------------------------------
        // Control transfers
        // ----------------------------------------------------------------
        Brk => {
            // BRK pushes the address after its signature byte, with B set.
            let ret = state.pc.wrapping_add(1);
            state.push_word(bus, ret);
            let status = state.status_for_push(true);
            state.push(bus, status);
            state.p |= IRQ_DISABLE;
            state.pc = bus.peek_word(IRQ_VECTOR);
        }
        Jmp => {
            let target = fetch_word(state, bus);
            state.pc = if descr.mode == AddrMode::Ind {
                // Page-boundary bug: the pointer high byte wraps within
                // the pointer's page.
                let lo = bus.load(target) as u16;
                let hi_addr = (target & 0xFF00) | (target.wrapping_add(1) & 0x00FF);
                let hi = bus.load(hi_addr) as u16;
                (hi << 8) | lo
            } else {
                target
            };
        }
        Jsr => {
            let target = fetch_word(state, bus);
            let ret = state.pc.wrapping_sub(1);
            state.push_word(bus, ret);
            state.pc = target;
        }
        Rts => {
            state.pc = state.pull_word(bus).wrapping_add(1);
        }
        Rti => {
            let p = state.pull(bus);
            state.p = (p & !BREAK) | UNUSED;
            state.pc = state.pull_word(bus);
        }

        // ----------------------------------------------------------------
        // Branches
        // ----------------------------------------------------------------
        Bcc => cycles += branch(state, bus, !state.flag(CARRY)),
        Bcs => cycles += branch(state, bus, state.flag(CARRY)),
        Bne => cycles += branch(state, bus, !state.flag(ZERO)),
        Beq => cycles += branch(state, bus, state.flag(ZERO)),
        Bpl => cycles += branch(state, bus, !state.flag(NEGATIVE)),
        Bmi => cycles += branch(state, bus, state.flag(NEGATIVE)),
        Bvc => cycles += branch(state, bus, !state.flag(OVERFLOW)),
        Bvs => cycles += branch(state, bus, state.flag(OVERFLOW)),

        // ----------------------------------------------------------------
        // Loads and stores
        // ----------------------------------------------------------------
        Lda => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a = m;
            state.update_zn(m);
        }
        Ldx => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.x = m;
            state.update_zn(m);
        }
        Ldy => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.y = m;
            state.update_zn(m);
        }
        Lax => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a = m;
            state.x = m;
            state.update_zn(m);
        }
        Sta => {
            let addr = resolve(state, bus, descr.mode).address();
            let a = state.a;
            bus.store(addr, a, &mut state.cycles);
        }
        Stx => {
            let addr = resolve(state, bus, descr.mode).address();
            let x = state.x;
            bus.store(addr, x, &mut state.cycles);
        }
        Sty => {
            let addr = resolve(state, bus, descr.mode).address();
            let y = state.y;
            bus.store(addr, y, &mut state.cycles);
        }
        Sax => {
            let addr = resolve(state, bus, descr.mode).address();
            let v = state.a & state.x;
            bus.store(addr, v, &mut state.cycles);
        }

        // ----------------------------------------------------------------
        // Arithmetic and logic
        // ----------------------------------------------------------------
        Adc => {
            let m = read_operand(state, bus, descr, &mut cycles);
            adc(state, m);
        }
        Sbc => {
            let m = read_operand(state, bus, descr, &mut cycles);
            adc(state, !m);
        }
        And => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a &= m;
            let a = state.a;
            state.update_zn(a);
        }
        Ora => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a |= m;
            let a = state.a;
            state.update_zn(a);
        }
        Eor => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a ^= m;
            let a = state.a;
            state.update_zn(a);
        }
        Cmp => {
            let m = read_operand(state, bus, descr, &mut cycles);
            compare(state, state.a, m);
        }
        Cpx => {
            let m = read_operand(state, bus, descr, &mut cycles);
            compare(state, state.x, m);
        }
        Cpy => {
            let m = read_operand(state, bus, descr, &mut cycles);
            compare(state, state.y, m);
        }
        Bit => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.assign_flag(ZERO, state.a & m == 0);
            state.assign_flag(NEGATIVE, m & 0x80 != 0);
            state.assign_flag(OVERFLOW, m & 0x40 != 0);
        }

        // ----------------------------------------------------------------
        // Shifts, rotates and memory increments (read-modify-write)
        // ----------------------------------------------------------------
        Asl => rmw(state, bus, descr, asl),
        Lsr => rmw(state, bus, descr, lsr),
        Rol => rmw(state, bus, descr, rol),
        Ror => rmw(state, bus, descr, ror),
        Inc => rmw(state, bus, descr, |state, m| {
            let r = m.wrapping_add(1);
            state.update_zn(r);
            r
        }),
        Dec => rmw(state, bus, descr, |state, m| {
            let r = m.wrapping_sub(1);
            state.update_zn(r);
            r
        }),

        // Undocumented RMW compositions.
        Dcp => rmw(state, bus, descr, |state, m| {
            let r = m.wrapping_sub(1);
            compare(state, state.a, r);
            r
        }),
        Isb => rmw(state, bus, descr, |state, m| {
            let r = m.wrapping_add(1);
            adc(state, !r);
            r
        }),
        Slo => rmw(state, bus, descr, |state, m| {
            let r = asl(state, m);
            state.a |= r;
            let a = state.a;
            state.update_zn(a);
            r
        }),
        Sre => rmw(state, bus, descr, |state, m| {
            let r = lsr(state, m);
            state.a ^= r;
            let a = state.a;
            state.update_zn(a);
            r
        }),
        Rla => rmw(state, bus, descr, |state, m| {
            let r = rol(state, m);
            state.a &= r;
            let a = state.a;
            state.update_zn(a);
            r
        }),
        Rra => rmw(state, bus, descr, |state, m| {
            let r = ror(state, m);
            adc(state, r);
            r
        }),

        // ----------------------------------------------------------------
        // Register operations
        // ----------------------------------------------------------------
        Inx => {
            state.x = state.x.wrapping_add(1);
            let x = state.x;
            state.update_zn(x);
        }
        Iny => {
            state.y = state.y.wrapping_add(1);
            let y = state.y;
            state.update_zn(y);
        }
        Dex => {
            state.x = state.x.wrapping_sub(1);
            let x = state.x;
            state.update_zn(x);
        }
        Dey => {
            state.y = state.y.wrapping_sub(1);
            let y = state.y;
            state.update_zn(y);
        }
        Tax => {
            state.x = state.a;
            let x = state.x;
            state.update_zn(x);
        }
        Tay => {
            state.y = state.a;
            let y = state.y;
            state.update_zn(y);
        }
        Txa => {
            state.a = state.x;
            let a = state.a;
            state.update_zn(a);
        }
        Tya => {
            state.a = state.y;
            let a = state.a;
            state.update_zn(a);
        }
        Tsx => {
            state.x = state.sp;
            let x = state.x;
            state.update_zn(x);
        }
        Txs => state.sp = state.x,

        // ----------------------------------------------------------------
        // Stack and flags
        // ----------------------------------------------------------------
        Pha => {
            let a = state.a;
            state.push(bus, a);
        }
        Php => {
            let status = state.status_for_push(true);
            state.push(bus, status);
        }
        Pla => {
            state.a = state.pull(bus);
            let a = state.a;
            state.update_zn(a);
        }
        Plp => {
            let p = state.pull(bus);
            state.p = (p & !BREAK) | UNUSED;
        }
        Clc => state.assign_flag(CARRY, false),
        Sec => state.assign_flag(CARRY, true),
        Cli => state.p &= !IRQ_DISABLE,
        Sei => state.p |= IRQ_DISABLE,
        Cld => state.p &= !crate::cpu::state::DECIMAL,
        Sed => state.p |= crate::cpu::state::DECIMAL,
        Clv => state.assign_flag(OVERFLOW, false),

        // ----------------------------------------------------------------
        // NOP family: official and unofficial, with operand side effects
        // ----------------------------------------------------------------
        Nop => {
            if descr.mode != AddrMode::Imp {
                let _ = read_operand(state, bus, descr, &mut cycles);
            }
        }

        // ----------------------------------------------------------------
        // Immediate-mode undocumented opcodes
        // ----------------------------------------------------------------
        Aac => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a &= m;
            let a = state.a;
            state.update_zn(a);
            state.assign_flag(CARRY, a & 0x80 != 0);
        }
        Asr => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a &= m;
            let a = state.a;
            state.a = lsr(state, a);
        }
        Arr => {
            let m = read_operand(state, bus, descr, &mut cycles);
            let carry_in = state.flag(CARRY) as u8;
            let r = ((state.a & m) >> 1) | (carry_in << 7);
            state.a = r;
            state.update_zn(r);
            state.assign_flag(CARRY, r & 0x40 != 0);
            state.assign_flag(OVERFLOW, ((r >> 6) ^ (r >> 5)) & 1 != 0);
        }
        Atx => {
            let m = read_operand(state, bus, descr, &mut cycles);
            state.a = m;
            state.x = m;
            state.update_zn(m);
        }
        Axs => {
            let m = read_operand(state, bus, descr, &mut cycles);
            let t = state.a & state.x;
            state.assign_flag(CARRY, t >= m);
            state.x = t.wrapping_sub(m);
            let x = state.x;
            state.update_zn(x);
        }

        // Rejected above.
        Ane | Sha | Shs | Shx | Shy | Las | Kil => unreachable!(),
    }

    state.cycles += cycles;
    Ok(())
}

#[inline]
fn fetch_word(state: &mut CpuState, bus: &mut Bus) -> u16 {
    let lo = bus.load(state.pc) as u16;
    let hi = bus.load(state.pc.wrapping_add(1)) as u16;
    state.pc = state.pc.wrapping_add(2);
    (hi << 8) | lo
}

/// Read a memory/immediate operand, applying the oops cycle and its dummy
/// read on page-crossing indexed reads.
fn read_operand(
    state: &mut CpuState,
    bus: &mut Bus,
    descr: &crate::cpu::opcodes::Descriptor,
    cycles: &mut u64,
) -> u8 {
    match resolve(state, bus, descr.mode) {
        Operand::Immediate(v) => v,
        Operand::Accumulator => state.a,
        Operand::Address {
            addr,
            crossed,
            partial,
        } => {
            if crossed && page_cross_penalty(descr.mnemonic) {
                let _ = bus.load(partial);
                *cycles += 1;
            }
            bus.load(addr)
        }
        Operand::None => unreachable!("memory operand expected"),
    }
}

/// Read-modify-write: old value is written back before the modified one.
fn rmw(
    state: &mut CpuState,
    bus: &mut Bus,
    descr: &crate::cpu::opcodes::Descriptor,
    op: impl FnOnce(&mut CpuState, u8) -> u8,
) {
    match resolve(state, bus, descr.mode) {
        Operand::Accumulator => {
            let a = state.a;
            state.a = op(state, a);
        }
        operand => {
            let addr = operand.address();
            let old = bus.load(addr);
            bus.store(addr, old, &mut state.cycles);
            let new = op(state, old);
            bus.store(addr, new, &mut state.cycles);
        }
    }
}

/// Shared branch path: consumes the displacement, returns the extra
/// cycles (0 not taken, 1 taken, 2 taken across a page boundary).
fn branch(state: &mut CpuState, bus: &mut Bus, taken: bool) -> u64 {
    let offset = bus.load(state.pc) as i8;
    state.pc = state.pc.wrapping_add(1);
    if !taken {
        return 0;
    }
    let base = state.pc;
    let target = base.wrapping_add(offset as u16);
    state.pc = target;
    if (base ^ target) & 0xFF00 != 0 { 2 } else { 1 }
}

/// Add with carry; also implements SBC via the complemented operand.
/// Decimal mode is ignored on this CPU variant.
fn adc(state: &mut CpuState, m: u8) {
    let a = state.a;
    let carry = state.flag(CARRY) as u16;
    let sum = a as u16 + m as u16 + carry;
    let r = sum as u8;
    state.assign_flag(CARRY, sum > 0xFF);
    state.assign_flag(OVERFLOW, (a ^ r) & (m ^ r) & 0x80 != 0);
    state.a = r;
    state.update_zn(r);
}

fn compare(state: &mut CpuState, reg: u8, m: u8) {
    let r = reg.wrapping_sub(m);
    state.assign_flag(CARRY, reg >= m);
    state.update_zn(r);
}

fn asl(state: &mut CpuState, m: u8) -> u8 {
    let r = m << 1;
    state.assign_flag(CARRY, m & 0x80 != 0);
    state.update_zn(r);
    r
}

fn lsr(state: &mut CpuState, m: u8) -> u8 {
    let r = m >> 1;
    state.assign_flag(CARRY, m & 0x01 != 0);
    state.update_zn(r);
    r
}

fn rol(state: &mut CpuState, m: u8) -> u8 {
    let r = (m << 1) | state.flag(CARRY) as u8;
    state.assign_flag(CARRY, m & 0x80 != 0);
    state.update_zn(r);
    r
}

fn ror(state: &mut CpuState, m: u8) -> u8 {
    let r = (m >> 1) | ((state.flag(CARRY) as u8) << 7);
    state.assign_flag(CARRY, m & 0x01 != 0);
    state.update_zn(r);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::test_utils::build_nrom_with_prg;

    struct Fixture {
        state: CpuState,
        bus: Bus,
        trace: TraceBuffer,
    }

    impl Fixture {
        fn new(prg: &[u8]) -> Self {
            let rom = build_nrom_with_prg(prg, 1, 1, None);
            let cart = Cartridge::from_ines_bytes(&rom).expect("parse");
            let bus = Bus::new(cart);
            let mut state = CpuState::new();
            state.reset(&bus);
            Self {
                state,
                bus,
                trace: TraceBuffer::new(),
            }
        }

        fn step(&mut self) {
            step(&mut self.state, &mut self.bus, &mut self.trace).expect("step");
        }

        fn write(&mut self, addr: u16, val: u8) {
            let mut cycles = 0;
            self.bus.store(addr, val, &mut cycles);
        }
    }

    #[test]
    fn reset_vector_scenario() {
        // LDA #$42; NOP at the reset target.
        let mut f = Fixture::new(&[0xA9, 0x42, 0xEA]);
        assert_eq!(f.state.pc, 0x8000);
        f.step();
        f.step();
        assert_eq!(f.state.a, 0x42);
        assert_eq!(f.state.pc, 0x8003);
        assert!(!f.state.flag(ZERO));
        assert!(!f.state.flag(NEGATIVE));
        assert_eq!(f.state.cycles, 4);
    }

    #[test]
    fn adc_overflow_scenario() {
        // ADC #$50 with A = $50: signed overflow, no carry.
        let mut f = Fixture::new(&[0x69, 0x50]);
        f.state.p = 0x24;
        f.state.a = 0x50;
        f.step();
        assert_eq!(f.state.a, 0xA0);
        assert!(f.state.flag(NEGATIVE));
        assert!(f.state.flag(OVERFLOW));
        assert!(!f.state.flag(CARRY));
        assert!(!f.state.flag(ZERO));
    }

    #[test]
    fn adc_carry_chain() {
        // SEC; ADC #$FF with A=1 -> 1 + 255 + 1 = 0x101.
        let mut f = Fixture::new(&[0x38, 0x69, 0xFF]);
        f.state.a = 0x01;
        f.step();
        f.step();
        assert_eq!(f.state.a, 0x01);
        assert!(f.state.flag(CARRY));
        assert!(!f.state.flag(ZERO));
    }

    #[test]
    fn sbc_borrow_semantics() {
        // SEC; SBC #$30 with A=$50 -> $20, carry still set.
        let mut f = Fixture::new(&[0x38, 0xE9, 0x30]);
        f.state.a = 0x50;
        f.step();
        f.step();
        assert_eq!(f.state.a, 0x20);
        assert!(f.state.flag(CARRY));
    }

    #[test]
    fn branch_page_cross_timing() {
        // BNE +16 placed so the taken target crosses a page.
        let mut prg = vec![0xEA; 0x100];
        prg[0xFE] = 0xD0; // at $80FE
        prg[0xFF] = 0x10;
        let mut f = Fixture::new(&prg);
        f.state.pc = 0x80FE;
        f.state.p &= !ZERO;
        let before = f.state.cycles;
        f.step();
        assert_eq!(f.state.pc, 0x8110);
        assert_eq!(f.state.cycles - before, 4); // 2 base + 1 taken + 1 cross
    }

    #[test]
    fn branch_not_taken_costs_two() {
        let mut f = Fixture::new(&[0xD0, 0x10]);
        f.state.p |= ZERO; // BNE not taken
        f.step();
        assert_eq!(f.state.pc, 0x8002);
        assert_eq!(f.state.cycles, 2);
    }

    #[test]
    fn jmp_indirect_page_bug() {
        // JMP ($30FF) with $00 at $30FF and $40 at $3000: lands at $4000.
        let mut f = Fixture::new(&[0x6C, 0xFF, 0x30]);
        f.write(0x30FF, 0x00);
        f.write(0x3000, 0x40);
        f.step();
        assert_eq!(f.state.pc, 0x4000);
        assert_eq!(f.state.cycles, 5);
    }

    #[test]
    fn oops_cycle_on_crossing_read() {
        // LDA $01F0,X with X=$20 crosses into page 2: 4 base + 1 oops.
        let mut f = Fixture::new(&[0xBD, 0xF0, 0x01]);
        f.state.x = 0x20;
        f.step();
        assert_eq!(f.state.cycles, 5);

        // Same without crossing: 4.
        let mut f = Fixture::new(&[0xBD, 0x00, 0x02]);
        f.state.x = 0x10;
        f.step();
        assert_eq!(f.state.cycles, 4);
    }

    #[test]
    fn store_indexed_has_no_conditional_extra() {
        // STA $01F0,X crossing: always 5 cycles, no oops on top.
        let mut f = Fixture::new(&[0x9D, 0xF0, 0x01]);
        f.state.x = 0x20;
        f.state.a = 0x7E;
        f.step();
        assert_eq!(f.state.cycles, 5);
        assert_eq!(f.bus.load(0x0210), 0x7E);
    }

    #[test]
    fn rmw_zero_page_timing() {
        let mut f = Fixture::new(&[0xE6, 0x10]); // INC $10
        f.write(0x0010, 0x41);
        f.step();
        assert_eq!(f.bus.load(0x0010), 0x42);
        assert_eq!(f.state.cycles, 5);
    }

    #[test]
    fn rmw_abx_always_seven() {
        let mut f = Fixture::new(&[0xFE, 0x00, 0x02]); // INC $0200,X
        f.state.x = 0x01;
        f.write(0x0201, 0x10);
        f.step();
        assert_eq!(f.bus.load(0x0201), 0x11);
        assert_eq!(f.state.cycles, 7);
    }

    #[test]
    fn brk_pushes_signature_return_and_b() {
        let mut f = Fixture::new(&[0x00, 0xFF, 0xEA]);
        let sp0 = f.state.sp;
        f.step();
        assert_eq!(f.state.cycles, 7);
        assert!(f.state.flag(IRQ_DISABLE));
        // Stack: P (B|U set), then return address $8002.
        let p = f.state.pull(&mut f.bus);
        assert_ne!(p & BREAK, 0);
        assert_ne!(p & UNUSED, 0);
        let ret = f.state.pull_word(&mut f.bus);
        assert_eq!(ret, 0x8002);
        assert_eq!(f.state.sp, sp0);
    }

    #[test]
    fn jsr_rts_round_trip() {
        // JSR $8010 ... at $8010: RTS.
        let mut prg = vec![0xEA; 0x20];
        prg[0] = 0x20;
        prg[1] = 0x10;
        prg[2] = 0x80;
        prg[0x10] = 0x60;
        let mut f = Fixture::new(&prg);
        f.step();
        assert_eq!(f.state.pc, 0x8010);
        f.step();
        assert_eq!(f.state.pc, 0x8003);
        assert_eq!(f.state.cycles, 6 + 6);
    }

    #[test]
    fn php_plp_round_trip_forces_b_and_u() {
        let mut f = Fixture::new(&[0x08, 0x28]);
        f.state.p = 0x24 | CARRY | NEGATIVE;
        f.step();
        f.state.p = 0x24;
        f.step();
        assert!(f.state.flag(CARRY));
        assert!(f.state.flag(NEGATIVE));
        assert!(!f.state.flag(BREAK));
        assert!(f.state.flag(UNUSED));
    }

    #[test]
    fn kil_jams() {
        let mut f = Fixture::new(&[0x02]);
        let err = step(&mut f.state, &mut f.bus, &mut f.trace).unwrap_err();
        assert_eq!(
            err,
            EmuError::JammingInstruction {
                opcode: 0x02,
                pc: 0x8000
            }
        );
    }

    #[test]
    fn unstable_opcodes_fault() {
        let mut f = Fixture::new(&[0x8B, 0x42]); // ANE #imm
        let err = step(&mut f.state, &mut f.bus, &mut f.trace).unwrap_err();
        assert_eq!(
            err,
            EmuError::UnsupportedInstruction {
                opcode: 0x8B,
                pc: 0x8000
            }
        );
    }

    #[test]
    fn lax_loads_both_registers() {
        let mut f = Fixture::new(&[0xA7, 0x10]);
        f.write(0x0010, 0x9C);
        f.step();
        assert_eq!(f.state.a, 0x9C);
        assert_eq!(f.state.x, 0x9C);
        assert!(f.state.flag(NEGATIVE));
    }

    #[test]
    fn sax_stores_a_and_x() {
        let mut f = Fixture::new(&[0x87, 0x10]);
        f.state.a = 0b1100_1100;
        f.state.x = 0b1010_1010;
        f.step();
        assert_eq!(f.bus.load(0x0010), 0b1000_1000);
    }

    #[test]
    fn dcp_decrements_then_compares() {
        let mut f = Fixture::new(&[0xC7, 0x10]);
        f.write(0x0010, 0x43);
        f.state.a = 0x42;
        f.step();
        assert_eq!(f.bus.load(0x0010), 0x42);
        assert!(f.state.flag(ZERO)); // A == M-1
        assert!(f.state.flag(CARRY));
        assert_eq!(f.state.cycles, 5);
    }

    #[test]
    fn isb_increments_then_subtracts() {
        let mut f = Fixture::new(&[0x38, 0xE7, 0x10]); // SEC; ISB $10
        f.write(0x0010, 0x0F);
        f.state.a = 0x20;
        f.step();
        f.step();
        assert_eq!(f.bus.load(0x0010), 0x10);
        assert_eq!(f.state.a, 0x10);
    }

    #[test]
    fn unofficial_nop_consumes_operand_and_oops() {
        let mut f = Fixture::new(&[0x1C, 0xF0, 0x01]); // NOP $01F0,X
        f.state.x = 0x20;
        f.step();
        assert_eq!(f.state.pc, 0x8003);
        assert_eq!(f.state.cycles, 5); // 4 + oops
    }

    #[test]
    fn aac_copies_n_into_c() {
        let mut f = Fixture::new(&[0x0B, 0x80]);
        f.state.a = 0xFF;
        f.step();
        assert_eq!(f.state.a, 0x80);
        assert!(f.state.flag(NEGATIVE));
        assert!(f.state.flag(CARRY));
    }

    #[test]
    fn axs_subtracts_without_borrow() {
        let mut f = Fixture::new(&[0xCB, 0x02]);
        f.state.a = 0x0F;
        f.state.x = 0x07;
        f.step();
        assert_eq!(f.state.x, 0x05);
        assert!(f.state.flag(CARRY));
    }

    #[test]
    fn every_documented_opcode_steps_without_fault() {
        // Smoke-run each non-jamming, supported opcode once from a fresh
        // machine; none should fault and each must consume its length.
        use crate::cpu::opcodes::Mnemonic::*;
        for op in 0..=255u8 {
            let descr = &OPCODES[op as usize];
            if descr.jam || matches!(descr.mnemonic, Ane | Sha | Shs | Shx | Shy | Las) {
                continue;
            }
            let mut f = Fixture::new(&[op, 0x10, 0x02]);
            step(&mut f.state, &mut f.bus, &mut f.trace)
                .unwrap_or_else(|e| panic!("opcode {op:#04x} faulted: {e}"));
            assert!(f.state.cycles >= descr.cycles as u64, "opcode {op:#04x}");
        }
    }
}
