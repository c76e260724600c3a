/*!
Per-instruction host code generation.

Every translated instruction leaves the invariant state in place on exit:
guest A/X/Y in `bl`/`r14b`/`r15b`, guest C/Z/V/N in the host flags, the
stack-top pointer in `rbp`, and the quantum in `r13d`. Within an
instruction the flags register is freely clobbered as long as it is saved
and restored around the clobber (`pushfq`/`popfq`), or the liveness pass
proved nothing downstream observes it.

Memory strategy:
- zero-page and stack traffic compiles to direct RAM addressing through
  the context's RAM base pointer (no I/O lives below $0200);
- everything else calls the bus thunks, preserving every register side
  effect the interpreter would produce.

Thunk call sites always save flags — the `pushfq` doubles as the stack
realignment required by the System V ABI, since blocks are entered by a
`call` and the ABI wants 16-byte alignment at every further call.

Liveness gating: `required` is the set of guest flags the following
instructions observe before overwriting. Flag materialization sequences
(the test/merge shuffles) are skipped when their output is dead; ADC/SBC
produce their flags for free in the host instruction and are emitted
unconditionally.
*/

use crate::cpu::opcodes::{AddrMode, FLAG_N, FLAG_Z, Mnemonic, OPCODES, page_cross_penalty};

use super::cache::CacheNode;
use super::runtime::{OFF_LOAD, OFF_P, OFF_RAM, OFF_STORE};
use super::x86::{self, Cond, Emitter, R8};

// Guest register mapping.
const A: R8 = x86::BL;
const X: R8 = x86::R14B;
const Y: R8 = x86::R15B;
const M: R8 = x86::DL;
const SP_LOW: R8 = x86::BPL;

/// Emit one instruction's translation at the current cursor. Returns the
/// branch link slot for REL instructions.
pub(super) fn translate_node(e: &mut Emitter, node: &CacheNode) -> Option<u32> {
    if node.exit {
        emit_exit(e, node.address);
        return None;
    }
    if node.branch {
        return Some(emit_branch(e, node));
    }

    let descr = &OPCODES[node.opcode as usize];
    let mn = descr.mnemonic;
    let required = node.required_flags;

    match descr.mode {
        AddrMode::Imp => emit_implied(e, mn, required),
        AddrMode::Acc => {
            emit_operation(e, mn, A, required);
        }
        AddrMode::Imm => {
            e.mov8_imm(M, node.operand0);
            emit_operation(e, mn, M, required);
        }
        AddrMode::Zpg | AddrMode::Zpx | AddrMode::Zpy => emit_zero_page(e, node, descr, required),
        AddrMode::Abs | AddrMode::Abx | AddrMode::Aby | AddrMode::Inx | AddrMode::Iny => {
            emit_bus(e, node, descr, required)
        }
        // REL is the branch path; IND only exists for JMP, an exit.
        AddrMode::Rel | AddrMode::Ind => unreachable!("handled as branch/exit"),
    }

    emit_cycles(e, descr.cycles as i32, required);
    None
}

/// Leave native code: next PC in eax, return to the trampoline.
fn emit_exit(e: &mut Emitter, pc: u16) {
    e.mov32_imm(x86::EAX, pc as u32);
    e.ret();
}

/// Conditional branch: fall-through stays in the block, the taken edge
/// adds its cost, checks the quantum, and jumps through a patchable rel32
/// link slot (or exits when the quantum expired).
fn emit_branch(e: &mut Emitter, node: &CacheNode) -> u32 {
    let descr = &OPCODES[node.opcode as usize];
    let fall = node.address.wrapping_add(2);
    let page_cross = (fall ^ node.branch_address) & 0xFF00 != 0;
    let taken_cost = 3 + page_cross as i32;

    // Jump past the taken path when the condition fails.
    let skip_cond = inverse_condition(descr.mnemonic);
    let not_taken = e.jcc(skip_cond, None).expect("slot");

    e.pushfq();
    e.add32_imm(x86::R13D, taken_cost);
    let expired = e.jcc(Cond::Ns, None).expect("slot");
    e.popfq();
    let link = e.jmp(None).expect("slot");

    // Quantum exhausted: surrender to the scheduler at the target.
    e.patch_here(expired);
    e.popfq();
    e.mov32_imm(x86::EAX, node.branch_address as u32);
    e.ret();

    e.patch_here(not_taken);
    e.pushfq();
    e.add32_imm(x86::R13D, 2);
    e.popfq();

    link
}

/// Host condition that *skips* the taken path (the branch inverted).
fn inverse_condition(mn: Mnemonic) -> Cond {
    match mn {
        Mnemonic::Bcc => Cond::C,
        Mnemonic::Bcs => Cond::Nc,
        Mnemonic::Bne => Cond::Z,
        Mnemonic::Beq => Cond::Nz,
        Mnemonic::Bpl => Cond::S,
        Mnemonic::Bmi => Cond::Ns,
        Mnemonic::Bvc => Cond::O,
        Mnemonic::Bvs => Cond::No,
        other => unreachable!("{other:?} is not a branch"),
    }
}

/// Static cycle cost, fenced when live flags would be clobbered.
fn emit_cycles(e: &mut Emitter, cost: i32, required: u8) {
    if required != 0 {
        e.pushfq();
    }
    e.add32_imm(x86::R13D, cost);
    if required != 0 {
        e.popfq();
    }
}

// ---------------------------------------------------------------------
// Flag shuffles
// ---------------------------------------------------------------------

/// Merge the flag image pushed on the host stack with the current flags:
/// bits in `keep_old` come from the pushed (older) image, the rest from
/// the flags as they are now.
fn restore_flags(e: &mut Emitter, keep_old: u32) {
    e.pop64(x86::RAX);
    e.pushfq();
    e.pop64(x86::RCX);
    e.and32_imm(x86::EAX, keep_old as i32);
    e.and32_imm(x86::ECX, !keep_old as i32);
    e.or32(x86::ECX, x86::EAX);
    e.push64(x86::RCX);
    e.popfq();
}

/// Set host SF/ZF from `r`, preserving CF and OF.
fn test_zero_sign(e: &mut Emitter, r: R8) {
    e.pushfq();
    e.test8(r, r);
    restore_flags(e, 0x801);
}

/// 6502 comparison: SF/ZF/CF from the subtraction (carry complemented to
/// the 6502's >= sense), OF preserved.
fn emit_compare(e: &mut Emitter, r0: R8, required: u8) {
    if required == 0 {
        return;
    }
    e.pushfq();
    e.cmp8(r0, M);
    restore_flags(e, 0x800);
    e.cmc();
}

// ---------------------------------------------------------------------
// Operation bodies
// ---------------------------------------------------------------------

/// Emit the operation for `mn` with its operand (or target) in `t`.
/// Returns true when the register was updated and a memory operand must
/// be written back.
fn emit_operation(e: &mut Emitter, mn: Mnemonic, t: R8, required: u8) -> bool {
    let nz_live = required & (FLAG_N | FLAG_Z) != 0;
    match mn {
        Mnemonic::Lda => {
            if t != A {
                e.mov8(A, t);
            }
            if nz_live {
                test_zero_sign(e, A);
            }
            false
        }
        Mnemonic::Ldx => {
            if t != X {
                e.mov8(X, t);
            }
            if nz_live {
                test_zero_sign(e, X);
            }
            false
        }
        Mnemonic::Ldy => {
            if t != Y {
                e.mov8(Y, t);
            }
            if nz_live {
                test_zero_sign(e, Y);
            }
            false
        }
        Mnemonic::Lax => {
            e.mov8(A, t);
            e.mov8(X, t);
            if nz_live {
                test_zero_sign(e, A);
            }
            false
        }

        Mnemonic::Adc => {
            e.adc8(A, t);
            false
        }
        Mnemonic::Sbc => {
            e.cmc();
            e.sbb8(A, t);
            e.cmc();
            false
        }

        Mnemonic::And | Mnemonic::Ora | Mnemonic::Eor => {
            if required != 0 {
                e.pushfq();
                logic8(e, mn, t);
                restore_flags(e, 0x801);
            } else {
                logic8(e, mn, t);
            }
            false
        }

        Mnemonic::Cmp => {
            emit_compare(e, A, required);
            false
        }
        Mnemonic::Cpx => {
            emit_compare(e, X, required);
            false
        }
        Mnemonic::Cpy => {
            emit_compare(e, Y, required);
            false
        }

        Mnemonic::Bit => {
            if required != 0 {
                emit_bit(e);
            }
            false
        }

        Mnemonic::Asl => {
            shift_with_preserved_overflow(e, t, required, Emitter::shl8_1);
            true
        }
        Mnemonic::Lsr => {
            shift_with_preserved_overflow(e, t, required, Emitter::shr8_1);
            true
        }
        Mnemonic::Rol => {
            // RCL does not set SF/ZF; materialize them from the result.
            shift_with_preserved_overflow(e, t, required, Emitter::rcl8_1);
            if nz_live {
                test_zero_sign(e, t);
            }
            true
        }
        Mnemonic::Ror => {
            shift_with_preserved_overflow(e, t, required, Emitter::rcr8_1);
            if nz_live {
                test_zero_sign(e, t);
            }
            true
        }
        Mnemonic::Inc => {
            incdec_with_preserved_overflow(e, t, required, Emitter::inc8);
            true
        }
        Mnemonic::Dec => {
            incdec_with_preserved_overflow(e, t, required, Emitter::dec8);
            true
        }

        // Memory-operand NOPs: the load already happened (and carried any
        // side effect); nothing else to do.
        Mnemonic::Nop => false,

        other => unreachable!("{other:?} is not translated"),
    }
}

fn logic8(e: &mut Emitter, mn: Mnemonic, t: R8) {
    match mn {
        Mnemonic::And => e.and8(A, t),
        Mnemonic::Ora => e.or8(A, t),
        Mnemonic::Eor => e.xor8(A, t),
        _ => unreachable!(),
    }
}

/// One-bit shift/rotate with the guest-invisible OF preserved.
fn shift_with_preserved_overflow<'a>(
    e: &mut Emitter<'a>,
    t: R8,
    required: u8,
    op: fn(&mut Emitter<'a>, R8),
) {
    if required != 0 {
        e.pushfq();
        op(e, t);
        restore_flags(e, 0x800);
    } else {
        op(e, t);
    }
}

/// INC/DEC forms: CF untouched natively, OF preserved via the merge.
fn incdec_with_preserved_overflow<'a>(
    e: &mut Emitter<'a>,
    t: R8,
    required: u8,
    op: fn(&mut Emitter<'a>, R8),
) {
    if required != 0 {
        e.pushfq();
        op(e, t);
        restore_flags(e, 0x800);
    } else {
        op(e, t);
    }
}

/// BIT: ZF from A & M, SF from M bit 7, OF from M bit 6, CF preserved.
fn emit_bit(e: &mut Emitter) {
    use x86::*;
    e.pushfq();
    e.pop64(RCX);
    e.and32_imm(ECX, !0x8C0_i32); // clear ZF, SF, OF
    e.movzx32_8(EAX, M);
    e.and32_imm(EAX, 0x80);
    e.or32(ECX, EAX); // SF <- M bit 7
    e.movzx32_8(EAX, M);
    e.shl32_imm(EAX, 5);
    e.and32_imm(EAX, 0x800);
    e.or32(ECX, EAX); // OF <- M bit 6
    e.test8(M, A);
    e.pushfq();
    e.pop64(RAX);
    e.and32_imm(EAX, 0x40);
    e.or32(ECX, EAX); // ZF <- (A & M) == 0
    e.push64(RCX);
    e.popfq();
}

// ---------------------------------------------------------------------
// Implied-mode instructions
// ---------------------------------------------------------------------

fn emit_implied(e: &mut Emitter, mn: Mnemonic, required: u8) {
    let nz_live = required & (FLAG_N | FLAG_Z) != 0;
    match mn {
        Mnemonic::Nop => {}

        Mnemonic::Inx => incdec_with_preserved_overflow(e, X, required, Emitter::inc8),
        Mnemonic::Iny => incdec_with_preserved_overflow(e, Y, required, Emitter::inc8),
        Mnemonic::Dex => incdec_with_preserved_overflow(e, X, required, Emitter::dec8),
        Mnemonic::Dey => incdec_with_preserved_overflow(e, Y, required, Emitter::dec8),

        Mnemonic::Tax => {
            e.mov8(X, A);
            if nz_live {
                test_zero_sign(e, X);
            }
        }
        Mnemonic::Tay => {
            e.mov8(Y, A);
            if nz_live {
                test_zero_sign(e, Y);
            }
        }
        Mnemonic::Txa => {
            e.mov8(A, X);
            if nz_live {
                test_zero_sign(e, A);
            }
        }
        Mnemonic::Tya => {
            e.mov8(A, Y);
            if nz_live {
                test_zero_sign(e, A);
            }
        }
        Mnemonic::Tsx => {
            // The stack-top low byte is SP itself (RAM is 256-aligned).
            e.mov8(X, SP_LOW);
            if nz_live {
                test_zero_sign(e, X);
            }
        }
        Mnemonic::Txs => e.mov8(SP_LOW, X),

        Mnemonic::Clc => e.clc(),
        Mnemonic::Sec => e.stc(),
        Mnemonic::Clv => {
            e.pushfq();
            e.pop64(x86::RAX);
            e.and32_imm(x86::EAX, !0x800_i32);
            e.push64(x86::RAX);
            e.popfq();
        }
        // I and D live only in the in-memory P byte.
        Mnemonic::Cli => p_byte_op(e, required, |e| e.and8_mem_imm(x86::R12, OFF_P, 0xFB)),
        Mnemonic::Sei => p_byte_op(e, required, |e| e.or8_mem_imm(x86::R12, OFF_P, 0x04)),
        Mnemonic::Cld => p_byte_op(e, required, |e| e.and8_mem_imm(x86::R12, OFF_P, 0xF7)),
        Mnemonic::Sed => p_byte_op(e, required, |e| e.or8_mem_imm(x86::R12, OFF_P, 0x08)),

        Mnemonic::Pha => {
            e.mov8_store(x86::RBP, 0, A);
            guarded_sp_adjust(e, required, Emitter::dec8);
        }
        Mnemonic::Pla => {
            guarded_sp_adjust(e, required, Emitter::inc8);
            e.mov8_load(A, x86::RBP, 0);
            if nz_live {
                test_zero_sign(e, A);
            }
        }
        Mnemonic::Php => emit_php(e),
        Mnemonic::Plp => emit_plp(e),

        other => unreachable!("{other:?} is not an implied translation"),
    }
}

/// AND/OR the in-memory P byte, fencing the flag clobber if live.
fn p_byte_op(e: &mut Emitter, required: u8, op: impl FnOnce(&mut Emitter)) {
    if required != 0 {
        e.pushfq();
        op(e);
        e.popfq();
    } else {
        op(e);
    }
}

/// Wrap the stack-pointer low-byte bump so live flags survive it.
fn guarded_sp_adjust<'a>(e: &mut Emitter<'a>, required: u8, op: fn(&mut Emitter<'a>, R8)) {
    if required != 0 {
        e.pushfq();
        op(e, SP_LOW);
        e.popfq();
    } else {
        op(e, SP_LOW);
    }
}

/// PHP: compose the full P byte (I/D from memory, B and U forced, C/N and
/// Z/V from the host flags) and push it onto the guest stack.
fn emit_php(e: &mut Emitter) {
    use x86::*;
    e.pushfq();
    e.pop64(RCX);
    e.movzx32_mem8(EAX, R12, OFF_P);
    e.and32_imm(EAX, 0x0C);
    e.or32_imm(EAX, 0x30);
    e.mov32(EDX, ECX);
    e.and32_imm(EDX, 0x81);
    e.or32(EAX, EDX);
    e.mov32(EDX, ECX);
    e.shr32_imm(EDX, 5);
    e.and32_imm(EDX, 0x42);
    e.or32(EAX, EDX);
    e.mov8_store(RBP, 0, AL);
    e.dec8(SP_LOW);
    e.push64(RCX);
    e.popfq();
}

/// PLP: pull P, store it to memory (I/D home, B cleared, U forced), and
/// rebuild the host C/Z/V/N from it.
fn emit_plp(e: &mut Emitter) {
    use x86::*;
    e.pushfq();
    e.pop64(RCX);
    e.inc8(SP_LOW);
    e.movzx32_mem8(EAX, RBP, 0);
    e.and32_imm(EAX, 0xEF);
    e.or32_imm(EAX, 0x20);
    e.mov8_store(R12, OFF_P, AL);
    e.and32_imm(ECX, !0x8C1_i32); // clear CF, ZF, SF, OF
    e.mov32(EDX, EAX);
    e.and32_imm(EDX, 0x81);
    e.or32(ECX, EDX);
    e.shl32_imm(EAX, 5);
    e.and32_imm(EAX, 0x840);
    e.or32(ECX, EAX);
    e.push64(RCX);
    e.popfq();
}

// ---------------------------------------------------------------------
// Zero-page class: direct RAM addressing
// ---------------------------------------------------------------------

fn zp_index(mode: AddrMode) -> Option<R8> {
    match mode {
        AddrMode::Zpx => Some(X),
        AddrMode::Zpy => Some(Y),
        _ => None,
    }
}

/// Leave the RAM base in rax and the wrapped zero-page offset in rcx.
fn emit_zp_address(e: &mut Emitter, offset: u8, index: Option<R8>) {
    use x86::*;
    e.mov64_load(RAX, R12, OFF_RAM);
    e.mov8_imm(CL, offset);
    if let Some(idx) = index {
        e.add8(CL, idx);
    }
    e.movzx32_8(ECX, CL);
}

fn emit_zero_page(
    e: &mut Emitter,
    node: &CacheNode,
    descr: &crate::cpu::opcodes::Descriptor,
    required: u8,
) {
    use x86::*;
    let mn = descr.mnemonic;
    let index = zp_index(descr.mode);

    if let Some(src) = store_source(mn) {
        // The index addition (and SAX's AND) clobber flags; fence them.
        let clobbers = index.is_some() || mn == Mnemonic::Sax;
        if clobbers {
            e.pushfq();
        }
        emit_zp_address(e, node.operand0, index);
        let src = if mn == Mnemonic::Sax {
            e.mov8(M, A);
            e.and8(M, X);
            M
        } else {
            src
        };
        if clobbers {
            e.popfq();
        }
        e.mov8_store_idx(RAX, RCX, src);
        return;
    }

    // Load (and possibly write back).
    if index.is_some() {
        e.pushfq();
    }
    emit_zp_address(e, node.operand0, index);
    if index.is_some() {
        e.popfq();
    }
    e.mov8_load_idx(M, RAX, RCX);

    let write_back = crate::cpu::opcodes::is_rmw(mn);
    if write_back {
        // The flag merges clobber rax/rcx; keep the address live across.
        e.push64(RAX);
        e.push64(RCX);
    }
    let updated = emit_operation(e, mn, M, required);
    if write_back {
        e.pop64(RCX);
        e.pop64(RAX);
        if updated {
            e.mov8_store_idx(RAX, RCX, M);
        }
    }
}

fn store_source(mn: Mnemonic) -> Option<R8> {
    match mn {
        Mnemonic::Sta => Some(A),
        Mnemonic::Stx => Some(X),
        Mnemonic::Sty => Some(Y),
        Mnemonic::Sax => Some(M),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// Bus class: absolute and indirect modes through the thunks
// ---------------------------------------------------------------------

/// Compute the effective address into esi. Runs with flags saved; may
/// clobber rax, rcx, edi and the flags. For conditional-oops reads the
/// quantum is bumped on a page crossing.
fn emit_bus_address(
    e: &mut Emitter,
    node: &CacheNode,
    descr: &crate::cpu::opcodes::Descriptor,
) {
    use x86::*;
    let base = ((node.operand1 as u16) << 8) | node.operand0 as u16;
    let oops = page_cross_penalty(descr.mnemonic)
        && matches!(descr.mode, AddrMode::Abx | AddrMode::Aby | AddrMode::Iny);

    match descr.mode {
        AddrMode::Abs => {
            e.mov32_imm(ESI, base as u32);
        }
        AddrMode::Abx | AddrMode::Aby => {
            let idx = if descr.mode == AddrMode::Abx { X } else { Y };
            e.mov32_imm(ESI, base as u32);
            e.movzx32_8(ECX, idx);
            e.add32(ESI, ECX);
            e.movzx32_16(ESI, ESI);
            if oops {
                e.mov32(ECX, ESI);
                e.xor32_imm(ECX, base as i32);
                e.test32_imm(ECX, 0xFF00);
                let skip = e.jcc(Cond::Z, None).expect("slot");
                e.add32_imm(R13D, 1);
                e.patch_here(skip);
            }
        }
        AddrMode::Inx | AddrMode::Iny => {
            // Read the 16-bit pointer out of the zero page, wrapping the
            // high-byte fetch within the page.
            e.mov64_load(RAX, R12, OFF_RAM);
            e.mov8_imm(CL, node.operand0);
            if descr.mode == AddrMode::Inx {
                e.add8(CL, X);
            }
            e.movzx32_8(ECX, CL);
            e.movzx32_mem8_idx(ESI, RAX, RCX);
            e.inc8(CL);
            e.movzx32_8(ECX, CL);
            e.movzx32_mem8_idx(ECX, RAX, RCX);
            e.shl32_imm(ECX, 8);
            e.or32(ESI, ECX);
            if descr.mode == AddrMode::Iny {
                e.mov32(EDI, ESI);
                e.movzx32_8(ECX, Y);
                e.add32(ESI, ECX);
                e.movzx32_16(ESI, ESI);
                if oops {
                    e.xor32(EDI, ESI);
                    e.test32_imm(EDI, 0xFF00);
                    let skip = e.jcc(Cond::Z, None).expect("slot");
                    e.add32_imm(R13D, 1);
                    e.patch_here(skip);
                }
            }
        }
        _ => unreachable!(),
    }
}

fn emit_bus(
    e: &mut Emitter,
    node: &CacheNode,
    descr: &crate::cpu::opcodes::Descriptor,
    required: u8,
) {
    use x86::*;
    let mn = descr.mnemonic;

    if let Some(src) = store_source(mn) {
        e.pushfq();
        emit_bus_address(e, node, descr);
        if mn == Mnemonic::Sax {
            e.mov8(M, A);
            e.and8(M, X);
        }
        e.mov64(RDI, R12);
        e.movzx32_8(EDX, src);
        e.call_mem(R12, OFF_STORE);
        e.popfq();
        return;
    }

    // Load through the bus thunk; RMW keeps the address for the store.
    let write_back = crate::cpu::opcodes::is_rmw(mn);
    e.pushfq();
    emit_bus_address(e, node, descr);
    e.mov64(RDI, R12);
    if write_back {
        e.push64(RSI);
        e.sub64_imm8(RSP, 8);
    }
    e.call_mem(R12, OFF_LOAD);
    if write_back {
        e.add64_imm8(RSP, 8);
        e.pop64(RSI);
    }
    e.mov8(M, AL);
    e.popfq();

    let updated = emit_operation(e, mn, M, required);

    if write_back && updated {
        e.pushfq();
        e.mov64(RDI, R12);
        e.movzx32_8(EDX, M);
        e.call_mem(R12, OFF_STORE);
        e.popfq();
    }
}
