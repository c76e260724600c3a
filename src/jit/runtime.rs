/*!
Runtime contract between compiled blocks and the rest of the machine.

Register mapping inside translated code:

```text
bl   guest A            r12  context pointer
r14b guest X            r13d signed cycle quantum
r15b guest Y            rbp  stack-top pointer (ram + 0x100 + SP)
dl   memory temp        host RFLAGS carries guest C/Z/V/N
```

The entry trampoline is itself emitted into the code buffer at
initialization. Called as `fn(ctx, block) -> remaining_quantum`, it saves
the callee-saved registers, loads the guest registers and a host-flag
image converted from `P`, points `rbp` into RAM page 1, and calls the
block. Blocks return with the next guest PC in `eax`; the trampoline
converts flags back into `P`, writes every register home and returns the
remaining (signed) quantum.

Flag conversion (same bit shuffle in both directions):

```text
host = (p & 0x81) | ((p & 0x42) << 5)      C,N in place; Z,V up to ZF,OF
p    = (p & 0x3C) | (host & 0x81) | ((host >> 5) & 0x42)
```

I/D/B/U never leave the in-memory `P` byte.

Memory access from compiled code goes through the two `extern "C"` thunks
below, which dispatch into the bus exactly like interpreter traffic (the
cycle counter is threaded so OAM DMA can stall and synchronize).
*/

use std::mem::offset_of;

use crate::bus::Bus;
use crate::cpu::state::CpuState;

use super::buffer::CodeBuffer;
#[cfg(test)]
use super::x86::Emitter;
use super::x86;

/// Cycle budget handed to a block per scheduler iteration.
pub const QUANTUM: i32 = 1000;

#[repr(C)]
pub struct JitContext {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    _pad: u8,
    pub pc: u16,
    pub quantum: i32,
    _pad2: u32,
    pub ram: *mut u8,
    pub bus: *mut Bus,
    pub cycles: *mut u64,
    pub load: unsafe extern "C" fn(*mut JitContext, u32) -> u8,
    pub store: unsafe extern "C" fn(*mut JitContext, u32, u32),
}

// Field offsets baked into emitted code.
pub const OFF_A: i32 = offset_of!(JitContext, a) as i32;
pub const OFF_X: i32 = offset_of!(JitContext, x) as i32;
pub const OFF_Y: i32 = offset_of!(JitContext, y) as i32;
pub const OFF_P: i32 = offset_of!(JitContext, p) as i32;
pub const OFF_SP: i32 = offset_of!(JitContext, sp) as i32;
pub const OFF_PC: i32 = offset_of!(JitContext, pc) as i32;
pub const OFF_QUANTUM: i32 = offset_of!(JitContext, quantum) as i32;
pub const OFF_RAM: i32 = offset_of!(JitContext, ram) as i32;
pub const OFF_LOAD: i32 = offset_of!(JitContext, load) as i32;
pub const OFF_STORE: i32 = offset_of!(JitContext, store) as i32;

impl JitContext {
    /// Snapshot CPU state for a block run. The raw pointers alias the
    /// machine's bus and cycle counter for the duration of the call.
    pub fn new(state: &mut CpuState, bus: &mut Bus) -> Self {
        Self {
            a: state.a,
            x: state.x,
            y: state.y,
            p: state.p,
            sp: state.sp,
            _pad: 0,
            pc: state.pc,
            quantum: -QUANTUM,
            _pad2: 0,
            ram: bus.ram.as_mut_ptr(),
            bus: bus as *mut Bus,
            cycles: &mut state.cycles as *mut u64,
            load: jit_load,
            store: jit_store,
        }
    }

    /// Write the registers back after a block run. The cycle counter was
    /// updated through the raw pointer (DMA stalls land there directly);
    /// the consumed quantum is added by the caller.
    pub fn write_back(&self, state: &mut CpuState) {
        state.a = self.a;
        state.x = self.x;
        state.y = self.y;
        state.p = self.p;
        state.sp = self.sp;
        state.pc = self.pc;
    }
}

/// Bus load on behalf of compiled code.
///
/// Safety: called only from a block invoked via `run`, while the context
/// pointers are live and nothing else borrows the bus.
pub unsafe extern "C" fn jit_load(ctx: *mut JitContext, addr: u32) -> u8 {
    unsafe {
        let ctx = &mut *ctx;
        (*ctx.bus).load(addr as u16)
    }
}

/// Bus store on behalf of compiled code.
pub unsafe extern "C" fn jit_store(ctx: *mut JitContext, addr: u32, val: u32) {
    unsafe {
        let ctx = &mut *ctx;
        (*ctx.bus).store(addr as u16, val as u8, &mut *ctx.cycles)
    }
}

/// Emit the entry/exit trampoline; returns its buffer offset.
pub fn emit_trampoline(buf: &mut CodeBuffer) -> u32 {
    use x86::*;
    let entry = buf.len();
    let mut e = Emitter::new(buf);

    // Prologue: callee-saved registers, context pointer.
    e.push64(RBX);
    e.push64(RBP);
    e.push64(R12);
    e.push64(R13);
    e.push64(R14);
    e.push64(R15);
    e.mov64(R12, RDI);

    // rbp = ram + 0x100 + sp
    e.mov64_load(RBP, R12, OFF_RAM);
    e.movzx32_mem8(EAX, R12, OFF_SP);
    e.lea64(RBP, RBP, RAX, 0x100);

    // Quantum and guest registers.
    e.mov32_load(R13D, R12, OFF_QUANTUM);
    e.mov8_load(BL, R12, OFF_A);
    e.mov8_load(R14B, R12, OFF_X);
    e.mov8_load(R15B, R12, OFF_Y);

    // Host flag image from P: (p & 0x81) | ((p & 0x42) << 5).
    e.movzx32_mem8(EAX, R12, OFF_P);
    e.mov32(ECX, EAX);
    e.and32_imm(EAX, 0x81);
    e.and32_imm(ECX, 0x42);
    e.shl32_imm(ECX, 5);
    e.or32(EAX, ECX);
    e.push64(RAX);
    e.popfq();

    // Six pushes above leave rsp ≡ 8 (mod 16); realign for the call.
    e.sub64_imm8(RSP, 8);
    e.call_reg(RSI);

    // Guest flags first, before anything disturbs them.
    e.pushfq();
    e.pop64(RCX);
    e.add64_imm8(RSP, 8);

    // PC came back in ax; store it and the registers.
    e.mov16_store(R12, OFF_PC, EAX);
    e.mov8_store(R12, OFF_A, BL);
    e.mov8_store(R12, OFF_X, R14B);
    e.mov8_store(R12, OFF_Y, R15B);
    e.mov32_store(R12, OFF_QUANTUM, R13D);

    // sp = rbp - ram - 0x100
    e.mov64(RAX, RBP);
    e.sub64_mem(RAX, R12, OFF_RAM);
    e.sub32_imm(EAX, 0x100);
    e.mov8_store(R12, OFF_SP, AL);

    // p = (p & 0x3C) | (host & 0x81) | ((host >> 5) & 0x42)
    e.movzx32_mem8(EAX, R12, OFF_P);
    e.and32_imm(EAX, 0x3C);
    e.mov32(EDX, ECX);
    e.and32_imm(EDX, 0x81);
    e.or32(EAX, EDX);
    e.mov32(EDX, ECX);
    e.shr32_imm(EDX, 5);
    e.and32_imm(EDX, 0x42);
    e.or32(EAX, EDX);
    e.mov8_store(R12, OFF_P, AL);

    // Return the remaining quantum.
    e.mov32(EAX, R13D);
    e.pop64(R15);
    e.pop64(R14);
    e.pop64(R13);
    e.pop64(R12);
    e.pop64(RBP);
    e.pop64(RBX);
    e.ret();

    entry
}

/// Invoke a compiled block through the trampoline.
///
/// Safety: `trampoline` and `block` must be offsets of code emitted by
/// `emit_trampoline` and the translator into this same buffer, and `ctx`
/// must carry live bus/cycle pointers.
pub unsafe fn run(buf: &CodeBuffer, trampoline: u32, block: u32, ctx: &mut JitContext) -> i32 {
    let f: unsafe extern "C" fn(*mut JitContext, *const u8) -> i32 =
        unsafe { std::mem::transmute(buf.ptr_at(trampoline)) };
    unsafe { f(ctx as *mut JitContext, buf.ptr_at(block)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::test_utils::build_nrom_with_prg;

    fn machine_parts() -> (CpuState, Bus) {
        let rom = build_nrom_with_prg(&[0xEA], 1, 1, None);
        let cart = Cartridge::from_ines_bytes(&rom).expect("parse");
        let bus = Bus::new(cart);
        let mut state = CpuState::new();
        state.reset(&bus);
        (state, bus)
    }

    #[test]
    fn context_layout_offsets() {
        assert_eq!(OFF_A, 0);
        assert_eq!(OFF_X, 1);
        assert_eq!(OFF_Y, 2);
        assert_eq!(OFF_P, 3);
        assert_eq!(OFF_SP, 4);
        assert_eq!(OFF_PC, 6);
        assert_eq!(OFF_QUANTUM, 8);
        assert_eq!(OFF_RAM, 16);
        assert_eq!(OFF_LOAD % 8, 0);
        assert_eq!(OFF_STORE, OFF_LOAD + 8);
    }

    #[test]
    fn trampoline_round_trips_state_through_a_trivial_block() {
        let mut buf = CodeBuffer::new(0x1000).expect("map");
        let tramp = emit_trampoline(&mut buf);

        // Block: report PC = 0x8123, consume nothing, leave regs alone.
        let block = buf.len();
        {
            let mut e = Emitter::new(&mut buf);
            e.mov32_imm(x86::EAX, 0x8123);
            e.ret();
        }

        let (mut state, mut bus) = machine_parts();
        state.a = 0x11;
        state.x = 0x22;
        state.y = 0x33;
        state.p = 0x24 | crate::cpu::state::CARRY;
        state.sp = 0xF0;

        let mut ctx = JitContext::new(&mut state, &mut bus);
        let remaining = unsafe { run(&buf, tramp, block, &mut ctx) };
        ctx.write_back(&mut state);

        assert_eq!(remaining, -QUANTUM);
        assert_eq!(state.pc, 0x8123);
        assert_eq!(state.a, 0x11);
        assert_eq!(state.x, 0x22);
        assert_eq!(state.y, 0x33);
        assert_eq!(state.sp, 0xF0);
        // Carry survived the round trip through the host flag image.
        assert_eq!(state.p, 0x24 | crate::cpu::state::CARRY);
    }

    #[test]
    fn trampoline_propagates_register_and_flag_changes() {
        let mut buf = CodeBuffer::new(0x1000).expect("map");
        let tramp = emit_trampoline(&mut buf);

        // Block: A += A (sets host flags), X = 0x7F, quantum += 5,
        // push A onto the guest stack, PC = 0x9000.
        let block = buf.len();
        {
            use x86::*;
            let mut e = Emitter::new(&mut buf);
            e.add8(BL, BL);
            e.mov8_imm(R14B, 0x7F);
            e.pushfq();
            e.add32_imm(R13D, 5);
            e.popfq();
            e.mov8_store(RBP, 0, BL);
            e.pushfq();
            e.dec8(BPL);
            e.popfq();
            e.mov32_imm(EAX, 0x9000);
            e.ret();
        }

        let (mut state, mut bus) = machine_parts();
        state.a = 0x90; // 0x90 + 0x90 = 0x120: carry out, result 0x20
        state.sp = 0xFD;
        state.p = 0x24;

        let mut ctx = JitContext::new(&mut state, &mut bus);
        let remaining = unsafe { run(&buf, tramp, block, &mut ctx) };
        ctx.write_back(&mut state);

        assert_eq!(remaining, -QUANTUM + 5);
        assert_eq!(state.pc, 0x9000);
        assert_eq!(state.a, 0x20);
        assert_eq!(state.x, 0x7F);
        assert_eq!(state.sp, 0xFC);
        // The pushed byte landed in RAM page 1 at the old SP.
        assert_eq!(bus.peek(0x01FD), 0x20);
        // Carry set, zero clear, negative clear in the converted P.
        assert_ne!(state.p & crate::cpu::state::CARRY, 0);
        assert_eq!(state.p & crate::cpu::state::ZERO, 0);
        assert_eq!(state.p & crate::cpu::state::NEGATIVE, 0);
        // I/U bits from the untouched P image survive.
        assert_eq!(state.p & 0x3C, 0x24);
    }
}
