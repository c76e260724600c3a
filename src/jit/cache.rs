/*!
Instruction cache: guest-PC-indexed nodes over the shared code buffer.

One node per guest address in $8000-$FFFF (0x8000 entries, never freed).
A node's lifecycle is Unseen (no entry) -> Discovered (decoded, this call
only) -> Compiled (native offset recorded) -> Linked (outgoing branch
patched); nodes never regress, and `cache` leaves no node in a transient
state when it returns.

`cache(pc)` builds everything reachable from `pc` through fall-through
and conditional branches:

1. *Discovery* walks forward from `pc`, decoding descriptors into fresh
   nodes, queueing conditional branches, and stopping at an exit
   instruction or at a node that already has native code.
2. *Liveness* sweeps the block in reverse, computing for each node the
   set of guest flags still observed downstream (`required_flags`);
   block ends and branches reset the set to "all" because control leaves
   the translated region.
3. *Translation* emits host code for each node in order; a block that
   flows into already-compiled code gets a closing jump to it.
4. *Linking* drains the branch queue: targets that are compiled get
   their rel32 slots patched; the first uncompiled target becomes the
   next block, compiled at the current cursor so the patched jump lands
   on it directly.

Bank-switch caveat: compiled code captures the PRG bytes that were
mapped at translation time. Mappers that switch banks under the executing
window would run stale code; none of the supported mappers' games do (the
switch always runs from the fixed bank). The cache is never invalidated.
*/

use std::collections::VecDeque;

use log::debug;

use crate::bus::Bus;
use crate::cpu::opcodes::{AddrMode, FLAG_ALL, Mnemonic, OPCODES};
use crate::error::EmuError;

use super::buffer::{CodeBuffer, DEFAULT_CAPACITY};
use super::runtime::{self, JitContext};
use super::translate;
use super::x86::Emitter;

const CACHE_SIZE: usize = 0x8000;
const PRG_BASE: u16 = 0x8000;

#[derive(Debug)]
pub(super) struct CacheNode {
    pub address: u16,
    pub opcode: u8,
    pub operand0: u8,
    pub operand1: u8,

    /// Relative conditional branch: compiled, taken edge link-patched.
    pub branch: bool,
    /// Unconditional control transfer or untranslatable opcode: the
    /// block ends here and the interpreter takes over.
    pub exit: bool,
    /// Computed taken-branch target for REL instructions.
    pub branch_address: u16,

    /// Guest flags downstream code observes (backward liveness result).
    pub required_flags: u8,

    /// Offset of this node's translation in the code buffer.
    pub native_offset: Option<u32>,
    /// Offset of the unresolved rel32 displacement of the taken edge.
    pub native_branch_offset: Option<u32>,
}

/// Opcodes the recompiler refuses to translate; they end the block and
/// execute in the interpreter (which also raises the faults for the
/// unstable ones).
fn untranslatable(mn: Mnemonic) -> bool {
    use Mnemonic::*;
    matches!(
        mn,
        Brk | Jmp | Jsr | Rti | Rts | Kil
            | Dcp | Isb | Slo | Sre | Rla | Rra
            | Aac | Asr | Arr | Atx | Axs
            | Ane | Sha | Shs | Shx | Shy | Las
    )
}

pub struct InstructionCache {
    buffer: CodeBuffer,
    trampoline: u32,
    nodes: Vec<Option<Box<CacheNode>>>,
    compiled_nodes: u64,
}

impl InstructionCache {
    pub fn new() -> std::io::Result<Self> {
        let mut buffer = CodeBuffer::new(DEFAULT_CAPACITY)?;
        let trampoline = runtime::emit_trampoline(&mut buffer);
        let mut nodes = Vec::with_capacity(CACHE_SIZE);
        nodes.resize_with(CACHE_SIZE, || None);
        Ok(Self {
            buffer,
            trampoline,
            nodes,
            compiled_nodes: 0,
        })
    }

    #[inline]
    fn index(address: u16) -> usize {
        (address - PRG_BASE) as usize
    }

    fn node(&self, address: u16) -> Option<&CacheNode> {
        self.nodes[Self::index(address)].as_deref()
    }

    /// Return an executable block entry for `pc`, compiling and linking
    /// as needed. `None` when `pc` is outside the cacheable window.
    pub fn cache(&mut self, pc: u16, bus: &Bus) -> Result<Option<u32>, EmuError> {
        if pc < PRG_BASE {
            return Ok(None);
        }
        if let Some(offset) = self.node(pc).and_then(|n| n.native_offset) {
            return Ok(Some(offset));
        }

        self.build(pc, bus);
        if self.buffer.overflowed() {
            return Err(EmuError::CodeBufferFull);
        }
        Ok(self.node(pc).and_then(|n| n.native_offset))
    }

    /// Execute a compiled block through the trampoline.
    ///
    /// Safety: `entry` must be an offset returned by `cache`, and `ctx`
    /// must carry live bus/cycle pointers for the duration of the call.
    pub unsafe fn run(&self, entry: u32, ctx: &mut JitContext) -> i32 {
        unsafe { runtime::run(&self.buffer, self.trampoline, entry, ctx) }
    }

    pub fn code_size(&self) -> u32 {
        self.buffer.len()
    }

    // -----------------------------------------------------------------
    // Compilation pipeline
    // -----------------------------------------------------------------

    fn build(&mut self, start: u16, bus: &Bus) {
        let mut queue: VecDeque<u16> = VecDeque::new();
        let mut pc = start;

        loop {
            let (block, stop) = self.discover(pc, bus, &mut queue);
            self.liveness(&block);
            self.translate_block(&block, stop);

            // Link every queued branch whose target is ready; the first
            // one that is not becomes the next block.
            let mut next = None;
            while let Some(&branch_pc) = queue.front() {
                let target = self.node(branch_pc).expect("queued node").branch_address;
                let slot = self.node(branch_pc)
                    .and_then(|n| n.native_branch_offset)
                    .expect("branch link slot");

                if target < PRG_BASE {
                    // Branch out of the cacheable window: exit stub.
                    let stub = self.buffer.len();
                    let mut e = Emitter::new(&mut self.buffer);
                    e.mov32_imm(super::x86::EAX, target as u32);
                    e.ret();
                    e.patch(slot, stub);
                    queue.pop_front();
                } else if let Some(offset) = self.node(target).and_then(|n| n.native_offset) {
                    Emitter::new(&mut self.buffer).patch(slot, offset);
                    queue.pop_front();
                } else {
                    queue.pop_front();
                    let cursor = self.buffer.len();
                    Emitter::new(&mut self.buffer).patch(slot, cursor);
                    next = Some(target);
                    break;
                }
            }

            match next {
                Some(target) => pc = target,
                None => break,
            }
        }

        debug!(
            "jit: cached block at {start:#06x} ({} nodes, {} bytes emitted)",
            self.compiled_nodes,
            self.buffer.len()
        );
    }

    /// Walk forward from `pc` collecting undiscovered nodes. Returns the
    /// block (possibly empty) and the reason the walk stopped.
    fn discover(&mut self, pc: u16, bus: &Bus, queue: &mut VecDeque<u16>) -> (Vec<u16>, BlockStop) {
        let mut block = Vec::new();
        let mut cur = pc as u32;

        loop {
            if cur < PRG_BASE as u32 || cur > 0xFFFF {
                return (block, BlockStop::FellOffRom(cur as u16));
            }
            let cur16 = cur as u16;
            if let Some(node) = self.node(cur16) {
                if node.native_offset.is_some() {
                    return (block, BlockStop::FlowsInto(cur16));
                }
            }

            let opcode = bus.peek(cur16);
            let descr = &OPCODES[opcode as usize];
            let exit = descr.jam || untranslatable(descr.mnemonic);
            let branch = !exit && descr.mode == AddrMode::Rel;
            let operand0 = bus.peek(cur16.wrapping_add(1));
            let operand1 = bus.peek(cur16.wrapping_add(2));
            let branch_address = cur16
                .wrapping_add(2)
                .wrapping_add(operand0 as i8 as u16);

            self.nodes[Self::index(cur16)] = Some(Box::new(CacheNode {
                address: cur16,
                opcode,
                operand0,
                operand1,
                branch,
                exit,
                branch_address,
                required_flags: FLAG_ALL,
                native_offset: None,
                native_branch_offset: None,
            }));
            block.push(cur16);

            if exit {
                return (block, BlockStop::Exit);
            }
            if branch {
                queue.push_back(cur16);
            }
            cur += descr.bytes as u32;
        }
    }

    /// Backward flag-liveness over a freshly discovered block. The set
    /// starts as "all" at the block end (control leaves the translated
    /// region) and is reset by branches, whose taken edge also leaves.
    fn liveness(&mut self, block: &[u16]) {
        let mut required = FLAG_ALL;
        for &addr in block.iter().rev() {
            let node = self.nodes[Self::index(addr)].as_deref_mut().expect("node");
            if node.branch {
                node.required_flags = FLAG_ALL;
                required = FLAG_ALL;
            } else {
                node.required_flags = required;
                let descr = &OPCODES[node.opcode as usize];
                required = (required & !descr.wflags) | descr.rflags;
            }
        }
    }

    /// Emit code for each node in order, then close the block according
    /// to how discovery ended.
    fn translate_block(&mut self, block: &[u16], stop: BlockStop) {
        for &addr in block {
            let idx = Self::index(addr);
            let offset = self.buffer.len();
            // Detach the node so the emitter can borrow the buffer.
            let mut node = self.nodes[idx].take().expect("discovered node");
            let mut e = Emitter::new(&mut self.buffer);
            let link = translate::translate_node(&mut e, &node);
            node.native_offset = Some(offset);
            node.native_branch_offset = link;
            self.nodes[idx] = Some(node);
            self.compiled_nodes += 1;
        }

        match stop {
            BlockStop::Exit => {}
            BlockStop::FlowsInto(next) => {
                // Fall through into code that already exists.
                let target = self.node(next).and_then(|n| n.native_offset).expect("compiled");
                Emitter::new(&mut self.buffer).jmp(Some(target));
            }
            BlockStop::FellOffRom(next) => {
                let mut e = Emitter::new(&mut self.buffer);
                e.mov32_imm(super::x86::EAX, next as u32);
                e.ret();
            }
        }
    }
}

enum BlockStop {
    /// Block ended on an exit instruction (its stub returns to the
    /// scheduler).
    Exit,
    /// Block flows into an already-compiled node.
    FlowsInto(u16),
    /// Straight-line code ran past $FFFF.
    FellOffRom(u16),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;
    use crate::cpu::opcodes::{FLAG_C, FLAG_N, FLAG_V, FLAG_Z};
    use crate::cpu::state::CpuState;
    use crate::test_utils::build_nrom_with_prg;

    fn bus_with(prg: &[u8]) -> Bus {
        let rom = build_nrom_with_prg(prg, 1, 1, None);
        let cart = Cartridge::from_ines_bytes(&rom).expect("parse");
        Bus::new(cart)
    }

    #[test]
    fn addresses_below_rom_are_not_cached() {
        let bus = bus_with(&[0xEA]);
        let mut cache = InstructionCache::new().expect("cache");
        assert_eq!(cache.cache(0x1234, &bus).expect("ok"), None);
    }

    #[test]
    fn block_discovery_stops_at_exit() {
        // LDA #$01; CLC; JMP $8000
        let bus = bus_with(&[0xA9, 0x01, 0x18, 0x4C, 0x00, 0x80]);
        let mut cache = InstructionCache::new().expect("cache");
        let entry = cache.cache(0x8000, &bus).expect("ok").expect("entry");

        let lda = cache.node(0x8000).expect("lda");
        assert_eq!(lda.native_offset, Some(entry));
        assert!(!lda.exit);

        let jmp = cache.node(0x8003).expect("jmp");
        assert!(jmp.exit);
        assert!(jmp.native_offset.is_some());

        // Second lookup is a cache hit at the same offset.
        assert_eq!(cache.cache(0x8000, &bus).expect("ok"), Some(entry));
    }

    #[test]
    fn liveness_kills_dead_flags() {
        // LDA #$01; CLC; BRK
        // BRK observes everything; CLC kills C; LDA kills N,Z.
        let bus = bus_with(&[0xA9, 0x01, 0x18, 0x00]);
        let mut cache = InstructionCache::new().expect("cache");
        cache.cache(0x8000, &bus).expect("ok");

        assert_eq!(
            cache.node(0x8000).expect("lda").required_flags,
            FLAG_Z | FLAG_V | FLAG_N
        );
        assert_eq!(cache.node(0x8002).expect("clc").required_flags, FLAG_ALL);
        assert_eq!(cache.node(0x8003).expect("brk").required_flags, FLAG_ALL);
        let _ = (FLAG_C, FLAG_V);
    }

    #[test]
    fn branch_targets_are_compiled_and_linked() {
        // $8000: LDX #$00
        // $8002: INX
        // $8003: BNE $8002
        // $8005: BRK
        let bus = bus_with(&[0xA2, 0x00, 0xE8, 0xD0, 0xFD, 0x00]);
        let mut cache = InstructionCache::new().expect("cache");
        cache.cache(0x8000, &bus).expect("ok");

        let bne = cache.node(0x8003).expect("bne");
        assert!(bne.branch);
        assert_eq!(bne.branch_address, 0x8002);
        assert!(bne.native_branch_offset.is_some());
        // The loop target was already compiled inside the same block, so
        // the link resolved without emitting a new one.
        assert!(cache.node(0x8002).expect("inx").native_offset.is_some());
        assert!(cache.node(0x8005).expect("brk").native_offset.is_some());
    }

    #[test]
    fn compiled_block_executes_and_reports_exit_pc() {
        // LDA #$42; STA $0200; JMP $8005
        let bus = bus_with(&[0xA9, 0x42, 0x8D, 0x00, 0x02, 0x4C, 0x05, 0x80]);
        let mut bus = bus;
        let mut cache = InstructionCache::new().expect("cache");
        let entry = cache.cache(0x8000, &bus).expect("ok").expect("entry");

        let mut state = CpuState::new();
        state.reset(&bus);
        let mut ctx = JitContext::new(&mut state, &mut bus);
        let remaining = unsafe { cache.run(entry, &mut ctx) };
        ctx.write_back(&mut state);

        // LDA (2) + STA (4) consumed; the JMP exits uncounted.
        assert_eq!(remaining, -runtime::QUANTUM + 6);
        assert_eq!(state.pc, 0x8005);
        assert_eq!(state.a, 0x42);
        assert_eq!(bus.peek(0x0200), 0x42);
    }

    #[test]
    fn compiled_loop_respects_quantum() {
        // $8000: INX
        // $8001: BNE $8000  -- spins 256x before X wraps to zero
        // $8003: BRK
        let bus = bus_with(&[0xE8, 0xD0, 0xFD, 0x00]);
        let mut bus = bus;
        let mut cache = InstructionCache::new().expect("cache");
        let entry = cache.cache(0x8000, &bus).expect("ok").expect("entry");

        let mut state = CpuState::new();
        state.reset(&bus);
        let mut ctx = JitContext::new(&mut state, &mut bus);
        let remaining = unsafe { cache.run(entry, &mut ctx) };
        ctx.write_back(&mut state);

        // 256 iterations cost 255*(2+3) + (2+2) = 1279 cycles, more than
        // the quantum: the block must have surrendered early with the
        // quantum spent (remaining >= 0) and PC inside the loop.
        assert!(remaining >= 0, "remaining quantum {remaining}");
        assert!(state.pc == 0x8000 || state.pc == 0x8003, "pc {:04x}", state.pc);
    }
}
