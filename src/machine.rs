/*!
Machine: the CPU/PPU co-scheduler and top-level fault handler.

One `Machine` value owns every subsystem (CPU state, bus with PPU and
mapper, recompiler cache, trace ring) and is threaded through all of
them; there are no globals. The emulation loop is strictly sequential:

```text
service pending NMI/IRQ at the instruction boundary
run a compiled block at PC, if the recompiler has one (quantum 1000)
always execute one interpreter step
catch the PPU up (three dots per elapsed CPU cycle)
latch the PPU's vblank NMI edge and the mapper IRQ line
publish a finished frame and pace to the host frame rate
honor paused (100 ms sleeps) and quit
```

Faults (`UnsupportedInstruction`, `JammingInstruction`,
`CodeBufferFull`) are caught at the loop boundary: a backtrace of the
last executed instructions is logged, quit is signalled so the peers shut
down, and the error is returned for a nonzero process exit.
*/

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::bus::Bus;
use crate::cartridge::Cartridge;
use crate::controller::ButtonState;
use crate::cpu::interp;
use crate::cpu::state::{CpuState, IRQ_DISABLE};
use crate::cpu::trace::TraceBuffer;
#[cfg(all(target_arch = "x86_64", unix))]
use crate::cpu::trace::TraceEntry;
use crate::error::EmuError;
use crate::events::Events;

#[cfg(all(target_arch = "x86_64", unix))]
use crate::jit::{InstructionCache, JitContext, QUANTUM};

/// NTSC frame period (~60.10 Hz).
const FRAME_PERIOD: Duration = Duration::from_nanos(16_639_267);

/// Paces frame publication to the host refresh rate.
struct FrameTimer {
    next: Instant,
}

impl FrameTimer {
    fn new() -> Self {
        Self {
            next: Instant::now() + FRAME_PERIOD,
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if let Some(remaining) = self.next.checked_duration_since(now) {
            std::thread::sleep(remaining);
        }
        self.next += FRAME_PERIOD;
        // After a long stall (pause, debugger) don't try to catch up.
        if self.next < Instant::now() {
            self.next = Instant::now() + FRAME_PERIOD;
        }
    }
}

pub struct Machine {
    state: CpuState,
    bus: Bus,
    trace: TraceBuffer,
    events: Arc<Events>,
    #[cfg(all(target_arch = "x86_64", unix))]
    jit: Option<InstructionCache>,
    frame_sink: Option<Arc<Mutex<Vec<u8>>>>,
    timer: FrameTimer,
    pace: bool,
}

impl Machine {
    pub fn new(cartridge: Cartridge, events: Arc<Events>, jit_enabled: bool) -> Self {
        #[cfg(all(target_arch = "x86_64", unix))]
        let jit = if jit_enabled {
            match InstructionCache::new() {
                Ok(cache) => Some(cache),
                Err(e) => {
                    error!("recompiler unavailable ({e}); falling back to the interpreter");
                    None
                }
            }
        } else {
            None
        };
        #[cfg(not(all(target_arch = "x86_64", unix)))]
        if jit_enabled {
            log::warn!("recompiler not supported on this host; using the interpreter");
        }

        Self {
            state: CpuState::new(),
            bus: Bus::new(cartridge),
            trace: TraceBuffer::new(),
            events,
            #[cfg(all(target_arch = "x86_64", unix))]
            jit,
            frame_sink: None,
            timer: FrameTimer::new(),
            pace: true,
        }
    }

    /// Shared button state for the input thread.
    pub fn buttons(&self) -> Arc<ButtonState> {
        self.bus.controller.buttons()
    }

    /// Install a destination for finished frames (RGBA, 256x240).
    pub fn set_frame_sink(&mut self, sink: Arc<Mutex<Vec<u8>>>) {
        self.frame_sink = Some(sink);
    }

    /// Disable host-rate pacing (tests, benchmarking).
    pub fn set_unpaced(&mut self) {
        self.pace = false;
    }

    pub fn cpu(&self) -> &CpuState {
        &self.state
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Power-on: registers to their reset values, PC from the reset
    /// vector, PPU cleared.
    pub fn power_on(&mut self) {
        self.state.clear();
        self.state.reset(&self.bus);
        self.bus.ppu.clear();
        info!("power-on: pc={:#06x}", self.state.pc);
    }

    /// Run until quit or a fatal fault.
    pub fn run(&mut self) -> Result<(), EmuError> {
        self.power_on();
        let result = self.run_loop();
        if let Err(e) = &result {
            error!("fatal error (core): {e}");
            self.trace.backtrace();
            self.events.quit();
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), EmuError> {
        loop {
            self.step()?;

            if let Some(frame) = self.bus.ppu.take_frame() {
                if let Some(sink) = &self.frame_sink {
                    if let Ok(mut front) = sink.lock() {
                        if front.len() == frame.len() {
                            front.copy_from_slice(frame);
                        }
                    }
                }
                if self.pace {
                    self.timer.wait();
                }
            }

            while self.events.is_paused() && !self.events.is_quit() {
                std::thread::sleep(Duration::from_millis(100));
            }
            if self.events.is_quit() {
                info!("quit after {} cycles", self.state.cycles);
                return Ok(());
            }
        }
    }

    /// One scheduler iteration: interrupts, an optional compiled block,
    /// one interpreter step, PPU catch-up and interrupt latching.
    pub fn step(&mut self) -> Result<(), EmuError> {
        if self.state.nmi {
            self.state.service_nmi(&mut self.bus);
        } else if self.state.irq && !self.state.flag(IRQ_DISABLE) {
            self.state.service_irq(&mut self.bus);
        }

        self.try_jit_block()?;
        interp::step(&mut self.state, &mut self.bus, &mut self.trace)?;

        // The PPU advances three dots per CPU cycle behind the counter.
        self.bus.ppu.sync(self.state.cycles);
        if self.bus.ppu.take_nmi() {
            self.state.nmi = true;
        }
        if self.bus.mapper().borrow_mut().take_irq() {
            self.state.irq = true;
        }
        Ok(())
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    fn try_jit_block(&mut self) -> Result<(), EmuError> {
        let Some(jit) = self.jit.as_mut() else {
            return Ok(());
        };
        let Some(entry) = jit.cache(self.state.pc, &self.bus)? else {
            return Ok(());
        };

        let pc = self.state.pc;
        self.trace.record(TraceEntry::capture(
            &self.state,
            self.bus.peek(pc),
            self.bus.peek(pc.wrapping_add(1)),
            self.bus.peek(pc.wrapping_add(2)),
        ));

        let mut ctx = JitContext::new(&mut self.state, &mut self.bus);
        let remaining = unsafe { jit.run(entry, &mut ctx) };
        ctx.write_back(&mut self.state);
        self.state.cycles += (QUANTUM + remaining) as u64;
        Ok(())
    }

    #[cfg(not(all(target_arch = "x86_64", unix)))]
    fn try_jit_block(&mut self) -> Result<(), EmuError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_nrom_with_prg;

    fn machine_with(prg: &[u8], jit: bool) -> Machine {
        let rom = build_nrom_with_prg(prg, 1, 1, None);
        let cart = Cartridge::from_ines_bytes(&rom).expect("parse");
        let mut machine = Machine::new(cart, Events::new(), jit);
        machine.set_unpaced();
        machine.power_on();
        machine
    }

    #[test]
    fn fatal_fault_signals_quit() {
        // KIL right at reset.
        let rom = build_nrom_with_prg(&[0x02], 1, 1, None);
        let cart = Cartridge::from_ines_bytes(&rom).expect("parse");
        let events = Events::new();
        let mut machine = Machine::new(cart, Arc::clone(&events), false);
        machine.set_unpaced();
        let err = machine.run().unwrap_err();
        assert!(matches!(err, EmuError::JammingInstruction { opcode: 0x02, .. }));
        assert!(events.is_quit());
    }

    #[test]
    fn quit_flag_stops_the_loop() {
        let mut machine = machine_with(&[0x4C, 0x00, 0x80], false); // JMP $8000
        machine.events.quit();
        assert!(machine.run().is_ok());
    }

    #[test]
    fn nmi_is_latched_from_the_ppu_and_serviced() {
        // Enable NMI, then spin. The NMI vector points at $8000 too, so
        // observe servicing through the cycle counter and stack writes.
        let prg = [
            0xA9, 0x80, // LDA #$80
            0x8D, 0x00, 0x20, // STA $2000  (enable vblank NMI)
            0x4C, 0x05, 0x80, // JMP $8005
        ];
        let mut machine = machine_with(&prg, false);
        // One frame is 29780.5 CPU cycles; run well past it.
        for _ in 0..40_000 {
            machine.step().expect("step");
        }
        // The interrupt pushed a return address into page 1.
        assert!(machine.cpu().sp < 0xFD);
        assert!(machine.cpu().flag(IRQ_DISABLE));
    }

    /// Deterministic program exercising loads, stores, arithmetic,
    /// branches, subroutines and RMW; ends in an idle loop.
    fn bisim_program() -> Vec<u8> {
        vec![
            0xA2, 0x00, // 8000: LDX #$00
            0x8A, // 8002: TXA
            0x18, // 8003: CLC
            0x69, 0x17, // 8004: ADC #$17
            0x9D, 0x00, 0x02, // 8006: STA $0200,X
            0x5D, 0x00, 0x02, // 8009: EOR $0200,X
            0xE8, // 800C: INX
            0xD0, 0xF4, // 800D: BNE $8003
            0x20, 0x20, 0x80, // 800F: JSR $8020
            0xA5, 0x10, // 8012: LDA $10
            0xC9, 0x30, // 8014: CMP #$30
            0xF0, 0x01, // 8016: BEQ $8019
            0xEA, // 8018: NOP
            0x4C, 0x19, 0x80, // 8019: JMP $8019 (idle)
            0xEA, 0xEA, 0xEA, 0xEA, // padding to $8020
            0xE6, 0x10, // 8020: INC $10
            0x38, // 8022: SEC
            0x6A, // 8023: ROR A
            0x60, // 8024: RTS
        ]
    }

    /// Step until the program parks on its idle loop with a healthy
    /// cycle count behind it.
    fn run_to(machine: &mut Machine, idle: u16) {
        for _ in 0..200_000 {
            machine.step().expect("step");
            if machine.cpu().pc == idle && machine.cpu().cycles >= 10_000 {
                return;
            }
        }
        panic!("program never reached the idle loop");
    }

    #[test]
    fn interpreter_reaches_idle_deterministically() {
        let mut a = machine_with(&bisim_program(), false);
        let mut b = machine_with(&bisim_program(), false);
        run_to(&mut a, 0x8019);
        run_to(&mut b, 0x8019);
        assert_eq!(a.cpu().cycles, b.cpu().cycles);
        assert_eq!(a.cpu().a, b.cpu().a);
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    fn assert_bisimulation(program: &[u8], idle: u16) {
        let mut interp_only = machine_with(program, false);
        let mut jitted = machine_with(program, true);
        run_to(&mut interp_only, idle);
        run_to(&mut jitted, idle);

        let (a, b) = (interp_only.cpu(), jitted.cpu());
        assert_eq!(a.pc, b.pc);
        assert_eq!(a.a, b.a);
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, b.y);
        assert_eq!(a.p, b.p);
        assert_eq!(a.sp, b.sp);
        assert_eq!(a.cycles, b.cycles);

        for addr in 0x0000..0x0800u16 {
            assert_eq!(
                interp_only.bus().peek(addr),
                jitted.bus().peek(addr),
                "ram divergence at {addr:#06x}"
            );
        }
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn jit_and_interpreter_bisimulate() {
        assert_bisimulation(&bisim_program(), 0x8019);
    }

    /// Second bisimulation workload: zero-page pointers, the stack, RMW
    /// memory traffic and the stable undocumented loads/stores.
    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn jit_and_interpreter_bisimulate_pointer_and_stack_ops() {
        let program = vec![
            0xA9, 0xFF, // 8000: LDA #$FF
            0x85, 0x30, // 8002: STA $30      (outer counter)
            0xA9, 0x00, // 8004: LDA #$00     <- loop target
            0x85, 0x10, // 8006: STA $10
            0xA9, 0x03, // 8008: LDA #$03
            0x85, 0x11, // 800A: STA $11      (pointer $10 -> $0300)
            0xA0, 0x05, // 800C: LDY #$05
            0xA9, 0x77, // 800E: LDA #$77
            0x91, 0x10, // 8010: STA ($10),Y
            0xB1, 0x10, // 8012: LDA ($10),Y
            0xA2, 0x04, // 8014: LDX #$04
            0xA1, 0x0C, // 8016: LDA ($0C,X)
            0x48, // 8018: PHA
            0x08, // 8019: PHP
            0x28, // 801A: PLP
            0x68, // 801B: PLA
            0x06, 0x20, // 801C: ASL $20
            0xE6, 0x20, // 801E: INC $20
            0xA5, 0x20, // 8020: LDA $20
            0xC5, 0x20, // 8022: CMP $20
            0xF0, 0x01, // 8024: BEQ $8027
            0xEA, // 8026: NOP (skipped)
            0x24, 0x20, // 8027: BIT $20
            0x38, // 8029: SEC
            0xE9, 0x01, // 802A: SBC #$01
            0x4A, // 802C: LSR A
            0x2A, // 802D: ROL A
            0x6A, // 802E: ROR A
            0x0A, // 802F: ASL A
            0x85, 0x21, // 8030: STA $21
            0xA7, 0x21, // 8032: LAX $21
            0x87, 0x22, // 8034: SAX $22
            0xB6, 0x22, // 8036: LDX $22,Y
            0x94, 0x23, // 8038: STY $23,X
            0xC6, 0x30, // 803A: DEC $30
            0xD0, 0xC6, // 803C: BNE $8004
            0x4C, 0x3E, 0x80, // 803E: JMP $803E (idle)
        ];
        assert_bisimulation(&program, 0x803E);
    }
}
