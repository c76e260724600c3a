/*!
6502 CPU core.

```text
state.rs      - registers, flags, stack, interrupt entry
opcodes.rs    - static descriptor table for the full opcode matrix
addressing.rs - operand resolution with page-cross reporting
interp.rs     - the cycle-accurate interpreter step
trace.rs      - execution trace ring + disassembler for backtraces
```

The dynamic recompiler lives in the top-level `jit` module; both execution
engines share the descriptor table and `CpuState`.
*/

pub mod addressing;
pub mod interp;
pub mod opcodes;
pub mod state;
pub mod trace;

pub use state::CpuState;
