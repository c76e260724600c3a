/*!
Dynamic recompiler: online translation of 6502 blocks to x86-64.

```text
buffer.rs    - page-aligned RWX code buffer, offset-addressed
x86.rs       - small x86-64 emitter with patchable rel32 jumps
cache.rs     - per-PC node table, discovery, liveness, linking
translate.rs - per-instruction host code generation
runtime.rs   - block entry/exit trampoline and bus thunks
```

Only compiled on x86-64 unix hosts; everywhere else the machine runs
interpreter-only. The interpreter remains authoritative for everything
the recompiler does not translate (control transfers, undocumented RMW
compositions, faults) — compiled blocks exit back to the scheduler, which
always runs at least one interpreter step per iteration.
*/

pub mod buffer;
pub mod cache;
pub mod runtime;
pub mod translate;
pub mod x86;

pub use cache::InstructionCache;
pub use runtime::{JitContext, QUANTUM};
