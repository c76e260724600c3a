/*!
Per-mapper register files and bank-switching logic.

Each module exposes free functions operating on a detached register file
plus the generic bank helpers of `Mapper`:
- `power_on(&mut Mapper, &mut Regs)`: initial geometry and banks.
- `store_prg(&mut Mapper, &mut Regs, addr, val)`: CPU writes in
  $8000-$FFFF.
- `mmc3::notify_scanline`: the scanline-counted IRQ source.
*/

pub mod cnrom;
pub mod mmc1;
pub mod mmc3;
pub mod nrom;

pub use cnrom::Cnrom;
pub use mmc1::Mmc1;
pub use mmc3::Mmc3;
