/*!
Static 6502 instruction descriptor table.

One `Descriptor` per opcode 0..=255: instruction length, base cycle cost,
addressing mode, mnemonic, and the {C,Z,V,N} flag sets the instruction reads
and writes. The read/write flag sets drive the recompiler's backward
liveness pass; the interpreter uses length/cycles/mode for fetch and timing.

Conventions baked into the cycle column:
- Read-modify-write rows already include the unconditional extra cycle
  (e.g. ASL abs = 6, ASL abs,X = 7).
- Indexed stores already include their fifth cycle (STA abs,X = 5).
- Read-type ABX/ABY/INY rows hold the no-page-cross cost; the oops cycle is
  added at execution time (see `page_cross_penalty`).
- Branches hold the not-taken cost (2); taken/page-cross costs are added at
  execution time.
- Control transfers (BRK/JSR/RTI/RTS/JMP) read "all" flags so that the
  liveness pass materializes every flag before leaving a translated region.
*/

/// Liveness flag masks, in guest `P` bit positions.
pub const FLAG_C: u8 = 0x01;
pub const FLAG_Z: u8 = 0x02;
pub const FLAG_V: u8 = 0x40;
pub const FLAG_N: u8 = 0x80;
pub const FLAG_ALL: u8 = FLAG_C | FLAG_Z | FLAG_V | FLAG_N;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddrMode {
    Imp,
    Acc,
    Imm,
    Zpg,
    Zpx,
    Zpy,
    Rel,
    Abs,
    Abx,
    Aby,
    Ind,
    Inx,
    Iny,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx,
    Iny, Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp,
    Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay,
    Tsx, Txa, Txs, Tya,
    // Undocumented opcodes.
    Aac, Ane, Arr, Asr, Atx, Axs, Dcp, Isb, Kil, Las, Lax, Rla, Rra,
    Sax, Sha, Shs, Shx, Shy, Slo, Sre,
}

impl Mnemonic {
    /// Three-letter mnemonic for disassembly/backtraces.
    pub fn name(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC",
            Bcs => "BCS", Beq => "BEQ", Bit => "BIT", Bmi => "BMI",
            Bne => "BNE", Bpl => "BPL", Brk => "BRK", Bvc => "BVC",
            Bvs => "BVS", Clc => "CLC", Cld => "CLD", Cli => "CLI",
            Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR",
            Inc => "INC", Inx => "INX", Iny => "INY", Jmp => "JMP",
            Jsr => "JSR", Lda => "LDA", Ldx => "LDX", Ldy => "LDY",
            Lsr => "LSR", Nop => "NOP", Ora => "ORA", Pha => "PHA",
            Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC",
            Sec => "SEC", Sed => "SED", Sei => "SEI", Sta => "STA",
            Stx => "STX", Sty => "STY", Tax => "TAX", Tay => "TAY",
            Tsx => "TSX", Txa => "TXA", Txs => "TXS", Tya => "TYA",
            Aac => "AAC", Ane => "ANE", Arr => "ARR", Asr => "ASR",
            Atx => "ATX", Axs => "AXS", Dcp => "DCP", Isb => "ISB",
            Kil => "KIL", Las => "LAS", Lax => "LAX", Rla => "RLA",
            Rra => "RRA", Sax => "SAX", Sha => "SHA", Shs => "SHS",
            Shx => "SHX", Shy => "SHY", Slo => "SLO", Sre => "SRE",
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Descriptor {
    pub bytes: u8,
    pub cycles: u8,
    pub mode: AddrMode,
    pub mnemonic: Mnemonic,
    /// Flags this instruction reads (liveness sources).
    pub rflags: u8,
    /// Flags this instruction writes (liveness kills).
    pub wflags: u8,
    pub unofficial: bool,
    pub jam: bool,
}

const fn d(
    bytes: u8,
    cycles: u8,
    mode: AddrMode,
    mnemonic: Mnemonic,
    rflags: u8,
    wflags: u8,
) -> Descriptor {
    Descriptor {
        bytes,
        cycles,
        mode,
        mnemonic,
        rflags,
        wflags,
        unofficial: false,
        jam: false,
    }
}

const fn u(
    bytes: u8,
    cycles: u8,
    mode: AddrMode,
    mnemonic: Mnemonic,
    rflags: u8,
    wflags: u8,
) -> Descriptor {
    Descriptor {
        unofficial: true,
        ..d(bytes, cycles, mode, mnemonic, rflags, wflags)
    }
}

const fn jam() -> Descriptor {
    Descriptor {
        unofficial: true,
        jam: true,
        ..d(1, 0, AddrMode::Imp, Mnemonic::Kil, 0, 0)
    }
}

/// Whether a read-type instruction pays the oops cycle when its indexed
/// address computation crosses a page (ABX/ABY/INY modes only).
pub fn page_cross_penalty(mnemonic: Mnemonic) -> bool {
    use Mnemonic::*;
    matches!(
        mnemonic,
        Ora | And | Eor | Adc | Sbc | Cmp | Lda | Ldx | Ldy | Lax | Nop
    )
}

/// Whether this instruction is a read-modify-write memory operation
/// (double write-back, extra cycle already folded into the table).
pub fn is_rmw(mnemonic: Mnemonic) -> bool {
    use Mnemonic::*;
    matches!(
        mnemonic,
        Asl | Lsr | Rol | Ror | Inc | Dec | Dcp | Isb | Slo | Sre | Rla | Rra
    )
}

pub static OPCODES: [Descriptor; 256] = {
    use AddrMode::*;
    use Mnemonic::*;
    const C: u8 = FLAG_C;
    const Z: u8 = FLAG_Z;
    const V: u8 = FLAG_V;
    const N: u8 = FLAG_N;
    const CNZ: u8 = C | N | Z;
    const VNZ: u8 = V | N | Z;
    const CVNZ: u8 = C | V | N | Z;
    const NZ: u8 = N | Z;
    const ALL: u8 = FLAG_ALL;
    [
        // 0x00
        d(2, 7, Imp, Brk, ALL, 0),
        d(2, 6, AddrMode::Inx, Ora, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Inx, Slo, 0, CNZ),
        u(2, 3, Zpg, Nop, 0, 0),
        d(2, 3, Zpg, Ora, 0, NZ),
        d(2, 5, Zpg, Asl, 0, CNZ),
        u(2, 5, Zpg, Slo, 0, CNZ),
        d(1, 3, Imp, Php, ALL, 0),
        d(2, 2, Imm, Ora, 0, NZ),
        d(1, 2, Acc, Asl, 0, CNZ),
        u(2, 2, Imm, Aac, 0, CNZ),
        u(3, 4, Abs, Nop, 0, 0),
        d(3, 4, Abs, Ora, 0, NZ),
        d(3, 6, Abs, Asl, 0, CNZ),
        u(3, 6, Abs, Slo, 0, CNZ),
        // 0x10
        d(2, 2, Rel, Bpl, N, 0),
        d(2, 5, AddrMode::Iny, Ora, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Iny, Slo, 0, CNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, Ora, 0, NZ),
        d(2, 6, Zpx, Asl, 0, CNZ),
        u(2, 6, Zpx, Slo, 0, CNZ),
        d(1, 2, Imp, Clc, 0, C),
        d(3, 4, Aby, Ora, 0, NZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Slo, 0, CNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, Ora, 0, NZ),
        d(3, 7, Abx, Asl, 0, CNZ),
        u(3, 7, Abx, Slo, 0, CNZ),
        // 0x20
        d(3, 6, Abs, Jsr, ALL, 0),
        d(2, 6, AddrMode::Inx, And, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Inx, Rla, C, CNZ),
        d(2, 3, Zpg, Bit, 0, VNZ),
        d(2, 3, Zpg, And, 0, NZ),
        d(2, 5, Zpg, Rol, C, CNZ),
        u(2, 5, Zpg, Rla, C, CNZ),
        d(1, 4, Imp, Plp, 0, ALL),
        d(2, 2, Imm, And, 0, NZ),
        d(1, 2, Acc, Rol, C, CNZ),
        u(2, 2, Imm, Aac, 0, CNZ),
        d(3, 4, Abs, Bit, 0, VNZ),
        d(3, 4, Abs, And, 0, NZ),
        d(3, 6, Abs, Rol, C, CNZ),
        u(3, 6, Abs, Rla, C, CNZ),
        // 0x30
        d(2, 2, Rel, Bmi, N, 0),
        d(2, 5, AddrMode::Iny, And, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Iny, Rla, C, CNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, And, 0, NZ),
        d(2, 6, Zpx, Rol, C, CNZ),
        u(2, 6, Zpx, Rla, C, CNZ),
        d(1, 2, Imp, Sec, 0, C),
        d(3, 4, Aby, And, 0, NZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Rla, C, CNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, And, 0, NZ),
        d(3, 7, Abx, Rol, C, CNZ),
        u(3, 7, Abx, Rla, C, CNZ),
        // 0x40
        d(1, 6, Imp, Rti, ALL, 0),
        d(2, 6, AddrMode::Inx, Eor, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Inx, Sre, 0, CNZ),
        u(2, 3, Zpg, Nop, 0, 0),
        d(2, 3, Zpg, Eor, 0, NZ),
        d(2, 5, Zpg, Lsr, 0, CNZ),
        u(2, 5, Zpg, Sre, 0, CNZ),
        d(1, 3, Imp, Pha, 0, 0),
        d(2, 2, Imm, Eor, 0, NZ),
        d(1, 2, Acc, Lsr, 0, CNZ),
        u(2, 2, Imm, Asr, 0, CNZ),
        d(3, 3, Abs, Jmp, ALL, 0),
        d(3, 4, Abs, Eor, 0, NZ),
        d(3, 6, Abs, Lsr, 0, CNZ),
        u(3, 6, Abs, Sre, 0, CNZ),
        // 0x50
        d(2, 2, Rel, Bvc, V, 0),
        d(2, 5, AddrMode::Iny, Eor, 0, NZ),
        jam(),
        u(2, 8, AddrMode::Iny, Sre, 0, CNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, Eor, 0, NZ),
        d(2, 6, Zpx, Lsr, 0, CNZ),
        u(2, 6, Zpx, Sre, 0, CNZ),
        d(1, 2, Imp, Cli, 0, 0),
        d(3, 4, Aby, Eor, 0, NZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Sre, 0, CNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, Eor, 0, NZ),
        d(3, 7, Abx, Lsr, 0, CNZ),
        u(3, 7, Abx, Sre, 0, CNZ),
        // 0x60
        d(1, 6, Imp, Rts, ALL, 0),
        d(2, 6, AddrMode::Inx, Adc, C, CVNZ),
        jam(),
        u(2, 8, AddrMode::Inx, Rra, C, CVNZ),
        u(2, 3, Zpg, Nop, 0, 0),
        d(2, 3, Zpg, Adc, C, CVNZ),
        d(2, 5, Zpg, Ror, C, CNZ),
        u(2, 5, Zpg, Rra, C, CVNZ),
        d(1, 4, Imp, Pla, 0, NZ),
        d(2, 2, Imm, Adc, C, CVNZ),
        d(1, 2, Acc, Ror, C, CNZ),
        u(2, 2, Imm, Arr, C, CVNZ),
        d(3, 5, Ind, Jmp, ALL, 0),
        d(3, 4, Abs, Adc, C, CVNZ),
        d(3, 6, Abs, Ror, C, CNZ),
        u(3, 6, Abs, Rra, C, CVNZ),
        // 0x70
        d(2, 2, Rel, Bvs, V, 0),
        d(2, 5, AddrMode::Iny, Adc, C, CVNZ),
        jam(),
        u(2, 8, AddrMode::Iny, Rra, C, CVNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, Adc, C, CVNZ),
        d(2, 6, Zpx, Ror, C, CNZ),
        u(2, 6, Zpx, Rra, C, CVNZ),
        d(1, 2, Imp, Sei, 0, 0),
        d(3, 4, Aby, Adc, C, CVNZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Rra, C, CVNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, Adc, C, CVNZ),
        d(3, 7, Abx, Ror, C, CNZ),
        u(3, 7, Abx, Rra, C, CVNZ),
        // 0x80
        u(2, 2, Imm, Nop, 0, 0),
        d(2, 6, AddrMode::Inx, Sta, 0, 0),
        u(2, 2, Imm, Nop, 0, 0),
        u(2, 6, AddrMode::Inx, Sax, 0, 0),
        d(2, 3, Zpg, Sty, 0, 0),
        d(2, 3, Zpg, Sta, 0, 0),
        d(2, 3, Zpg, Stx, 0, 0),
        u(2, 3, Zpg, Sax, 0, 0),
        d(1, 2, Imp, Dey, 0, NZ),
        u(2, 2, Imm, Nop, 0, 0),
        d(1, 2, Imp, Txa, 0, NZ),
        u(2, 2, Imm, Ane, 0, 0),
        d(3, 4, Abs, Sty, 0, 0),
        d(3, 4, Abs, Sta, 0, 0),
        d(3, 4, Abs, Stx, 0, 0),
        u(3, 4, Abs, Sax, 0, 0),
        // 0x90
        d(2, 2, Rel, Bcc, C, 0),
        d(2, 6, AddrMode::Iny, Sta, 0, 0),
        jam(),
        u(2, 5, AddrMode::Iny, Sha, 0, 0),
        d(2, 4, Zpx, Sty, 0, 0),
        d(2, 4, Zpx, Sta, 0, 0),
        d(2, 4, Zpy, Stx, 0, 0),
        u(2, 4, Zpy, Sax, 0, 0),
        d(1, 2, Imp, Tya, 0, NZ),
        d(3, 5, Aby, Sta, 0, 0),
        d(1, 2, Imp, Txs, 0, 0),
        u(3, 4, Aby, Shs, 0, 0),
        u(3, 4, Abx, Shy, 0, 0),
        d(3, 5, Abx, Sta, 0, 0),
        u(3, 4, Aby, Shx, 0, 0),
        u(3, 4, Aby, Sha, 0, 0),
        // 0xA0
        d(2, 2, Imm, Ldy, 0, NZ),
        d(2, 6, AddrMode::Inx, Lda, 0, NZ),
        d(2, 2, Imm, Ldx, 0, NZ),
        u(2, 6, AddrMode::Inx, Lax, 0, NZ),
        d(2, 3, Zpg, Ldy, 0, NZ),
        d(2, 3, Zpg, Lda, 0, NZ),
        d(2, 3, Zpg, Ldx, 0, NZ),
        u(2, 3, Zpg, Lax, 0, NZ),
        d(1, 2, Imp, Tay, 0, NZ),
        d(2, 2, Imm, Lda, 0, NZ),
        d(1, 2, Imp, Tax, 0, NZ),
        u(2, 2, Imm, Atx, 0, NZ),
        d(3, 4, Abs, Ldy, 0, NZ),
        d(3, 4, Abs, Lda, 0, NZ),
        d(3, 4, Abs, Ldx, 0, NZ),
        u(3, 4, Abs, Lax, 0, NZ),
        // 0xB0
        d(2, 2, Rel, Bcs, C, 0),
        d(2, 5, AddrMode::Iny, Lda, 0, NZ),
        jam(),
        u(2, 5, AddrMode::Iny, Lax, 0, NZ),
        d(2, 4, Zpx, Ldy, 0, NZ),
        d(2, 4, Zpx, Lda, 0, NZ),
        d(2, 4, Zpy, Ldx, 0, NZ),
        u(2, 4, Zpy, Lax, 0, NZ),
        d(1, 2, Imp, Clv, 0, V),
        d(3, 4, Aby, Lda, 0, NZ),
        d(1, 2, Imp, Tsx, 0, NZ),
        u(3, 4, Aby, Las, 0, 0),
        d(3, 4, Abx, Ldy, 0, NZ),
        d(3, 4, Abx, Lda, 0, NZ),
        d(3, 4, Aby, Ldx, 0, NZ),
        u(3, 4, Aby, Lax, 0, NZ),
        // 0xC0
        d(2, 2, Imm, Cpy, 0, CNZ),
        d(2, 6, AddrMode::Inx, Cmp, 0, CNZ),
        u(2, 2, Imm, Nop, 0, 0),
        u(2, 8, AddrMode::Inx, Dcp, 0, CNZ),
        d(2, 3, Zpg, Cpy, 0, CNZ),
        d(2, 3, Zpg, Cmp, 0, CNZ),
        d(2, 5, Zpg, Dec, 0, NZ),
        u(2, 5, Zpg, Dcp, 0, CNZ),
        d(1, 2, Imp, Mnemonic::Iny, 0, NZ),
        d(2, 2, Imm, Cmp, 0, CNZ),
        d(1, 2, Imp, Dex, 0, NZ),
        u(2, 2, Imm, Axs, 0, CNZ),
        d(3, 4, Abs, Cpy, 0, CNZ),
        d(3, 4, Abs, Cmp, 0, CNZ),
        d(3, 6, Abs, Dec, 0, NZ),
        u(3, 6, Abs, Dcp, 0, CNZ),
        // 0xD0
        d(2, 2, Rel, Bne, Z, 0),
        d(2, 5, AddrMode::Iny, Cmp, 0, CNZ),
        jam(),
        u(2, 8, AddrMode::Iny, Dcp, 0, CNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, Cmp, 0, CNZ),
        d(2, 6, Zpx, Dec, 0, NZ),
        u(2, 6, Zpx, Dcp, 0, CNZ),
        d(1, 2, Imp, Cld, 0, 0),
        d(3, 4, Aby, Cmp, 0, CNZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Dcp, 0, CNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, Cmp, 0, CNZ),
        d(3, 7, Abx, Dec, 0, NZ),
        u(3, 7, Abx, Dcp, 0, CNZ),
        // 0xE0
        d(2, 2, Imm, Cpx, 0, CNZ),
        d(2, 6, AddrMode::Inx, Sbc, C, CVNZ),
        u(2, 2, Imm, Nop, 0, 0),
        u(2, 8, AddrMode::Inx, Isb, C, CVNZ),
        d(2, 3, Zpg, Cpx, 0, CNZ),
        d(2, 3, Zpg, Sbc, C, CVNZ),
        d(2, 5, Zpg, Inc, 0, NZ),
        u(2, 5, Zpg, Isb, C, CVNZ),
        d(1, 2, Imp, Mnemonic::Inx, 0, NZ),
        d(2, 2, Imm, Sbc, C, CVNZ),
        d(1, 2, Imp, Nop, 0, 0),
        u(2, 2, Imm, Sbc, C, CVNZ),
        d(3, 4, Abs, Cpx, 0, CNZ),
        d(3, 4, Abs, Sbc, C, CVNZ),
        d(3, 6, Abs, Inc, 0, NZ),
        u(3, 6, Abs, Isb, C, CVNZ),
        // 0xF0
        d(2, 2, Rel, Beq, Z, 0),
        d(2, 5, AddrMode::Iny, Sbc, C, CVNZ),
        jam(),
        u(2, 8, AddrMode::Iny, Isb, C, CVNZ),
        u(2, 4, Zpx, Nop, 0, 0),
        d(2, 4, Zpx, Sbc, C, CVNZ),
        d(2, 6, Zpx, Inc, 0, NZ),
        u(2, 6, Zpx, Isb, C, CVNZ),
        d(1, 2, Imp, Sed, 0, 0),
        d(3, 4, Aby, Sbc, C, CVNZ),
        u(1, 2, Imp, Nop, 0, 0),
        u(3, 7, Aby, Isb, C, CVNZ),
        u(3, 4, Abx, Nop, 0, 0),
        d(3, 4, Abx, Sbc, C, CVNZ),
        d(3, 7, Abx, Inc, 0, NZ),
        u(3, 7, Abx, Isb, C, CVNZ),
    ]
};
