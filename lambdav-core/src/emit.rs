//! Word-level SPIR-V instruction encoding.
//!
//! Every instruction is a single `(wordCount << 16) | opcode` word followed
//! by its operand words; the word count includes the opcode word itself.

use spirv::Op;

/// Append one instruction to `buf`.
pub fn instr(buf: &mut Vec<u32>, op: Op, operands: &[u32]) {
    buf.push(((operands.len() as u32 + 1) << 16) | op as u32);
    buf.extend_from_slice(operands);
}

/// Pack a string little-endian into successive words. The trailing NUL is
/// always emitted, so a string filling its last word gets one extra zero
/// word. Returns the number of words written.
pub fn pack_string(out: &mut Vec<u32>, text: &str) -> u32 {
    let mut count = 0;
    let mut current = 0u32;
    let mut byte_index = 0;
    for &byte in text.as_bytes() {
        current |= u32::from(byte) << (byte_index * 8);
        byte_index += 1;
        if byte_index == 4 {
            out.push(current);
            count += 1;
            current = 0;
            byte_index = 0;
        }
    }

    out.push(current);
    count + 1
}
