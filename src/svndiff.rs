
use std::io::Read;

use anyhow::Result;

use crate::line_buffer::LineBuffer;
use crate::sliding_window::SlidingView;
use crate::util::SvError::Delta;

//  svndiff0 applier
//
//  See http://svn.apache.org/repos/asf/subversion/trunk/notes/svndiff.
//
//  svndiff0 ::= 'SVN\0' window*;
//  window ::= int int int int int instructions inline_data;
//  int ::= highdigit* lowdigit;
//  highdigit ::= # binary 1000 0000 OR-ed with 7 bit value;
//  lowdigit ::= # 7 bit value;

const VLI_CONTINUE: u8 = 0x80;
const VLI_DIGIT_MASK: u8 = 0x7f;
const VLI_BITS_PER_DIGIT: u32 = 7;

const MAGIC: &[u8] = b"SVN\0";

/// Instruction opcodes, from the two high bits of the first byte.
const COPYFROM_SOURCE: u8 = 0;
const COPYFROM_TARGET: u8 = 1;
const COPYFROM_DATA: u8 = 2;

/// Apply a svndiff0 stream of exactly `delta_len` bytes read from `delta`
/// against `preimage`, returning the reconstructed post-image.
pub fn apply<R: Read, S: Read>(
    delta: &mut LineBuffer<R>,
    delta_len: u64,
    preimage: &mut SlidingView<S>,
) -> Result<Vec<u8>> {
    let mut remaining = delta_len;
    read_magic(delta, &mut remaining)?;
    let mut postimage = Vec::new();
    while remaining > 0 {
        apply_one_window(delta, &mut remaining, preimage, &mut postimage)?;
        if remaining > 0 && delta.at_eof() {
            return Err(Delta(format!("delta ends early ({} bytes remaining)", remaining)).into());
        }
    }
    Ok(postimage)
}

fn read_magic<R: Read>(delta: &mut LineBuffer<R>, remaining: &mut u64) -> Result<()> {
    if *remaining < MAGIC.len() as u64 {
        return Err(Delta("no file type header".to_string()).into());
    }
    let header = delta.read_string(MAGIC.len())?;
    if header != MAGIC {
        return Err(Delta(format!("unrecognized file type {:?}", header)).into());
    }
    *remaining -= MAGIC.len() as u64;
    Ok(())
}

/// Base-128 big-endian integer with the high bit set on continuation
/// bytes, read from the delta stream.
fn read_int<R: Read>(delta: &mut LineBuffer<R>, remaining: &mut u64) -> Result<u64> {
    let mut value = 0u64;
    while *remaining > 0 {
        let byte = delta
            .read_byte()?
            .ok_or_else(|| Delta(format!("delta ends early ({} bytes remaining)", remaining)))?;
        *remaining -= 1;
        value = value
            .checked_mul(1 << VLI_BITS_PER_DIGIT)
            .and_then(|v| v.checked_add(u64::from(byte & VLI_DIGIT_MASK)))
            .ok_or_else(|| Delta(format!("unrepresentable integer {}", value)))?;
        if byte & VLI_CONTINUE == 0 {
            return Ok(value);
        }
    }
    Err(Delta(format!("incomplete integer {}", value)).into())
}

/// The same integer encoding inside an instructions section.
fn parse_int(buf: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    while let Some((&byte, rest)) = buf.split_first() {
        *buf = rest;
        value = value
            .checked_mul(1 << VLI_BITS_PER_DIGIT)
            .and_then(|v| v.checked_add(u64::from(byte & VLI_DIGIT_MASK)))
            .ok_or_else(|| Delta(format!("unrepresentable integer {}", value)))?;
        if byte & VLI_CONTINUE == 0 {
            return Ok(value);
        }
    }
    Err(Delta(format!("incomplete integer {}", value)).into())
}

fn read_chunk<R: Read>(
    delta: &mut LineBuffer<R>,
    remaining: &mut u64,
    len: u64,
    what: &str,
) -> Result<Vec<u8>> {
    if len > *remaining {
        return Err(Delta(format!("incomplete {} section", what)).into());
    }
    let mut chunk = Vec::new();
    if delta.read_binary(&mut chunk, len)? != len {
        return Err(Delta(format!("incomplete {} section", what)).into());
    }
    *remaining -= len;
    Ok(chunk)
}

fn apply_one_window<R: Read, S: Read>(
    delta: &mut LineBuffer<R>,
    remaining: &mut u64,
    preimage: &mut SlidingView<S>,
    postimage: &mut Vec<u8>,
) -> Result<()> {
    let src_off = read_int(delta, remaining)?;
    let src_len = read_int(delta, remaining)?;
    let out_len = read_int(delta, remaining)? as usize;
    let instructions_len = read_int(delta, remaining)?;
    let data_len = read_int(delta, remaining)?;

    preimage.move_window(src_off, src_len)?;
    let instructions = read_chunk(delta, remaining, instructions_len, "instructions")?;
    let data = read_chunk(delta, remaining, data_len, "data")?;

    let mut out: Vec<u8> = Vec::with_capacity(out_len);
    let mut data_pos = 0usize;
    let mut insn = &instructions[..];
    while !insn.is_empty() {
        let first = insn[0];
        insn = &insn[1..];
        let op = first >> 6;
        let mut length = usize::from(first & 0x3f);
        if length == 0 {
            length = parse_int(&mut insn)? as usize;
        }
        match op {
            COPYFROM_SOURCE => {
                let offset = parse_int(&mut insn)? as usize;
                if offset + length > preimage.buf.len() {
                    return Err(Delta("copy source out of range".to_string()).into());
                }
                out.extend_from_slice(&preimage.buf[offset..offset + length]);
            }
            COPYFROM_TARGET => {
                let offset = parse_int(&mut insn)? as usize;
                if offset >= out.len() {
                    return Err(Delta("copy target out of range".to_string()).into());
                }
                // The region may overlap bytes this same instruction
                // produces, so copy one byte at a time.
                for i in 0..length {
                    let byte = out[offset + i];
                    out.push(byte);
                }
            }
            COPYFROM_DATA => {
                if data_pos + length > data.len() {
                    return Err(Delta("data too short".to_string()).into());
                }
                out.extend_from_slice(&data[data_pos..data_pos + length]);
                data_pos += length;
            }
            _ => return Err(Delta(format!("invalid instruction {:#04x}", first)).into()),
        }
    }
    if data_pos != data.len() {
        return Err(Delta("data left over in window".to_string()).into());
    }
    if out.len() != out_len {
        return Err(Delta(format!(
            "incorrect postimage length ({} produced, {} expected)",
            out.len(),
            out_len
        ))
        .into());
    }
    postimage.extend_from_slice(&out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(delta: &[u8], preimage: &[u8]) -> Result<Vec<u8>> {
        let mut input = LineBuffer::new(Cursor::new(delta.to_vec()));
        let mut view = SlidingView::new(Cursor::new(preimage.to_vec()));
        apply(&mut input, delta.len() as u64, &mut view)
    }

    /// window header ints followed by instructions and data.
    fn window(src_off: u8, src_len: u8, out_len: u8, insn: &[u8], data: &[u8]) -> Vec<u8> {
        let mut w = vec![src_off, src_len, out_len, insn.len() as u8, data.len() as u8];
        w.extend_from_slice(insn);
        w.extend_from_slice(data);
        w
    }

    #[test]
    fn identity_delta_reproduces_preimage() {
        // One window: copy all 8 source bytes, no inline data.
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 8, 8, &[0x08, 0x00], &[]));
        assert_eq!(run(&delta, b"AAAABBBB").unwrap(), b"AAAABBBB");
    }

    #[test]
    fn source_copy_then_inline_data() {
        // COPYFROM_SOURCE(8, 0) then COPYFROM_DATA(3) "CCC".
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 8, 11, &[0x08, 0x00, 0x83], b"CCC"));
        assert_eq!(run(&delta, b"AAAABBBB").unwrap(), b"AAAABBBBCCC");
    }

    #[test]
    fn self_referential_target_copy_expands_runs() {
        // Seed two bytes then copy 6 bytes from target offset 0: the copy
        // overlaps bytes it produces, expanding "ab" to "abababab".
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 0, 8, &[0x82, 0x46, 0x00], b"ab"));
        assert_eq!(run(&delta, b"").unwrap(), b"abababab");
    }

    #[test]
    fn multiple_windows_concatenate() {
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 4, 4, &[0x04, 0x00], &[]));
        delta.extend_from_slice(&window(4, 4, 4, &[0x04, 0x00], &[]));
        assert_eq!(run(&delta, b"wxyzWXYZ").unwrap(), b"wxyzWXYZ");
    }

    #[test]
    fn rejects_bad_magic() {
        let err = run(b"SVQ\0", b"").unwrap_err().to_string();
        assert!(err.contains("unrecognized file type"), "{}", err);
    }

    #[test]
    fn rejects_postimage_length_mismatch() {
        // Window claims 12 output bytes but produces 11.
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 8, 12, &[0x08, 0x00, 0x83], b"CCC"));
        let err = run(&delta, b"AAAABBBB").unwrap_err().to_string();
        assert!(err.contains("incorrect postimage length"), "{}", err);
    }

    #[test]
    fn rejects_leftover_inline_data() {
        // Two data bytes declared, only one consumed.
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 0, 1, &[0x81], b"xy"));
        let err = run(&delta, b"").unwrap_err().to_string();
        assert!(err.contains("data left over"), "{}", err);
    }

    #[test]
    fn rejects_source_copy_past_window() {
        // Copy 4 bytes at offset 6 of a 8-byte source view.
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&window(0, 8, 4, &[0x04, 0x06], &[]));
        let err = run(&delta, b"AAAABBBB").unwrap_err().to_string();
        assert!(err.contains("copy source out of range"), "{}", err);
    }

    #[test]
    fn rejects_truncated_stream() {
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&[0x00, 0x04, 0x04]);
        let err = run(&delta, b"wxyz").unwrap_err().to_string();
        assert!(err.contains("delta ends early") || err.contains("incomplete integer"), "{}", err);
    }

    #[test]
    fn reads_multibyte_integers() {
        // length 200 of inline data, encoded as 0x81 0x48.
        let mut insn = vec![0x80];
        insn.extend_from_slice(&[0x81, 0x48]);
        let data = vec![b'q'; 200];
        let mut delta = MAGIC.to_vec();
        delta.extend_from_slice(&[0x00, 0x00]);
        delta.push(0x81);
        delta.push(0x48); // out_len 200
        delta.push(insn.len() as u8);
        delta.push(0x81);
        delta.push(0x48); // data_len 200
        delta.extend_from_slice(&insn);
        delta.extend_from_slice(&data);
        assert_eq!(run(&delta, b"").unwrap(), data);
    }
}
