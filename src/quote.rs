
use std::io::{self, Write};

//  C-style name quoting for fast-import paths.  A path is written verbatim
//  unless some byte needs escaping, in which case the whole path is
//  wrapped in double quotes with backslash escapes.

enum Escape {
    /// Byte passes through untouched.
    Plain,
    /// Byte forces quoting and is written as `\c`.
    Named(u8),
    /// Byte forces quoting and is written as three-digit octal.
    Octal,
}

fn classify(byte: u8) -> Escape {
    match byte {
        0x07 => Escape::Named(b'a'),
        0x08 => Escape::Named(b'b'),
        b'\t' => Escape::Named(b't'),
        b'\n' => Escape::Named(b'n'),
        0x0b => Escape::Named(b'v'),
        0x0c => Escape::Named(b'f'),
        b'\r' => Escape::Named(b'r'),
        b'"' => Escape::Named(b'"'),
        b'\\' => Escape::Named(b'\\'),
        0x00..=0x1f | 0x7f.. => Escape::Octal,
        _ => Escape::Plain,
    }
}

fn must_quote(byte: u8) -> bool {
    !matches!(classify(byte), Escape::Plain)
}

/// Write `name` to `out`, C-quoted iff any byte requires it.
pub fn quote_c_style<W: Write>(name: &[u8], out: &mut W) -> io::Result<()> {
    if !name.iter().copied().any(must_quote) {
        return out.write_all(name);
    }
    out.write_all(b"\"")?;
    for &byte in name {
        match classify(byte) {
            Escape::Plain => out.write_all(&[byte])?,
            Escape::Named(c) => out.write_all(&[b'\\', c])?,
            Escape::Octal => out.write_all(&[
                b'\\',
                b'0' + ((byte >> 6) & 0o3),
                b'0' + ((byte >> 3) & 0o7),
                b'0' + (byte & 0o7),
            ])?,
        }
    }
    out.write_all(b"\"")
}
