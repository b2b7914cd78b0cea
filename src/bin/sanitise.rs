
//! Rewrites the path strings in a tree-operation trace to interned ids,
//! so two traces can be compared modulo file renames.  Understands the
//! command language used by the offline tests:
//!
//!   copy <rev>:"<src>" "<dst>"
//!   add "<path>"
//!   modify "<path>"
//!   delete "<path>"
//!   commit <rev>

use std::io::{self, BufRead, Write};
use std::process;

use anyhow::{bail, Context, Result};

use svn_fe::string_pool::{StringPool, MAX_PATH_DEPTH};
use svn_fe::util::FATAL_EXIT_CODE;

/// The text between the next pair of double quotes, and the rest of the
/// line after the closing quote.
fn quoted<'a>(line: &'a str) -> Result<(&'a str, &'a str)> {
    let open = line.find('"').context("missing opening quote")?;
    let rest = &line[open + 1..];
    let close = rest.find('"').context("missing closing quote")?;
    Ok((&rest[..close], &rest[close + 1..]))
}

fn write_ids(out: &mut impl Write, pool: &mut StringPool, path: &str) -> Result<()> {
    let ids = pool.tokenize(path.as_bytes(), b"/", MAX_PATH_DEPTH)?;
    let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    write!(out, "\"{}\"", rendered.join("/"))?;
    Ok(())
}

fn sanitise(input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
    let mut pool = StringPool::new();
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches('\n');
        let (cmd, args) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        match cmd {
            "copy" => {
                let rev = args.split(':').next().context("missing copy revision")?;
                let (src, rest) = quoted(args)?;
                let (dst, _) = quoted(rest)?;
                write!(out, "copy {}:", rev)?;
                write_ids(out, &mut pool, src)?;
                out.write_all(b" ")?;
                write_ids(out, &mut pool, dst)?;
                out.write_all(b"\n")?;
            }
            "add" | "modify" | "delete" => {
                let (path, _) = quoted(args)?;
                write!(out, "{} ", cmd)?;
                write_ids(out, &mut pool, path)?;
                out.write_all(b"\n")?;
            }
            "commit" => {
                writeln!(out, "commit {}", args)?;
            }
            "" => {}
            other => bail!("unknown command: {}", other),
        }
    }
}

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = stdin.lock();
    let mut out = io::BufWriter::new(stdout.lock());
    if let Err(e) = sanitise(&mut input, &mut out) {
        eprintln!("fatal: {:#}", e);
        process::exit(FATAL_EXIT_CODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(text: &str) -> String {
        let mut out = Vec::new();
        sanitise(&mut Cursor::new(text.as_bytes().to_vec()), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn rewrites_paths_to_ids() {
        let text = run("add \"trunk/a\"\nmodify \"trunk/a\"\ndelete \"trunk/b\"\n");
        // Same components map to the same ids across lines.
        assert_eq!(text, "add \"0/1\"\nmodify \"0/1\"\ndelete \"0/2\"\n");
    }

    #[test]
    fn copy_keeps_revision_and_maps_both_paths() {
        let text = run("copy 3:\"a/x\" \"b/x\"\ncommit 4\n");
        assert_eq!(text, "copy 3:\"0/1\" \"2/1\"\ncommit 4\n");
    }

    #[test]
    fn unknown_commands_fail() {
        let mut out = Vec::new();
        assert!(sanitise(&mut Cursor::new(b"frobnicate \"x\"\n".to_vec()), &mut out).is_err());
    }
}
