
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::line_buffer::LineBuffer;
use crate::quote::quote_c_style;
use crate::repo_tree::NodeMode;
use crate::sliding_window::SlidingView;
use crate::string_pool::StringPool;
use crate::svndiff;
use crate::util::SvError::{Backchannel, Delta, Dump};

/// Length of the "link " prefix svn stores in front of symlink targets.
const LINK_PREFIX_LEN: u64 = 5;

fn cat_blob_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{40} blob ([0-9]+)$")
            .expect("Error parsing cat-blob header regular expression")
    })
}

/// Formats and writes the fast-import command stream, and owns the
/// back-channel the importer answers `cat-blob` queries on.
pub struct FastExport<W: Write> {
    out: W,
    backchannel: Option<LineBuffer<Box<dyn Read>>>,
    first_commit_done: bool,
}

impl<W: Write> FastExport<W> {
    pub fn new(out: W, backchannel: Option<Box<dyn Read>>) -> Self {
        FastExport {
            out,
            backchannel: backchannel.map(LineBuffer::new),
            first_commit_done: false,
        }
    }

    fn write_path(&mut self, strings: &StringPool, path: &[u32]) -> Result<()> {
        let joined = strings.join(path, b'/');
        quote_c_style(&joined, &mut self.out)?;
        Ok(())
    }

    pub fn delete(&mut self, strings: &StringPool, path: &[u32]) -> Result<()> {
        self.out.write_all(b"D ")?;
        self.write_path(strings, path)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn modify(
        &mut self,
        strings: &StringPool,
        path: &[u32],
        mode: NodeMode,
        mark: u32,
    ) -> Result<()> {
        write!(self.out, "M {:06o} :{} ", mode.as_octal(), mark)?;
        self.write_path(strings, path)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Everything of the commit command up to and including the point
    /// where the tree diff's `M`/`D` lines belong.
    #[allow(clippy::too_many_arguments)]
    pub fn begin_commit(
        &mut self,
        strings: &StringPool,
        revision: u32,
        author: Option<u32>,
        log: &[u8],
        uuid: Option<u32>,
        url: Option<u32>,
        timestamp: i64,
    ) -> Result<()> {
        let author = author.map(|id| strings.fetch(id)).unwrap_or(b"nobody");
        let domain = uuid.map(|id| strings.fetch(id)).unwrap_or(b"local");
        let gitsvnline = match (uuid, url) {
            (Some(uuid), Some(url)) => {
                let mut line = b"\n\ngit-svn-id: ".to_vec();
                line.extend_from_slice(strings.fetch(url));
                line.extend_from_slice(format!("@{} ", revision).as_bytes());
                line.extend_from_slice(strings.fetch(uuid));
                line.push(b'\n');
                line
            }
            _ => Vec::new(),
        };
        self.out.write_all(b"commit refs/heads/master\n")?;
        self.out.write_all(b"committer ")?;
        self.out.write_all(author)?;
        self.out.write_all(b" <")?;
        self.out.write_all(author)?;
        self.out.write_all(b"@")?;
        self.out.write_all(domain)?;
        write!(self.out, "> {} +0000\n", timestamp)?;
        write!(self.out, "data {}\n", log.len() + gitsvnline.len())?;
        self.out.write_all(log)?;
        self.out.write_all(&gitsvnline)?;
        self.out.write_all(b"\n")?;
        if !self.first_commit_done {
            if revision > 1 {
                self.out.write_all(b"from refs/heads/master^0\n")?;
            }
            self.first_commit_done = true;
        }
        Ok(())
    }

    pub fn end_commit(&mut self, revision: u32) -> Result<()> {
        self.out.write_all(b"\n")?;
        write!(self.out, "progress Imported commit {}.\n\n", revision)?;
        Ok(())
    }

    /// Emit a `blob` command for `mark`, reading its body (`len` bytes)
    /// from the dump input.  With `delta`, the body is a svndiff0 stream
    /// applied against the blob behind `src_mark`, retrieved over the
    /// back-channel; symlink blobs lose their "link " prefix on the way
    /// out and grow one on the way in.
    pub fn blob<R: Read>(
        &mut self,
        input: &mut LineBuffer<R>,
        mode: NodeMode,
        mark: u32,
        len: u64,
        delta: bool,
        src_mark: u32,
        src_mode: NodeMode,
    ) -> Result<()> {
        if delta {
            let mut preimage = tempfile::tempfile()?;
            if src_mark != 0 {
                debug!(src_mark, "fetching delta base");
                write!(self.out, "cat-blob :{}\n", src_mark)?;
                self.out.flush()?;
                if src_mode == NodeMode::Symlink {
                    preimage.write_all(b"link ")?;
                }
                self.save_blob(&mut preimage)?;
            }
            preimage.seek(SeekFrom::Start(0))?;
            let mut view = SlidingView::new(preimage);
            let mut postimage = svndiff::apply(input, len, &mut view)?;
            if mode == NodeMode::Symlink {
                if (postimage.len() as u64) < LINK_PREFIX_LEN {
                    return Err(Delta("symlink blob shorter than its prefix".into()).into());
                }
                postimage.drain(..LINK_PREFIX_LEN as usize);
            }
            write!(self.out, "blob\nmark :{}\ndata {}\n", mark, postimage.len())?;
            self.out.write_all(&postimage)?;
        } else {
            let mut len = len;
            if mode == NodeMode::Symlink {
                if len < LINK_PREFIX_LEN {
                    return Err(Dump("symlink blob shorter than its prefix".into()).into());
                }
                input.skip_bytes(LINK_PREFIX_LEN)?;
                len -= LINK_PREFIX_LEN;
            }
            write!(self.out, "blob\nmark :{}\ndata {}\n", mark, len)?;
            let copied = input.copy_bytes(&mut self.out, len)?;
            if copied != len {
                return Err(Dump(format!("blob body ended early ({} of {} bytes)", copied, len)).into());
            }
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Read one `cat-blob` response from the back-channel into `out`:
    /// `<sha1> blob <length>`, the body, a lone newline.
    fn save_blob(&mut self, out: &mut std::fs::File) -> Result<()> {
        let channel = self
            .backchannel
            .as_mut()
            .ok_or_else(|| Backchannel("no back-channel to read from".to_string()))?;
        let header = channel
            .read_line()?
            .ok_or_else(|| Backchannel("unexpected end of back-channel".to_string()))?
            .to_vec();
        let text = std::str::from_utf8(&header)
            .map_err(|_| Backchannel(format!("malformed header: {:?}", header)))?;
        if text.ends_with("missing") {
            return Err(Backchannel(format!("missing blob: {}", text)).into());
        }
        let length: u64 = cat_blob_header_re()
            .captures(text)
            .and_then(|c| c.get(1))
            .ok_or_else(|| Backchannel(format!("malformed header: {}", text)))?
            .as_str()
            .parse()
            .map_err(|_| Backchannel(format!("bad length in header: {}", text)))?;
        let copied = channel.copy_bytes(out, length)?;
        if copied != length {
            return Err(Backchannel(format!(
                "blob body ended early ({} of {} bytes)",
                copied, length
            ))
            .into());
        }
        let tail = channel
            .read_line()?
            .ok_or_else(|| Backchannel("unexpected end of back-channel".to_string()))?;
        if !tail.is_empty() {
            return Err(Backchannel(format!(
                "trailing garbage after blob: {}",
                String::from_utf8_lossy(tail)
            ))
            .into());
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
