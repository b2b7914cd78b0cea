
use std::io::{Read, Write};

use anyhow::Result;
use tracing::{debug, warn};

use crate::fast_export::FastExport;
use crate::line_buffer::LineBuffer;
use crate::repo_tree::{NodeMode, RepoTree};
use crate::string_pool::{StringPool, MAX_PATH_DEPTH};
use crate::util::SvError::Dump;
use crate::util::{parse_decimal, parse_svn_date};

//  Parse and convert an svnadmin dump.  Create the dump with:
//  svnadmin dump [--deltas] -r<startrev>:<endrev> <repository> >outfile

/// First blob mark handed out; high enough to never collide with a
/// revision number.
const FIRST_BLOB_MARK: u32 = 1_000_000_000;

/// Supported dump format versions.
const MAX_FORMAT_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeAction {
    Unknown,
    Change,
    Add,
    Delete,
    Replace,
}

/// Which record the most recent headers belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveCtx {
    Dump,
    Rev,
    Node,
}

#[derive(Debug, Default)]
struct DumpCtx {
    version: u32,
    uuid: Option<u32>,
    url: Option<u32>,
}

#[derive(Debug, Default)]
struct RevCtx {
    revision: u32,
    timestamp: i64,
    log: Vec<u8>,
    author: Option<u32>,
}

#[derive(Debug)]
struct NodeCtx {
    kind: NodeMode,
    action: NodeAction,
    prop_length: Option<u64>,
    text_length: Option<u64>,
    text_delta: bool,
    prop_delta: bool,
    src: Option<Vec<u32>>,
    src_rev: Option<u32>,
    dst: Vec<u32>,
}

impl NodeCtx {
    fn reset(dst: Vec<u32>) -> Self {
        NodeCtx {
            kind: NodeMode::Absent,
            action: NodeAction::Unknown,
            prop_length: None,
            text_length: None,
            text_delta: false,
            prop_delta: false,
            src: None,
            src_rev: None,
            dst,
        }
    }
}

/// Interned header keys, so the per-line dispatch is an integer compare.
#[derive(Clone, Copy)]
struct Keys {
    format_version: u32,
    uuid: u32,
    revision_number: u32,
    node_path: u32,
    node_kind: u32,
    node_action: u32,
    node_copyfrom_path: u32,
    node_copyfrom_rev: u32,
    text_content_length: u32,
    prop_content_length: u32,
    content_length: u32,
    text_delta: u32,
    prop_delta: u32,
    text_delta_base_md5: u32,
    text_delta_base_sha1: u32,
    text_content_md5: u32,
    text_content_sha1: u32,
    text_copy_source_md5: u32,
    text_copy_source_sha1: u32,
}

impl Keys {
    fn intern(strings: &mut StringPool) -> Self {
        Keys {
            format_version: strings.intern(b"SVN-fs-dump-format-version"),
            uuid: strings.intern(b"UUID"),
            revision_number: strings.intern(b"Revision-number"),
            node_path: strings.intern(b"Node-path"),
            node_kind: strings.intern(b"Node-kind"),
            node_action: strings.intern(b"Node-action"),
            node_copyfrom_path: strings.intern(b"Node-copyfrom-path"),
            node_copyfrom_rev: strings.intern(b"Node-copyfrom-rev"),
            text_content_length: strings.intern(b"Text-content-length"),
            prop_content_length: strings.intern(b"Prop-content-length"),
            content_length: strings.intern(b"Content-length"),
            text_delta: strings.intern(b"Text-delta"),
            prop_delta: strings.intern(b"Prop-delta"),
            text_delta_base_md5: strings.intern(b"Text-delta-base-md5"),
            text_delta_base_sha1: strings.intern(b"Text-delta-base-sha1"),
            text_content_md5: strings.intern(b"Text-content-md5"),
            text_content_sha1: strings.intern(b"Text-content-sha1"),
            text_copy_source_md5: strings.intern(b"Text-copy-source-md5"),
            text_copy_source_sha1: strings.intern(b"Text-copy-source-sha1"),
        }
    }
}

/// Single-pass converter from an svnadmin dump stream to a fast-import
/// stream.  Exactly one dump is processed per instance.
pub struct SvnDump<R: Read, W: Write> {
    input: LineBuffer<R>,
    out: FastExport<W>,
    strings: StringPool,
    tree: RepoTree,
    keys: Keys,
    dump: DumpCtx,
    rev: RevCtx,
    node: NodeCtx,
    active: ActiveCtx,
    next_blob_mark: u32,
}

impl<R: Read, W: Write> SvnDump<R, W> {
    pub fn new(
        input: R,
        output: W,
        backchannel: Option<Box<dyn Read>>,
        url: Option<&str>,
    ) -> Self {
        let mut strings = StringPool::new();
        let keys = Keys::intern(&mut strings);
        let url = url.map(|u| strings.intern(u.as_bytes()));
        SvnDump {
            input: LineBuffer::new(input),
            out: FastExport::new(output, backchannel),
            strings,
            tree: RepoTree::new(),
            keys,
            dump: DumpCtx { version: 0, uuid: None, url },
            rev: RevCtx::default(),
            node: NodeCtx::reset(Vec::new()),
            active: ActiveCtx::Dump,
            next_blob_mark: FIRST_BLOB_MARK,
        }
    }

    /// Drive the conversion to completion.
    pub fn run(&mut self) -> Result<()> {
        while let Some((key, value)) = self.read_header()? {
            self.dispatch(key, &value)?;
        }
        if self.active == ActiveCtx::Node {
            self.handle_node()?;
        }
        if self.active != ActiveCtx::Dump {
            self.end_revision()?;
        }
        self.out.flush()
    }

    /// Next `Key: Value` header line, with the key interned.  Lines that
    /// are not headers (record separators, stray payload) are skipped.
    fn read_header(&mut self) -> Result<Option<(u32, Vec<u8>)>> {
        loop {
            let parsed = match self.input.read_line()? {
                None => return Ok(None),
                Some(line) => line
                    .windows(2)
                    .position(|w| w == b": ")
                    .map(|at| (line[..at].to_vec(), line[at + 2..].to_vec())),
            };
            if let Some((key, value)) = parsed {
                return Ok(Some((self.strings.intern(&key), value)));
            }
        }
    }

    fn dispatch(&mut self, key: u32, value: &[u8]) -> Result<()> {
        let keys = self.keys;
        if key == keys.format_version {
            self.dump.version = parse_decimal(value)?;
            if self.dump.version > MAX_FORMAT_VERSION {
                return Err(Dump(format!(
                    "expected svn dump format version <= {}, found {}",
                    MAX_FORMAT_VERSION, self.dump.version
                ))
                .into());
            }
        } else if key == keys.uuid {
            self.dump.uuid = Some(self.strings.intern(value));
        } else if key == keys.revision_number {
            if self.active == ActiveCtx::Node {
                self.handle_node()?;
            }
            if self.active != ActiveCtx::Dump {
                self.end_revision()?;
            }
            self.begin_revision(parse_decimal(value)?);
            self.active = ActiveCtx::Rev;
        } else if key == keys.node_path {
            if self.active == ActiveCtx::Node {
                self.handle_node()?;
            }
            self.begin_node(value)?;
            self.active = ActiveCtx::Node;
        } else if key == keys.node_kind {
            self.node.kind = match value {
                b"dir" => NodeMode::Dir,
                b"file" => NodeMode::Normal,
                _ => {
                    warn!("unknown node-kind: {}", String::from_utf8_lossy(value));
                    NodeMode::Absent
                }
            };
        } else if key == keys.node_action {
            self.node.action = match value {
                b"delete" => NodeAction::Delete,
                b"add" => NodeAction::Add,
                b"change" => NodeAction::Change,
                b"replace" => NodeAction::Replace,
                _ => {
                    warn!("unknown node-action: {}", String::from_utf8_lossy(value));
                    NodeAction::Unknown
                }
            };
        } else if key == keys.node_copyfrom_path {
            self.node.src = Some(self.strings.tokenize(value, b"/", MAX_PATH_DEPTH)?);
        } else if key == keys.node_copyfrom_rev {
            self.node.src_rev = Some(parse_decimal(value)?);
        } else if key == keys.text_content_length {
            self.node.text_length = Some(parse_decimal(value)?);
        } else if key == keys.prop_content_length {
            self.node.prop_length = Some(parse_decimal(value)?);
        } else if key == keys.text_delta {
            self.node.text_delta = value == b"true";
        } else if key == keys.prop_delta {
            self.node.prop_delta = value == b"true";
        } else if key == keys.text_delta_base_md5
            || key == keys.text_delta_base_sha1
            || key == keys.text_content_md5
            || key == keys.text_content_sha1
            || key == keys.text_copy_source_md5
            || key == keys.text_copy_source_sha1
        {
            // Integrity-only headers; the stream carries its own framing.
        } else if key == keys.content_length {
            let len: u64 = parse_decimal(value)?;
            let blank = self
                .input
                .read_line()?
                .ok_or_else(|| Dump("input ended inside a record".to_string()))?;
            if !blank.is_empty() {
                return Err(Dump("expected blank line after header block".to_string()).into());
            }
            match self.active {
                ActiveCtx::Rev => self.read_props()?,
                ActiveCtx::Node => {
                    self.handle_node()?;
                    self.active = ActiveCtx::Rev;
                }
                ActiveCtx::Dump => {
                    warn!(len, "unexpected content length outside any record");
                    self.input.skip_bytes(len)?;
                }
            }
        }
        Ok(())
    }

    fn begin_revision(&mut self, number: u32) {
        debug!(revision = number, "revision");
        self.rev = RevCtx { revision: number, timestamp: 0, log: Vec::new(), author: None };
        self.tree.begin_revision(number);
    }

    /// Emit the commit for the revision just finished and freeze its
    /// directories.  Revision 0 only seeds the base tree.
    fn end_revision(&mut self) -> Result<()> {
        let revision = self.rev.revision;
        if revision > 0 {
            self.out.begin_commit(
                &self.strings,
                revision,
                self.rev.author,
                &self.rev.log,
                self.dump.uuid,
                self.dump.url,
                self.rev.timestamp,
            )?;
            self.tree
                .diff(revision - 1, revision, &self.strings, &mut self.out)?;
            self.out.end_commit(revision)?;
        }
        self.tree.save_revision();
        Ok(())
    }

    fn begin_node(&mut self, path: &[u8]) -> Result<()> {
        debug!(path = %String::from_utf8_lossy(path), "node");
        let dst = self.strings.tokenize(path, b"/", MAX_PATH_DEPTH)?;
        self.node = NodeCtx::reset(dst);
        Ok(())
    }

    /// Property block: `K`/`V` pairs and (in delta dumps) `D` deletes,
    /// closed by `PROPS-END`.
    fn read_props(&mut self) -> Result<()> {
        let mut key: Vec<u8> = Vec::new();
        loop {
            let (record, len) = {
                let line = self
                    .input
                    .read_line()?
                    .ok_or_else(|| Dump("input ended inside properties".to_string()))?;
                if line == b"PROPS-END" {
                    return Ok(());
                }
                if line.len() < 3 || line[1] != b' ' {
                    return Err(Dump(format!(
                        "malformed property line: {}",
                        String::from_utf8_lossy(line)
                    ))
                    .into());
                }
                (line[0], parse_decimal::<usize>(&line[2..])?)
            };
            let value = self.input.read_string(len)?;
            match self.input.read_byte()? {
                Some(b'\n') => {}
                _ => {
                    return Err(Dump(format!(
                        "expected newline after property value {}",
                        String::from_utf8_lossy(&value)
                    ))
                    .into())
                }
            }
            match record {
                b'K' => key = value,
                b'V' => {
                    self.handle_property(&std::mem::take(&mut key), Some(&value))?;
                }
                b'D' => {
                    // Delta dumps name the deleted key directly.
                    self.handle_property(&value, None)?;
                    key.clear();
                }
                other => {
                    return Err(Dump(format!("unknown property record '{}'", other as char)).into())
                }
            }
        }
    }

    /// React to one property.  `None` is a delete from a delta dump's
    /// property block.
    fn handle_property(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        match key {
            b"svn:log" => match value {
                Some(v) => self.rev.log = v.to_vec(),
                None => return Err(Dump("property delete unsets svn:log".to_string()).into()),
            },
            b"svn:author" => {
                self.rev.author = value.map(|v| self.strings.intern(v));
            }
            b"svn:date" => match value.and_then(parse_svn_date) {
                Some(timestamp) => self.rev.timestamp = timestamp,
                None => warn!(
                    "invalid timestamp: {}",
                    String::from_utf8_lossy(value.unwrap_or_default())
                ),
            },
            b"svn:executable" => match value {
                Some(_) if self.node.kind == NodeMode::Normal => {
                    self.node.kind = NodeMode::Executable;
                }
                None if self.node.kind == NodeMode::Executable => {
                    self.node.kind = NodeMode::Normal;
                }
                _ => {}
            },
            b"svn:special" => match value {
                Some(_) if self.node.kind == NodeMode::Normal => {
                    self.node.kind = NodeMode::Symlink;
                }
                None if self.node.kind == NodeMode::Symlink => {
                    self.node.kind = NodeMode::Normal;
                }
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn next_blob_mark(&mut self) -> u32 {
        let mark = self.next_blob_mark;
        self.next_blob_mark += 1;
        mark
    }

    /// Apply one node record to the tree and emit its blob, if any.
    fn handle_node(&mut self) -> Result<()> {
        let have_props = self.node.prop_length.is_some();
        let have_text = self.node.text_length.is_some();
        // Revision 0 is always empty, so a copyfrom-rev of 0 means no source.
        let copyfrom = self.node.src_rev.unwrap_or(0) > 0 && self.node.src.is_some();

        // A property delta is relative to the node's previous properties,
        // so the previous mode carries over before the block is applied.
        // Not for a replace: there the entry starts over and the kind
        // declared by its own headers stands.
        if self.node.prop_delta && self.node.action != NodeAction::Replace {
            let prior = if copyfrom {
                self.tree.read_dirent(
                    self.node.src_rev.unwrap(),
                    self.node.src.as_deref().unwrap(),
                )
            } else {
                self.tree.read_dirent(self.rev.revision, &self.node.dst)
            };
            if let Some(entry) = prior {
                self.node.kind = entry.mode;
            }
        }

        if self.node.prop_length.unwrap_or(0) > 0 {
            self.read_props()?;
        }

        // The delta base (and fallback mode) is the copy source when there
        // is one, otherwise whatever currently sits at the destination.
        let mut src_mark = 0;
        let mut src_mode = NodeMode::Absent;
        if copyfrom {
            let src_rev = self.node.src_rev.unwrap();
            let src = self.node.src.clone().unwrap();
            debug!(
                src_rev,
                src = %String::from_utf8_lossy(&self.strings.join(&src, b'/')),
                dst = %String::from_utf8_lossy(&self.strings.join(&self.node.dst, b'/')),
                "copy"
            );
            let dst = self.node.dst.clone();
            if let Some(entry) = self.tree.copy(src_rev, &src, &dst) {
                src_mode = entry.mode;
                if !entry.mode.is_dir() {
                    src_mark = entry.content;
                }
            }
        } else if let Some(entry) = self.tree.read_dirent(self.rev.revision, &self.node.dst) {
            src_mode = entry.mode;
            if !entry.mode.is_dir() {
                src_mark = entry.content;
            }
        }

        let mut mark = 0;
        if have_text && self.node.kind != NodeMode::Dir {
            mark = self.next_blob_mark();
        }

        let dst = self.node.dst.clone();
        match self.node.action {
            NodeAction::Delete => {
                debug!(path = %String::from_utf8_lossy(&self.strings.join(&dst, b'/')), "delete");
                self.tree.delete(&dst);
            }
            NodeAction::Change | NodeAction::Replace => {
                if self.node.action == NodeAction::Replace && self.node.kind == NodeMode::Dir {
                    // A replaced directory starts over empty.
                    self.tree.add(&dst, NodeMode::Dir, 0);
                } else if have_props {
                    self.tree.modify(&dst, self.node.kind, mark);
                } else if have_text {
                    self.tree.replace(&dst, mark);
                }
            }
            NodeAction::Add => {
                if copyfrom && have_props {
                    self.tree.modify(&dst, self.node.kind, mark);
                } else if copyfrom && have_text {
                    self.tree.replace(&dst, mark);
                } else if (self.node.kind == NodeMode::Dir && !copyfrom) || have_text {
                    self.tree.add(&dst, self.node.kind, mark);
                }
            }
            NodeAction::Unknown => {
                warn!(
                    path = %String::from_utf8_lossy(&self.strings.join(&dst, b'/')),
                    "skipping node with unknown action"
                );
            }
        }

        // A node with no property block keeps its previous mode.
        if !have_props && src_mode != NodeMode::Absent {
            self.node.kind = src_mode;
        }

        let text_length = self.node.text_length.unwrap_or(0);
        if mark != 0 {
            self.out.blob(
                &mut self.input,
                self.node.kind,
                mark,
                text_length,
                self.node.text_delta,
                src_mark,
                src_mode,
            )?;
        } else {
            self.input.skip_bytes(text_length)?;
        }
        Ok(())
    }

    /// The dump format version seen in the stream, for diagnostics.
    pub fn format_version(&self) -> u32 {
        self.dump.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn convert(dump: &[u8]) -> Result<String> {
        convert_with(dump, None, None)
    }

    fn convert_with(
        dump: &[u8],
        backchannel: Option<Vec<u8>>,
        url: Option<&str>,
    ) -> Result<String> {
        let mut out = Vec::new();
        {
            let channel = backchannel
                .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read>);
            let mut dump = SvnDump::new(Cursor::new(dump.to_vec()), &mut out, channel, url);
            dump.run()?;
        }
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn empty_input_produces_empty_stream() {
        assert_eq!(convert(b"").unwrap(), "");
    }

    #[test]
    fn format_version_above_three_is_fatal() {
        let err = convert(b"SVN-fs-dump-format-version: 4\n").unwrap_err().to_string();
        assert!(err.contains("format version"), "{}", err);
    }

    #[test]
    fn empty_revision_emits_empty_commit() {
        let dump = b"SVN-fs-dump-format-version: 2\n\n\
            Revision-number: 1\n\
            Prop-content-length: 10\n\
            Content-length: 10\n\n\
            PROPS-END\n";
        let text = convert(dump).unwrap();
        assert_eq!(
            text,
            "commit refs/heads/master\n\
             committer nobody <nobody@local> 0 +0000\n\
             data 0\n\n\
             \nprogress Imported commit 1.\n\n"
        );
    }

    #[test]
    fn revision_zero_is_not_emitted() {
        let dump = b"Revision-number: 0\n\
            Prop-content-length: 10\n\
            Content-length: 10\n\n\
            PROPS-END\n";
        assert_eq!(convert(dump).unwrap(), "");
    }

    #[test]
    fn unknown_headers_and_separators_are_skipped() {
        let dump = b"Weird-header: value\nnot a header at all\n";
        assert_eq!(convert(dump).unwrap(), "");
    }

    #[test]
    fn missing_blank_line_after_headers_is_fatal() {
        let dump = b"Revision-number: 1\n\
            Content-length: 10\n\
            PROPS-END\n";
        let err = convert(dump).unwrap_err().to_string();
        assert!(err.contains("blank line"), "{}", err);
    }
}
