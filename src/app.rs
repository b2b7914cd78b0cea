
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;

use crate::svndump::SvnDump;

/// File descriptor the fast-import consumer answers `cat-blob` queries on.
const BACKCHANNEL_FILENO: i32 = 3;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "svn-fe", version = VERSION,
          about = "Convert an svnadmin dump to a git fast-import stream")]
pub struct Cli {
    /// Dump file to read; stdin when omitted
    pub dumpfile: Option<PathBuf>,

    /// Canonical repository URL, recorded in git-svn-id trailers
    pub url: Option<String>,

    /// Print shell completions and exit
    #[arg(long, value_enum, exclusive = true)]
    pub completions: Option<Shell>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        if let Some(shell) = self.completions {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "svn-fe", &mut io::stdout());
            return Ok(());
        }

        let input: Box<dyn Read> = match &self.dumpfile {
            Some(path) => Box::new(
                File::open(path)
                    .with_context(|| format!("cannot open dump file {}", path.display()))?,
            ),
            None => Box::new(io::stdin()),
        };
        // The importer is expected to hold the other end of fd 3 open for
        // cat-blob responses; reads fail only if a delta actually needs it.
        let backchannel: Box<dyn Read> =
            Box::new(unsafe { File::from_raw_fd(BACKCHANNEL_FILENO) });

        let stdout = io::stdout();
        let out = BufWriter::new(stdout.lock());
        let mut dump = SvnDump::new(input, out, Some(backchannel), self.url.as_deref());
        dump.run()
    }
}
