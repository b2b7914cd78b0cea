
use thiserror::Error;
use chrono::NaiveDateTime;

#[derive(Error, Debug)]
pub enum SvError {
    #[error("invalid dump: {0}")]
    Dump(String),
    #[error("invalid delta: {0}")]
    Delta(String),
    #[error("cat-blob: {0}")]
    Backchannel(String),
}

/// Exit status used for every fatal diagnostic.
pub const FATAL_EXIT_CODE: i32 = 128;

//  Parse an svn:date value ("2010-05-07T12:34:56.123456Z") to a unix
//  timestamp.  Subversion always stores UTC; fractional seconds and the
//  trailing 'Z' are ignored.
pub fn parse_svn_date(val: &[u8]) -> Option<i64> {
    let head = val.get(..19)?;
    let text = std::str::from_utf8(head).ok()?;
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

//  Decimal field parser for header and property lengths.  The dump format
//  only ever carries unsigned ASCII decimal here.
pub fn parse_decimal<T: std::str::FromStr>(val: &[u8]) -> anyhow::Result<T> {
    let text = std::str::from_utf8(val)
        .map_err(|_| SvError::Dump(format!("non-ascii number: {:?}", val)))?;
    text.trim()
        .parse()
        .map_err(|_| SvError::Dump(format!("bad number: {}", text)).into())
}
