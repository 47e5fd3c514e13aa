//! データセットファイルの入出力（gzip 対応、`-` で標準入出力）

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use matetrack_core::{PositionClaim, RulesOracle, load_claims, to_epd_line};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_gzip(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::MultiGzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Stdout(io::Stdout),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Stdout(s) => s.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Stdout(s) => s.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// Finalize the stream and flush underlying file/stdout.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            Writer::Stdout(mut s) => s.flush(),
            Writer::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Writer::Stdout(io::stdout()));
    }
    let f = File::create(p)?;
    if is_gzip(p) {
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    Ok(Writer::Plain(BufWriter::new(f)))
}

/// データセットを読み込む。壊れた行は警告して飛ばす。
pub fn read_claims<P, O>(path: P, oracle: &O) -> Result<Vec<PositionClaim>>
where
    P: AsRef<Path>,
    O: RulesOracle,
{
    let p = path.as_ref();
    let reader = open_reader(p).with_context(|| format!("failed to open {}", p.display()))?;
    let claims =
        load_claims(reader, oracle).with_context(|| format!("failed to read {}", p.display()))?;
    info!("{} positions loaded from {}", claims.len(), p.display());
    Ok(claims)
}

/// データセットを書き出す。
pub fn write_claims<P: AsRef<Path>>(path: P, claims: &[PositionClaim]) -> Result<()> {
    let p = path.as_ref();
    let mut out = open_writer(p).with_context(|| format!("failed to create {}", p.display()))?;
    for claim in claims {
        writeln!(out, "{}", to_epd_line(claim))?;
    }
    out.close().with_context(|| format!("failed to finish {}", p.display()))?;
    Ok(())
}
