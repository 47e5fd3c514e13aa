/// データセットに保存された PV を使って局面を数 ply 進める。
///
/// 詰ます側の局面を詰まされる側の局面に（またはその逆に）変換するのに使う。
/// 進められなかった行（PV が短い、対象外の勝敗）はそのまま書き出す。
///
/// ```shell
/// cargo run -p tools --release --bin advance_pvs -- \
///   --epd-file matetrackpv.epd --out-file matedtrackpv.epd --plies 1 --mate-type won
/// ```
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::info;
use matetrack_core::{ChessOracle, PositionClaim, advance_claim};

use tools::common::io::{read_claims, write_claims};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MateType {
    All,
    Won,
    Lost,
}

impl MateType {
    fn accepts(self, claimed_mate: i32) -> bool {
        match self {
            MateType::All => true,
            MateType::Won => claimed_mate > 0,
            MateType::Lost => claimed_mate < 0,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Use PVs stored in an .epd file to advance positions by a number of plies")]
struct Cli {
    /// Positions with their mate scores and PVs
    #[arg(long, alias = "epdFile", default_value = "matetrackpv.epd")]
    epd_file: PathBuf,

    /// Output file with the advanced positions
    #[arg(long, alias = "outFile", default_value = "matedtrackpv.epd")]
    out_file: PathBuf,

    /// Number of plies to advance
    #[arg(long, default_value_t = 1)]
    plies: usize,

    /// Type of positions to advance from
    #[arg(long, alias = "mateType", value_enum, default_value_t = MateType::Won)]
    mate_type: MateType,
}

/// 対象の局面を進め、進めた件数を返す。
fn advance_all(
    oracle: &ChessOracle,
    claims: Vec<PositionClaim>,
    plies: usize,
    mate_type: MateType,
) -> Result<(Vec<PositionClaim>, usize)> {
    let mut advanced = 0;
    let mut out = Vec::with_capacity(claims.len());
    for claim in claims {
        if !mate_type.accepts(claim.claimed_mate) {
            out.push(claim);
            continue;
        }
        match advance_claim(oracle, &claim, plies)
            .with_context(|| format!("cannot replay PV for FEN \"{}\"", claim.fen))?
        {
            Some(next) => {
                advanced += 1;
                out.push(next);
            }
            None => out.push(claim),
        }
    }
    Ok((out, advanced))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.plies == 0 {
        bail!("--plies must be >= 1");
    }
    let oracle = ChessOracle::new();
    let claims = read_claims(&cli.epd_file, &oracle)?;
    println!("{} FENs loaded...", claims.len());

    let (claims, advanced) = advance_all(&oracle, claims, cli.plies, cli.mate_type)?;
    write_claims(&cli.out_file, &claims)?;
    info!("wrote {} positions to {}", claims.len(), cli.out_file.display());
    println!("Positions in which we advanced {} plies: {}", cli.plies, advanced);
    Ok(())
}
