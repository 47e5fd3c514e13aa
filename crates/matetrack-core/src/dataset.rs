//! 詰みデータセット（EPD）の読み書き
//!
//! 1行1局面で `<fen> bm #<n>;` の後ろに任意で `PV: <uci moves>;` が続く。
//! 壊れた行は警告を出して読み飛ばす。

use std::io::{self, BufRead};
use std::sync::LazyLock;

use log::warn;
use regex::Regex;

use crate::rules::{RulesError, RulesOracle};

static CLAIM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-zA-Z/\- ]*) bm #(-?[0-9]+);(?:\s*PV:\s*([^;]*);)?")
        .expect("claim line pattern is valid")
});

/// 詰みの主張1件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionClaim {
    /// 受理した局面の通し番号
    pub index: usize,
    pub fen: String,
    /// 正なら手番側が `2n-1` ply で詰ます、負なら `-2n` ply で詰まされる
    pub claimed_mate: i32,
    pub pv: Option<Vec<String>>,
}

/// 1行をパースする。コメント・空行・不正行は `None`。
pub fn parse_claim_line(line: &str) -> Option<(String, i32, Option<Vec<String>>)> {
    let caps = CLAIM_LINE.captures(line.trim_start())?;
    let fen = caps.get(1)?.as_str().trim().to_string();
    let mate: i32 = caps.get(2)?.as_str().parse().ok()?;
    if fen.is_empty() || mate == 0 {
        return None;
    }
    let pv = caps
        .get(3)
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect::<Vec<_>>());
    Some((fen, mate, pv))
}

/// データセットを読み込む。
///
/// `oracle` が受け付けない局面も不正行として扱う。通し番号は受理した行の順。
pub fn load_claims<R, O>(reader: R, oracle: &O) -> io::Result<Vec<PositionClaim>>
where
    R: BufRead,
    O: RulesOracle,
{
    let mut claims = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((fen, claimed_mate, pv)) = parse_claim_line(trimmed) else {
            warn!("ignoring malformed line {}: {}", line_no + 1, trimmed);
            continue;
        };
        if let Err(e) = oracle.load_position(&fen) {
            warn!("ignoring line {}: {e}", line_no + 1);
            continue;
        }
        claims.push(PositionClaim {
            index: claims.len(),
            fen,
            claimed_mate,
            pv,
        });
    }
    Ok(claims)
}

/// EPD 行に戻す。
pub fn to_epd_line(claim: &PositionClaim) -> String {
    let mut line = format!("{} bm #{};", claim.fen, claim.claimed_mate);
    if let Some(pv) = &claim.pv {
        line.push_str(" PV: ");
        line.push_str(&pv.join(" "));
        line.push(';');
    }
    line
}

/// FEN の先頭4フィールド（EPD 部分）
fn epd_fields(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// 1 ply 進めたときの詰み値。詰ます側と詰まされる側が入れ替わる。
pub fn mate_after_ply(mate: i32) -> i32 {
    -mate + i32::from(mate > 0)
}

/// 保存済み PV の先頭 `plies` 手を指した局面へ進める。
///
/// PV が `plies` 手より長くなければ `Ok(None)`。
pub fn advance_claim<O: RulesOracle>(
    oracle: &O,
    claim: &PositionClaim,
    plies: usize,
) -> Result<Option<PositionClaim>, RulesError> {
    let Some(pv) = claim.pv.as_ref().filter(|pv| pv.len() > plies) else {
        return Ok(None);
    };
    let mut board = oracle.load_position(&claim.fen)?;
    let mut mate = claim.claimed_mate;
    for mv in &pv[..plies] {
        oracle.apply_move(&mut board, mv)?;
        mate = mate_after_ply(mate);
    }
    Ok(Some(PositionClaim {
        index: claim.index,
        fen: epd_fields(&oracle.encode_position(&board)),
        claimed_mate: mate,
        pv: Some(pv[plies..].to_vec()),
    }))
}
