use std::fmt;
use std::time::Duration;

use anyhow::Result;
use matetrack_core::SearchTelemetry;

/// info 行の評価値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

/// `lowerbound` / `upperbound` 付きの評価値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    Lower,
    Upper,
}

/// 解析済みの info 行1本
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub nodes: Option<u64>,
    pub time_ms: Option<u64>,
    pub nps: Option<u64>,
    pub multipv: Option<u32>,
    pub score: Option<Score>,
    pub bound: Option<ScoreBound>,
    pub pv: Vec<String>,
}

impl InfoLine {
    /// `info` で始まる行を解析する。それ以外は `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first().copied() != Some("info") {
            return None;
        }
        let mut info = InfoLine::default();
        let mut i = 1;
        while i < tokens.len() {
            let next = tokens.get(i + 1).copied();
            match tokens[i] {
                "depth" => {
                    info.depth = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "seldepth" => {
                    info.seldepth = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "nodes" => {
                    info.nodes = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "time" => {
                    info.time_ms = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "nps" => {
                    info.nps = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "multipv" => {
                    info.multipv = next.and_then(|t| t.parse().ok());
                    i += 1;
                }
                "score" => {
                    let value = tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok());
                    info.score = match (next, value) {
                        (Some("cp"), Some(v)) => Some(Score::Cp(v)),
                        (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                        _ => None,
                    };
                    i += 2;
                }
                "lowerbound" => info.bound = Some(ScoreBound::Lower),
                "upperbound" => info.bound = Some(ScoreBound::Upper),
                "pv" => {
                    info.pv = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                    break;
                }
                // 以降は自由文字列
                "string" => break,
                _ => {}
            }
            i += 1;
        }
        Some(info)
    }

    /// multipv 1（または指定なし）の行か
    pub fn is_primary(&self) -> bool {
        self.multipv.is_none_or(|n| n == 1)
    }

    /// 上下限ではない確定した評価値を持つか
    pub fn has_exact_score(&self) -> bool {
        self.score.is_some() && self.bound.is_none()
    }

    pub fn telemetry(&self) -> SearchTelemetry {
        SearchTelemetry {
            nodes: self.nodes,
            depth: self.depth,
            time_ms: self.time_ms,
        }
    }
}

/// `go mate` に渡す手数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MateBound {
    Fixed(u32),
    /// 局面ごとの主張手数 `|bm|` を使う
    FromClaim,
}

/// 1局面あたりの探索制限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimit {
    pub nodes: Option<u64>,
    pub depth: Option<u32>,
    pub movetime_ms: Option<u64>,
    pub mate: Option<MateBound>,
}

impl SearchLimit {
    pub fn is_unbounded(&self) -> bool {
        self.nodes.is_none()
            && self.depth.is_none()
            && self.movetime_ms.is_none()
            && self.mate.is_none()
    }

    /// 主張 `claimed_mate` の局面に対する制限を確定する。
    pub fn for_claim(&self, claimed_mate: i32) -> GoLimit {
        GoLimit {
            nodes: self.nodes,
            depth: self.depth,
            movetime_ms: self.movetime_ms,
            mate: self.mate.map(|bound| match bound {
                MateBound::Fixed(n) => n,
                MateBound::FromClaim => claimed_mate.unsigned_abs(),
            }),
        }
    }
}

/// 局面ごとに確定した制限。`Display` で `go` コマンドになる。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoLimit {
    pub nodes: Option<u64>,
    pub depth: Option<u32>,
    pub movetime_ms: Option<u64>,
    pub mate: Option<u32>,
}

impl fmt::Display for GoLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("go")?;
        if let Some(n) = self.nodes {
            write!(f, " nodes {n}")?;
        }
        if let Some(d) = self.depth {
            write!(f, " depth {d}")?;
        }
        if let Some(t) = self.movetime_ms {
            write!(f, " movetime {t}")?;
        }
        if let Some(m) = self.mate {
            write!(f, " mate {m}")?;
        }
        Ok(())
    }
}

pub struct SearchRequest<'a> {
    /// 6フィールドの FEN
    pub fen: &'a str,
    pub limit: GoLimit,
}

pub struct SearchSummary {
    pub bestmove: Option<String>,
    pub elapsed_ms: u64,
}

/// info コールバックの型エイリアス
pub type InfoCallback<'a> = dyn FnMut(&InfoLine) + 'a;

/// 1局面ずつ探索させられるエンジン
pub trait EngineSession {
    /// 探索を開始し、`bestmove` が届くまで info 行を `on_info` に流す。
    fn analyse(
        &mut self,
        req: &SearchRequest<'_>,
        on_info: &mut InfoCallback<'_>,
    ) -> Result<SearchSummary>;
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_line_parses_primary_pv() {
        let info = InfoLine::parse(
            "info depth 10 seldepth 12 multipv 1 score mate 3 nodes 12345 nps 890 time 67 \
             pv e2e4 e7e5 d1h5",
        )
        .unwrap();
        assert_eq!(info.depth, Some(10));
        assert_eq!(info.seldepth, Some(12));
        assert_eq!(info.nodes, Some(12_345));
        assert_eq!(info.time_ms, Some(67));
        assert_eq!(info.nps, Some(890));
        assert_eq!(info.score, Some(Score::Mate(3)));
        assert!(info.is_primary());
        assert!(info.has_exact_score());
        assert_eq!(info.pv, vec!["e2e4", "e7e5", "d1h5"]);
        assert_eq!(info.telemetry().nodes, Some(12_345));
    }

    #[test]
    fn info_line_bounds_and_secondary_lines() {
        let info =
            InfoLine::parse("info depth 20 score cp -25 upperbound nodes 5 pv a2a3").unwrap();
        assert_eq!(info.score, Some(Score::Cp(-25)));
        assert_eq!(info.bound, Some(ScoreBound::Upper));
        assert!(!info.has_exact_score());

        let info = InfoLine::parse("info multipv 2 depth 20 score cp 100 pv g1f3").unwrap();
        assert!(!info.is_primary());

        let info = InfoLine::parse("info string NNUE evaluation using nn.bin").unwrap();
        assert_eq!(info.score, None);
        assert!(InfoLine::parse("bestmove e2e4").is_none());
    }

    #[test]
    fn go_command_resolves_mate_bound_per_position() {
        let limit = SearchLimit {
            nodes: Some(1_000_000),
            mate: Some(MateBound::FromClaim),
            ..SearchLimit::default()
        };
        assert_eq!(limit.for_claim(-4).to_string(), "go nodes 1000000 mate 4");
        assert_eq!(limit.for_claim(7).to_string(), "go nodes 1000000 mate 7");

        let limit = SearchLimit {
            depth: Some(30),
            movetime_ms: Some(1500),
            mate: Some(MateBound::Fixed(10)),
            ..SearchLimit::default()
        };
        assert_eq!(limit.for_claim(3).to_string(), "go depth 30 movetime 1500 mate 10");
        assert!(SearchLimit::default().is_unbounded());
    }
}
