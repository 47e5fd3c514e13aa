//! 局面ごとの解析結果の集計
//!
//! `fold` / `merge` は可換かつ結合的で、記録の到着順に依存しない。
//! 代表例は「データセット上で最も前にある局面」を残す。

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use serde::Serialize;

use crate::announce::Announcement;
use crate::record::PositionRecord;
use crate::verify::Verdict;

/// 報告単位で数える問題の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum IssueKind {
    /// 主張より短い詰み（符号は一致）
    BetterMate,
    /// 勝ち負けが逆
    WrongMate,
    /// 詰み報告の PV が検証を通らない
    BadPv,
    /// EGTB スコアの勝ち負けが逆
    WrongTbScore,
    /// EGTB スコアの PV が検証を通らない
    BadTbPv,
}

impl IssueKind {
    pub const ALL: [IssueKind; 5] = [
        IssueKind::BetterMate,
        IssueKind::WrongMate,
        IssueKind::BadPv,
        IssueKind::WrongTbScore,
        IssueKind::BadTbPv,
    ];

    pub fn label(self) -> &'static str {
        match self {
            IssueKind::BetterMate => "Better mates",
            IssueKind::WrongMate => "Wrong mates",
            IssueKind::BadPv => "Bad PVs",
            IssueKind::WrongTbScore => "Wrong TB scores",
            IssueKind::BadTbPv => "Bad TB PVs",
        }
    }
}

/// 局面単位の分類（最終行で決める。必ずどれか1つ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PositionOutcome {
    BestMate,
    BetterMate,
    LongerMate,
    WrongSign,
    BadPv,
    TbWin,
    TbIssue,
    NotFound,
}

impl PositionOutcome {
    pub fn label(self) -> &'static str {
        match self {
            PositionOutcome::BestMate => "best mate",
            PositionOutcome::BetterMate => "better mate",
            PositionOutcome::LongerMate => "longer mate",
            PositionOutcome::WrongSign => "wrong sign",
            PositionOutcome::BadPv => "bad PV",
            PositionOutcome::TbWin => "TB win",
            PositionOutcome::TbIssue => "bad TB line",
            PositionOutcome::NotFound => "no mate",
        }
    }
}

fn same_sign(value: i32, claimed: i32) -> bool {
    (value > 0) == (claimed > 0)
}

/// 報告1件に該当する問題を列挙する。
pub fn classify_issues(claimed: i32, ann: &Announcement) -> Vec<IssueKind> {
    let mut kinds = Vec::new();
    match (ann.key.mate, ann.key.tb_score) {
        (Some(mate), _) => {
            if !same_sign(mate, claimed) {
                kinds.push(IssueKind::WrongMate);
            } else {
                if mate.abs() < claimed.abs() {
                    kinds.push(IssueKind::BetterMate);
                }
                if !ann.verdict.is_ok() {
                    kinds.push(IssueKind::BadPv);
                }
            }
        }
        (None, Some(score)) => {
            if !same_sign(score, claimed) {
                kinds.push(IssueKind::WrongTbScore);
            } else if ann.verdict != Verdict::None && !ann.verdict.is_ok() {
                kinds.push(IssueKind::BadTbPv);
            }
        }
        (None, None) => {}
    }
    kinds
}

/// 最終行から局面の分類を決める。
pub fn classify_position(record: &PositionRecord) -> PositionOutcome {
    let claimed = record.claimed_mate;
    let Some(last) = record.final_line() else {
        return PositionOutcome::NotFound;
    };
    match (last.key.mate, last.key.tb_score) {
        (Some(mate), _) if !same_sign(mate, claimed) => PositionOutcome::WrongSign,
        (Some(_), _) if !last.verdict.is_ok() => PositionOutcome::BadPv,
        (Some(mate), _) if mate == claimed => PositionOutcome::BestMate,
        (Some(mate), _) if mate.abs() < claimed.abs() => PositionOutcome::BetterMate,
        (Some(_), _) => PositionOutcome::LongerMate,
        (None, Some(score)) if same_sign(score, claimed) && last.verdict.is_ok() => {
            PositionOutcome::TbWin
        }
        (None, Some(_)) => PositionOutcome::TbIssue,
        (None, None) => PositionOutcome::NotFound,
    }
}

/// 問題の具体例
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueExample {
    pub position_index: usize,
    /// 局面内での報告の初出順
    pub seq: usize,
    pub fen: String,
    pub claimed_mate: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tb_score: Option<i32>,
    pub verdict: Verdict,
    pub pv: String,
}

impl IssueExample {
    fn sort_key(&self) -> (usize, usize) {
        (self.position_index, self.seq)
    }

    pub fn describe(&self, kind: IssueKind) -> String {
        let score = match (self.mate, self.tb_score) {
            (Some(mate), _) => format!("mate #{mate}"),
            (None, Some(cp)) => format!("TB score {cp}"),
            (None, None) => "line".to_string(),
        };
        let what = match kind {
            IssueKind::BetterMate => format!("{score} (better)"),
            IssueKind::WrongMate | IssueKind::WrongTbScore => format!("{score} (wrong sign)"),
            IssueKind::BadPv | IssueKind::BadTbPv => {
                format!("{score} with PV status \"{}\"", self.verdict)
            }
        };
        format!("Found {what} for FEN \"{}\" with bm #{}.", self.fen, self.claimed_mate)
    }
}

/// 問題の種類ごとの集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IssueTally {
    /// 該当した報告の数
    pub announcements: u64,
    /// 1回以上該当した局面の数
    pub positions: u64,
    /// `sort_key` 昇順。代表例のみ保持する設定なら先頭1件だけ
    pub examples: Vec<IssueExample>,
}

impl IssueTally {
    fn insert_example(&mut self, example: IssueExample, keep_all: bool) {
        let key = example.sort_key();
        let at = self.examples.partition_point(|e| e.sort_key() < key);
        self.examples.insert(at, example);
        if !keep_all {
            self.examples.truncate(1);
        }
    }

    fn merge(&mut self, other: IssueTally, keep_all: bool) {
        self.announcements += other.announcements;
        self.positions += other.positions;
        for example in other.examples {
            self.insert_example(example, keep_all);
        }
    }
}

/// 最小/最大/合計
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Spread {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub count: u64,
}

impl Spread {
    fn single(value: u64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn combine(self, other: Spread) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

fn combine_spread(slot: &mut Option<Spread>, value: Option<Spread>) {
    *slot = match (*slot, value) {
        (Some(a), Some(b)) => Some(a.combine(b)),
        (a, b) => a.or(b),
    };
}

/// 詰み手数ごとの、最善詰みを最初に報告した時点の探索量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistanceStats {
    pub positions: u64,
    pub nodes: Option<Spread>,
    pub depth: Option<Spread>,
}

impl DistanceStats {
    fn merge(&mut self, other: DistanceStats) {
        self.positions += other.positions;
        combine_spread(&mut self.nodes, other.nodes);
        combine_spread(&mut self.depth, other.depth);
    }
}

/// 全体集計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    #[serde(skip)]
    keep_all_examples: bool,
    pub total_positions: u64,
    /// 最終行が正しい符号の詰み
    pub found_mates: u64,
    /// 最終行が主張と同じ詰み
    pub best_mates: u64,
    /// 最終行が詰みではなく、正しい符号の EGTB スコア
    pub found_tb_wins: u64,
    pub outcomes: BTreeMap<PositionOutcome, u64>,
    pub issues: BTreeMap<IssueKind, IssueTally>,
    /// キーは主張の詰み手数の絶対値
    pub best_mate_search: BTreeMap<u32, DistanceStats>,
    pub total_nodes: u64,
    pub total_time_ms: u64,
}

impl Report {
    pub fn new(keep_all_examples: bool) -> Self {
        Self {
            keep_all_examples,
            ..Self::default()
        }
    }

    /// 1局面ぶんの記録を取り込む。
    pub fn fold(&mut self, record: &PositionRecord) {
        let claimed = record.claimed_mate;
        self.total_positions += 1;
        self.total_nodes += record.telemetry.nodes.unwrap_or(0);
        self.total_time_ms += record.telemetry.time_ms.unwrap_or(record.elapsed_ms);
        *self.outcomes.entry(classify_position(record)).or_default() += 1;

        if let Some(last) = record.final_line() {
            match (last.key.mate, last.key.tb_score) {
                (Some(mate), _) if same_sign(mate, claimed) => {
                    self.found_mates += 1;
                    if mate == claimed {
                        self.best_mates += 1;
                        let stats =
                            self.best_mate_search.entry(claimed.unsigned_abs()).or_default();
                        stats.merge(DistanceStats {
                            positions: 1,
                            nodes: last.first_seen.nodes.map(Spread::single),
                            depth: last.first_seen.depth.map(|d| Spread::single(u64::from(d))),
                        });
                    }
                }
                (None, Some(score)) if same_sign(score, claimed) => self.found_tb_wins += 1,
                _ => {}
            }
        }

        let mut affected = BTreeSet::new();
        for (seq, ann) in record.announcements.iter().enumerate() {
            for kind in classify_issues(claimed, ann) {
                let tally = self.issues.entry(kind).or_default();
                tally.announcements += 1;
                tally.insert_example(
                    IssueExample {
                        position_index: record.index,
                        seq,
                        fen: record.fen.clone(),
                        claimed_mate: claimed,
                        mate: ann.key.mate,
                        tb_score: ann.key.tb_score,
                        verdict: ann.verdict.clone(),
                        pv: ann.key.pv.clone(),
                    },
                    self.keep_all_examples,
                );
                affected.insert(kind);
            }
        }
        for kind in affected {
            self.issues.entry(kind).or_default().positions += 1;
        }
    }

    /// 別々に集計した結果を合わせる。
    pub fn merge(&mut self, other: Report) {
        let keep_all = self.keep_all_examples || other.keep_all_examples;
        self.keep_all_examples = keep_all;
        self.total_positions += other.total_positions;
        self.found_mates += other.found_mates;
        self.best_mates += other.best_mates;
        self.found_tb_wins += other.found_tb_wins;
        self.total_nodes += other.total_nodes;
        self.total_time_ms += other.total_time_ms;
        for (outcome, count) in other.outcomes {
            *self.outcomes.entry(outcome).or_default() += count;
        }
        for (kind, tally) in other.issues {
            self.issues.entry(kind).or_default().merge(tally, keep_all);
        }
        for (distance, stats) in other.best_mate_search {
            self.best_mate_search.entry(distance).or_default().merge(stats);
        }
    }

    /// 全種類の問題に該当した報告の総数
    pub fn issue_count(&self) -> u64 {
        self.issues.values().map(|t| t.announcements).sum()
    }

    pub fn nodes_per_second(&self) -> Option<f64> {
        if self.total_time_ms == 0 {
            None
        } else {
            Some(self.total_nodes as f64 * 1000.0 / self.total_time_ms as f64)
        }
    }

    /// 集計結果をテキストで書き出す。合計値を先に、問題の内訳を後に出す。
    pub fn render<W: Write>(&self, out: &mut W, bench: bool) -> io::Result<()> {
        writeln!(out, "{:<15}{}", "Total fens:", self.total_positions)?;
        writeln!(out, "{:<15}{}", "Found mates:", self.found_mates)?;
        writeln!(out, "{:<15}{}", "Best mates:", self.best_mates)?;
        if self.found_tb_wins > 0 {
            writeln!(out, "{:<15}{}", "Found TB wins:", self.found_tb_wins)?;
        }

        if self.issue_count() > 0 {
            writeln!(out)?;
            writeln!(
                out,
                "Parsing the engine's full UCI output, the following issues were detected:"
            )?;
            for kind in IssueKind::ALL {
                let Some(tally) = self.issues.get(&kind).filter(|t| t.announcements > 0) else {
                    continue;
                };
                writeln!(
                    out,
                    "{:<17}{} (in {} positions)",
                    format!("{}:", kind.label()),
                    tally.announcements,
                    tally.positions
                )?;
            }
            for kind in IssueKind::ALL {
                let Some(tally) = self.issues.get(&kind).filter(|t| !t.examples.is_empty()) else {
                    continue;
                };
                writeln!(out)?;
                if self.keep_all_examples {
                    writeln!(out, "{}, all occurrences:", kind.label())?;
                } else {
                    writeln!(out, "{}, first affected position:", kind.label())?;
                }
                for example in &tally.examples {
                    writeln!(out, "  {}", example.describe(kind))?;
                    if !example.pv.is_empty() {
                        writeln!(out, "  PV: {}", example.pv)?;
                    }
                }
            }
        }

        if bench {
            self.render_bench(out)?;
        }
        Ok(())
    }

    fn render_bench<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "Final line outcomes:")?;
        for (outcome, count) in &self.outcomes {
            writeln!(out, "  {:<13}{}", format!("{}:", outcome.label()), count)?;
        }
        if !self.best_mate_search.is_empty() {
            writeln!(out)?;
            writeln!(out, "Search effort to first report the best mate:")?;
            writeln!(
                out,
                "  {:>5} {:>9} {:>36} {:>20}",
                "mate", "positions", "nodes min/mean/max", "depth min/mean/max"
            )?;
            for (distance, stats) in &self.best_mate_search {
                writeln!(
                    out,
                    "  {:>5} {:>9} {:>36} {:>20}",
                    format!("#{distance}"),
                    stats.positions,
                    format_spread(stats.nodes),
                    format_spread(stats.depth)
                )?;
            }
        }
        writeln!(out)?;
        writeln!(out, "{:<15}{}", "Total nodes:", self.total_nodes)?;
        writeln!(out, "{:<15}{:.1}s", "Total time:", self.total_time_ms as f64 / 1000.0)?;
        if let Some(nps) = self.nodes_per_second() {
            writeln!(out, "{:<15}{:.0}", "Nodes/second:", nps)?;
        }
        Ok(())
    }
}

fn format_spread(spread: Option<Spread>) -> String {
    match spread {
        Some(s) => format!("{}/{:.1}/{}", s.min, s.mean(), s.max),
        None => "-".to_string(),
    }
}
