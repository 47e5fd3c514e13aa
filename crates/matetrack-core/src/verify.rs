//! PV 検証
//!
//! エンジンが報告した詰み手順（または EGTB 勝ちの手順）を Oracle 上で再生し、
//! 手数・詰み局面・引き分け請求の機会・EGTB との整合を判定する。
//! 入力局面は読み込み直したスクラッチ局面上でのみ操作する。

use std::fmt;

use serde::{Serialize, Serializer};

use crate::announce::AnnouncementKey;
use crate::rules::{RulesOracle, TbWdl};

/// 1件の報告に対する判定結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// 手順が必要手数に足りない（EGTB 手順では末端局面を照会できなかった）
    Short,
    Long,
    /// 詰みで終わらない、符号違い、EGTB と勝敗が食い違う
    Wrong,
    /// 負け側が引き分けを請求できる局面を通過した、または EGTB が引き分け
    Draw,
    /// 検証対象外（詰みも EGTB スコアも無い）
    None,
    Error(String),
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => f.write_str("ok"),
            Verdict::Short => f.write_str("short"),
            Verdict::Long => f.write_str("long"),
            Verdict::Wrong => f.write_str("wrong"),
            Verdict::Draw => f.write_str("draw"),
            Verdict::None => f.write_str("none"),
            Verdict::Error(reason) => write!(f, "error \"{reason}\""),
        }
    }
}

impl Serialize for Verdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 詰み値から詰みまでの手数（ply）を求める。
///
/// `mate > 0` は `2*mate-1` ply で詰ます、`mate < 0` は `-2*mate` ply で詰まされる。
pub fn required_plies(mate: i32) -> usize {
    let plies = if mate > 0 { 2 * i64::from(mate) - 1 } else { -2 * i64::from(mate) };
    usize::try_from(plies).unwrap_or(0)
}

/// `ply` 手目で手番を持つのが勝ち側か
fn winner_to_move(ply: usize, root_wins: bool) -> bool {
    (ply % 2 == 0) == root_wins
}

/// 手番側の WDL が、勝ち側/負け側の想定と食い違うかを判定する。
fn tablebase_verdict(wdl: TbWdl, winner_to_move: bool) -> Option<Verdict> {
    match wdl {
        TbWdl::Unknown => None,
        TbWdl::Draw => Some(Verdict::Draw),
        TbWdl::Win if winner_to_move => None,
        TbWdl::Loss if !winner_to_move => None,
        TbWdl::Win | TbWdl::Loss => Some(Verdict::Wrong),
    }
}

/// PV を1手ずつ再生する。途中で判定が確定したら `Err(verdict)` を返す。
fn replay<O, S>(
    oracle: &O,
    board: &mut O::Board,
    pv: &[S],
    root_wins: bool,
) -> Result<(), Verdict>
where
    O: RulesOracle,
    S: AsRef<str>,
{
    let tablebase = oracle.has_tablebase();
    for (ply, mv) in pv.iter().enumerate() {
        let winner = winner_to_move(ply, root_wins);
        if !winner && oracle.can_claim_draw(board) {
            return Err(Verdict::Draw);
        }
        if tablebase {
            if let Some(verdict) = tablebase_verdict(oracle.probe_tablebase(board), winner) {
                return Err(verdict);
            }
        }
        oracle.apply_move(board, mv.as_ref()).map_err(|e| Verdict::Error(e.to_string()))?;
    }
    Ok(())
}

/// 詰み報告 `#mate` の PV を検証する。
///
/// 手数チェックは再生より先に行うため、短すぎる PV は自身の長さ以上の再生を消費しない。
pub fn verify_mate_pv<O, S>(oracle: &O, fen: &str, mate: i32, pv: &[S]) -> Verdict
where
    O: RulesOracle,
    S: AsRef<str>,
{
    let required = required_plies(mate);
    if pv.len() < required {
        return Verdict::Short;
    }
    if pv.len() > required {
        return Verdict::Long;
    }
    let mut board = match oracle.load_position(fen) {
        Ok(board) => board,
        Err(e) => return Verdict::Error(e.to_string()),
    };
    if let Err(verdict) = replay(oracle, &mut board, pv, mate > 0) {
        return verdict;
    }
    if oracle.is_checkmate(&board) {
        Verdict::Ok
    } else {
        Verdict::Wrong
    }
}

/// EGTB 勝ち（負け）スコアだけが報告された PV を検証する。
///
/// 正確な手数は分からないので長さは見ず、末端局面の照会結果で判定する。
pub fn verify_tb_pv<O, S>(oracle: &O, fen: &str, root_wins: bool, pv: &[S]) -> Verdict
where
    O: RulesOracle,
    S: AsRef<str>,
{
    let mut board = match oracle.load_position(fen) {
        Ok(board) => board,
        Err(e) => return Verdict::Error(e.to_string()),
    };
    if let Err(verdict) = replay(oracle, &mut board, pv, root_wins) {
        return verdict;
    }
    let winner = winner_to_move(pv.len(), root_wins);
    if oracle.is_checkmate(&board) {
        return if winner { Verdict::Wrong } else { Verdict::Ok };
    }
    match oracle.probe_tablebase(&board) {
        TbWdl::Unknown => Verdict::Short,
        wdl => tablebase_verdict(wdl, winner).unwrap_or(Verdict::Ok),
    }
}

/// 報告1件を主張 `claimed_mate` に対して判定する。
///
/// 符号違いは手順を再生せず `Wrong`。詰み値があれば詰み検証、
/// EGTB スコアのみなら EGTB 検証、どちらも無ければ `None`。
pub fn verify_announcement<O: RulesOracle>(
    oracle: &O,
    fen: &str,
    claimed_mate: i32,
    key: &AnnouncementKey,
) -> Verdict {
    let pv = key.moves();
    match (key.mate, key.tb_score) {
        (Some(mate), _) => {
            if mate.signum() != claimed_mate.signum() {
                Verdict::Wrong
            } else {
                verify_mate_pv(oracle, fen, mate, &pv)
            }
        }
        (None, Some(score)) if oracle.has_tablebase() => {
            if (score > 0) != (claimed_mate > 0) {
                Verdict::Wrong
            } else {
                verify_tb_pv(oracle, fen, score > 0, &pv)
            }
        }
        _ => Verdict::None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::rules::{ChessOracle, RulesError};

    /// 手順と判定を台本で与える Oracle。局面は指した手の列そのもの。
    #[derive(Default)]
    pub(crate) struct ScriptedOracle {
        pub mate_line: Vec<&'static str>,
        pub draw_claims_at: Vec<usize>,
        pub tb: HashMap<usize, TbWdl>,
        pub tablebase: bool,
    }

    impl ScriptedOracle {
        pub fn mating(line: &[&'static str]) -> Self {
            Self {
                mate_line: line.to_vec(),
                ..Self::default()
            }
        }
    }

    impl RulesOracle for ScriptedOracle {
        type Board = Vec<String>;

        fn load_position(&self, fen: &str) -> Result<Vec<String>, RulesError> {
            if fen == "bad" {
                return Err(RulesError::InvalidPosition {
                    fen: fen.to_string(),
                    reason: "scripted".to_string(),
                });
            }
            Ok(Vec::new())
        }

        fn apply_move(&self, board: &mut Vec<String>, uci: &str) -> Result<(), RulesError> {
            if uci == "??" {
                return Err(RulesError::InvalidNotation(uci.to_string()));
            }
            if uci.starts_with('x') {
                return Err(RulesError::IllegalMove {
                    mv: uci.to_string(),
                    fen: board.join(" "),
                });
            }
            board.push(uci.to_string());
            Ok(())
        }

        fn is_checkmate(&self, board: &Vec<String>) -> bool {
            board.iter().map(String::as_str).eq(self.mate_line.iter().copied())
        }

        fn can_claim_draw(&self, board: &Vec<String>) -> bool {
            self.draw_claims_at.contains(&board.len())
        }

        fn probe_tablebase(&self, board: &Vec<String>) -> TbWdl {
            if !self.tablebase {
                return TbWdl::Unknown;
            }
            self.tb.get(&board.len()).copied().unwrap_or(TbWdl::Unknown)
        }

        fn has_tablebase(&self) -> bool {
            self.tablebase
        }

        fn encode_position(&self, board: &Vec<String>) -> String {
            board.join(" ")
        }
    }

    const MATE3: [&str; 5] = ["a", "b", "c", "d", "e"];

    #[test]
    fn required_plies_matches_sign_convention() {
        assert_eq!(required_plies(1), 1);
        assert_eq!(required_plies(3), 5);
        assert_eq!(required_plies(-1), 2);
        assert_eq!(required_plies(-4), 8);
    }

    #[test]
    fn exact_mating_line_is_ok() {
        let oracle = ScriptedOracle::mating(&MATE3);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Ok);
    }

    #[test]
    fn length_is_checked_before_replay() {
        let oracle = ScriptedOracle::mating(&MATE3);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &["a", "b", "c", "d"]), Verdict::Short);
        assert_eq!(
            verify_mate_pv(&oracle, "fen", 3, &["a", "b", "c", "d", "e", "f"]),
            Verdict::Long
        );
        // 不正手を含んでいても短ければ Short
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &["xa", "b"]), Verdict::Short);
        let empty: [&str; 0] = [];
        assert_eq!(verify_mate_pv(&oracle, "fen", 1, &empty), Verdict::Short);
    }

    #[test]
    fn line_not_ending_in_mate_is_wrong() {
        let oracle = ScriptedOracle::mating(&MATE3);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &["a", "b", "c", "d", "z"]), Verdict::Wrong);
    }

    #[test]
    fn draw_claim_only_matters_for_the_losing_side() {
        let mut oracle = ScriptedOracle::mating(&MATE3);
        oracle.draw_claims_at = vec![3];
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Draw);

        // 勝ち側の手番で請求可能でも関係ない
        oracle.draw_claims_at = vec![2];
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Ok);

        // 詰まされる側から見た手順では、初手の時点で負け側の手番
        let mated = ScriptedOracle {
            mate_line: vec!["a", "b", "c", "d"],
            draw_claims_at: vec![0],
            ..ScriptedOracle::default()
        };
        assert_eq!(verify_mate_pv(&mated, "fen", -2, &["a", "b", "c", "d"]), Verdict::Draw);
    }

    #[test]
    fn illegal_or_malformed_move_is_error_not_wrong() {
        let oracle = ScriptedOracle::mating(&MATE3);
        let verdict = verify_mate_pv(&oracle, "fen", 3, &["a", "b", "xc", "d", "e"]);
        assert!(matches!(&verdict, Verdict::Error(reason) if reason.contains("illegal move 'xc'")));
        let verdict = verify_mate_pv(&oracle, "fen", 3, &["a", "??", "c", "d", "e"]);
        assert!(matches!(&verdict, Verdict::Error(reason) if reason.contains("malformed")));
        assert!(matches!(verify_mate_pv(&oracle, "bad", 3, &MATE3), Verdict::Error(_)));
    }

    #[test]
    fn tablebase_disagreement_during_mate_replay() {
        let mut oracle = ScriptedOracle::mating(&MATE3);
        oracle.tablebase = true;
        oracle.tb = HashMap::from([(1, TbWdl::Loss), (2, TbWdl::Win)]);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Ok);

        oracle.tb.insert(3, TbWdl::Draw);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Draw);

        oracle.tb.insert(3, TbWdl::Win);
        assert_eq!(verify_mate_pv(&oracle, "fen", 3, &MATE3), Verdict::Wrong);
    }

    #[test]
    fn tablebase_line_is_judged_at_the_leaf() {
        let mut oracle = ScriptedOracle {
            tablebase: true,
            ..ScriptedOracle::default()
        };
        let pv = ["a", "b", "c"];
        assert_eq!(verify_tb_pv(&oracle, "fen", true, &pv), Verdict::Short);

        // 3手後は負け側の手番
        oracle.tb.insert(3, TbWdl::Loss);
        assert_eq!(verify_tb_pv(&oracle, "fen", true, &pv), Verdict::Ok);
        oracle.tb.insert(3, TbWdl::Draw);
        assert_eq!(verify_tb_pv(&oracle, "fen", true, &pv), Verdict::Draw);
        oracle.tb.insert(3, TbWdl::Win);
        assert_eq!(verify_tb_pv(&oracle, "fen", true, &pv), Verdict::Wrong);
        assert_eq!(verify_tb_pv(&oracle, "fen", false, &pv), Verdict::Ok);
    }

    #[test]
    fn announcement_sign_mismatch_skips_replay() {
        let oracle = ScriptedOracle::mating(&MATE3);
        let key = AnnouncementKey::new(Some(4), None, &["xa"]);
        assert_eq!(verify_announcement(&oracle, "fen", -4, &key), Verdict::Wrong);

        let key = AnnouncementKey::new(Some(3), None, &MATE3);
        assert_eq!(verify_announcement(&oracle, "fen", 3, &key), Verdict::Ok);

        // 短い詰みも自身の手数で検証する
        let oracle = ScriptedOracle::mating(&["a", "b", "c"]);
        let key = AnnouncementKey::new(Some(2), None, &["a", "b", "c"]);
        assert_eq!(verify_announcement(&oracle, "fen", 3, &key), Verdict::Ok);
    }

    #[test]
    fn announcement_without_signal_is_not_evaluated() {
        let oracle = ScriptedOracle::default();
        let key = AnnouncementKey::new(None, None, &["a"]);
        assert_eq!(verify_announcement(&oracle, "fen", 3, &key), Verdict::None);
        // EGTB 無効時の EGTB スコアも対象外
        let key = AnnouncementKey::new(None, Some(20_000), &["a"]);
        assert_eq!(verify_announcement(&oracle, "fen", 3, &key), Verdict::None);
    }

    #[test]
    fn back_rank_mate_on_a_real_board() {
        let oracle = ChessOracle::new();
        let fen = "6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1";
        assert_eq!(verify_mate_pv(&oracle, fen, 1, &["a1a8"]), Verdict::Ok);
        assert_eq!(verify_mate_pv(&oracle, fen, 1, &["a1a7"]), Verdict::Wrong);
        assert!(matches!(verify_mate_pv(&oracle, fen, 1, &["a1h8"]), Verdict::Error(_)));
    }

    #[test]
    fn fifty_move_claim_on_a_real_board() {
        let oracle = ChessOracle::new();
        let line = ["g8h8", "a1a8"];
        assert_eq!(
            verify_mate_pv(&oracle, "6k1/5ppp/8/8/8/8/8/R5K1 b - - 0 80", -1, &line),
            Verdict::Ok
        );
        // 98 なら Kh8 の後で 99 になるが、請求するのは白番
        assert_eq!(
            verify_mate_pv(&oracle, "6k1/5ppp/8/8/8/8/8/R5K1 b - - 98 80", -1, &line),
            Verdict::Ok
        );
        // 99 なら黒は Kh8 と同時に50手ルールを請求できる
        assert_eq!(
            verify_mate_pv(&oracle, "6k1/5ppp/8/8/8/8/8/R5K1 b - - 99 80", -1, &line),
            Verdict::Draw
        );
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(Verdict::Ok.to_string(), "ok");
        assert_eq!(Verdict::None.to_string(), "none");
        assert_eq!(Verdict::Error("boom".into()).to_string(), "error \"boom\"");
        assert_eq!(serde_json::to_string(&Verdict::Long).unwrap(), "\"long\"");
    }
}
