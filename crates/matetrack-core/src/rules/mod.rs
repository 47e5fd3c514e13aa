//! 盤面ルールの窓口（Rules Oracle）
//!
//! 検証器はチェスのルールを一切持たず、このトレイト越しに
//! 局面の読み込み・指し手の適用・詰み判定・引き分け請求判定・EGTB 照会だけを行う。

mod chess;

pub use chess::{complete_fen, ChessBoard, ChessOracle};

use thiserror::Error;

/// Oracle が返す失敗。
///
/// PV 中の不正手は `Verdict::Error` に落とされ、バッチは止めない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("invalid position '{fen}': {reason}")]
    InvalidPosition { fen: String, reason: String },
    #[error("malformed move notation '{0}'")]
    InvalidNotation(String),
    #[error("illegal move '{mv}' in {fen}")]
    IllegalMove { mv: String, fen: String },
}

/// 手番側から見た EGTB の WDL。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbWdl {
    Win,
    Loss,
    Draw,
    /// テーブル未ロード、駒数超過、キャスリング権あり、照会失敗のいずれか
    Unknown,
}

/// 検証器が消費するルール操作。
///
/// `Board` は検証のたびに複製されるスクラッチ局面で、
/// 千日手判定に必要な履歴も含めて自己完結していること。
pub trait RulesOracle {
    type Board: Clone;

    /// FEN/EPD 文字列から局面を作る。
    fn load_position(&self, fen: &str) -> Result<Self::Board, RulesError>;

    /// UCI 表記の指し手を適用する。失敗時の `board` の状態は未定義。
    fn apply_move(&self, board: &mut Self::Board, uci: &str) -> Result<(), RulesError>;

    fn is_checkmate(&self, board: &Self::Board) -> bool;

    /// 手番側が千日手または50手ルールで引き分けを請求できるか
    fn can_claim_draw(&self, board: &Self::Board) -> bool;

    fn probe_tablebase(&self, board: &Self::Board) -> TbWdl;

    /// EGTB 照会が有効か
    fn has_tablebase(&self) -> bool;

    /// 局面を FEN に戻す（データセット書き出し用）
    fn encode_position(&self, board: &Self::Board) -> String;
}
