//! shakmaty / shakmaty-syzygy による `RulesOracle` 実装

use std::io;

use log::{debug, info};
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};
use shakmaty_syzygy::{Tablebase, Wdl};

use super::{RulesError, RulesOracle, TbWdl};

/// Syzygy の最大駒数（7駒テーブルまで）
const MAX_TB_PIECES: usize = 7;

/// 千日手判定用の履歴を持つ局面。
///
/// `history` は直前の駒取り/ポーン移動以降に現れた局面のハッシュで、末尾が現局面。
#[derive(Clone, Debug)]
pub struct ChessBoard {
    pos: Chess,
    history: Vec<Zobrist64>,
}

impl ChessBoard {
    fn new(pos: Chess) -> Self {
        let key = position_key(&pos);
        Self {
            pos,
            history: vec![key],
        }
    }

    pub fn position(&self) -> &Chess {
        &self.pos
    }

    fn play(&mut self, mv: Move) {
        if mv.is_zeroing() {
            self.history.clear();
        }
        self.pos.play_unchecked(&mv);
        self.history.push(position_key(&self.pos));
    }

    fn occurrences(&self, key: Zobrist64) -> usize {
        self.history.iter().filter(|k| **k == key).count()
    }

    fn can_claim_fifty_moves(&self) -> bool {
        let legal = self.pos.legal_moves();
        if self.pos.halfmoves() >= 100 && !legal.is_empty() {
            return true;
        }
        if self.pos.halfmoves() >= 99 {
            return legal.iter().filter(|mv| !mv.is_zeroing()).any(|mv| {
                let mut child = self.pos.clone();
                child.play_unchecked(mv);
                !child.legal_moves().is_empty()
            });
        }
        false
    }

    fn can_claim_threefold(&self) -> bool {
        if self.occurrences(position_key(&self.pos)) >= 3 {
            return true;
        }
        // 次の1手で3回目の同一局面になるなら、その手を指す前に請求できる
        self.pos.legal_moves().iter().filter(|mv| !mv.is_zeroing()).any(|mv| {
            let mut child = self.pos.clone();
            child.play_unchecked(mv);
            self.occurrences(position_key(&child)) >= 2
        })
    }
}

fn position_key(pos: &Chess) -> Zobrist64 {
    pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal)
}

/// EPD（4フィールド）に手数フィールドを補って FEN にする。
pub fn complete_fen(fen: &str) -> String {
    let fields = fen.split_whitespace().count();
    if fields == 4 {
        format!("{} 0 1", fen.trim())
    } else {
        fen.trim().to_string()
    }
}

/// 標準チェスのルール窓口。
#[derive(Default)]
pub struct ChessOracle {
    tablebase: Option<Tablebase<Chess>>,
}

impl ChessOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Syzygy テーブルのディレクトリ（OS のパス区切りで複数指定可）を読み込む。
    ///
    /// ファイルは照会時に遅延オープンされるため、ここではディレクトリ走査のみ。
    pub fn with_tablebase(paths: &str) -> io::Result<Self> {
        let mut tables = Tablebase::new();
        for dir in std::env::split_paths(paths) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            tables.add_directory(&dir)?;
            info!("syzygy tables added from {}", dir.display());
        }
        Ok(Self {
            tablebase: Some(tables),
        })
    }
}

impl RulesOracle for ChessOracle {
    type Board = ChessBoard;

    fn load_position(&self, fen: &str) -> Result<ChessBoard, RulesError> {
        let full = complete_fen(fen);
        let invalid = |reason: String| RulesError::InvalidPosition {
            fen: fen.to_string(),
            reason,
        };
        let parsed: Fen = full.parse().map_err(|e| invalid(format!("{e}")))?;
        let pos: Chess =
            parsed.into_position(CastlingMode::Standard).map_err(|e| invalid(format!("{e}")))?;
        Ok(ChessBoard::new(pos))
    }

    fn apply_move(&self, board: &mut ChessBoard, uci: &str) -> Result<(), RulesError> {
        let parsed: UciMove =
            uci.parse().map_err(|_| RulesError::InvalidNotation(uci.to_string()))?;
        let mv = parsed.to_move(&board.pos).map_err(|_| RulesError::IllegalMove {
            mv: uci.to_string(),
            fen: self.encode_position(board),
        })?;
        board.play(mv);
        Ok(())
    }

    fn is_checkmate(&self, board: &ChessBoard) -> bool {
        board.pos.is_checkmate()
    }

    fn can_claim_draw(&self, board: &ChessBoard) -> bool {
        board.can_claim_fifty_moves() || board.can_claim_threefold()
    }

    fn probe_tablebase(&self, board: &ChessBoard) -> TbWdl {
        let Some(tables) = &self.tablebase else {
            return TbWdl::Unknown;
        };
        let pos = &board.pos;
        if !pos.castles().castling_rights().is_empty()
            || pos.board().occupied().count() > MAX_TB_PIECES
        {
            return TbWdl::Unknown;
        }
        match tables.probe_wdl_after_zeroing(pos) {
            Ok(Wdl::Win) => TbWdl::Win,
            Ok(Wdl::Loss) => TbWdl::Loss,
            // cursed win / blessed loss は50手ルールで引き分け
            Ok(_) => TbWdl::Draw,
            Err(err) => {
                debug!("syzygy probe failed: {err}");
                TbWdl::Unknown
            }
        }
    }

    fn has_tablebase(&self) -> bool {
        self.tablebase.is_some()
    }

    fn encode_position(&self, board: &ChessBoard) -> String {
        Fen::from_setup(board.pos.clone().into_setup(EnPassantMode::Legal)).to_string()
    }
}
