//! 1エンジンで局面を順に探索させ、報告を検証して記録にまとめる

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use log::{debug, trace};
use matetrack_core::rules::complete_fen;
use matetrack_core::{
    AnnouncementKey, AnnouncementLog, PositionClaim, PositionRecord, RulesOracle,
    SearchTelemetry, verify_announcement,
};

use crate::uci::{EngineSession, InfoLine, Score, SearchLimit, SearchRequest};

/// Stockfish 系が EGTB 勝ちを表す cp の下限（20000 - MAX_PLY）
pub const DEFAULT_MIN_TB_SCORE: i32 = 20_000 - 246;

/// ワーカー共通の設定
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub limit: SearchLimit,
    /// この絶対値以上の cp を EGTB 勝ち（負け）とみなす
    pub min_tb_score: i32,
    /// EGTB スコアも検証対象にするか
    pub tablebase: bool,
}

/// info 行から検証対象のキーを作る。詰みも EGTB スコアも無ければ `None`。
pub fn announcement_key(info: &InfoLine, settings: &WorkerSettings) -> Option<AnnouncementKey> {
    if !info.is_primary() || !info.has_exact_score() {
        return None;
    }
    match info.score? {
        Score::Mate(0) => None,
        Score::Mate(mate) => Some(AnnouncementKey::new(Some(mate), None, &info.pv)),
        Score::Cp(cp) if settings.tablebase && cp.abs() >= settings.min_tb_score => {
            Some(AnnouncementKey::new(None, Some(cp), &info.pv))
        }
        Score::Cp(_) => None,
    }
}

fn update_telemetry(telemetry: &mut SearchTelemetry, info: &InfoLine) {
    telemetry.nodes = info.nodes.or(telemetry.nodes);
    telemetry.depth = info.depth.or(telemetry.depth);
    telemetry.time_ms = info.time_ms.or(telemetry.time_ms);
}

/// 1局面を探索させて記録を作る。エンジン側の失敗はそのまま返す。
pub fn analyse_position<E, O>(
    session: &mut E,
    oracle: &O,
    claim: &PositionClaim,
    settings: &WorkerSettings,
) -> Result<PositionRecord>
where
    E: EngineSession + ?Sized,
    O: RulesOracle,
{
    let fen = complete_fen(&claim.fen);
    let req = SearchRequest {
        fen: &fen,
        limit: settings.limit.for_claim(claim.claimed_mate),
    };
    let mut log = AnnouncementLog::new();
    let mut telemetry = SearchTelemetry::default();

    let mut on_info = |info: &InfoLine| {
        update_telemetry(&mut telemetry, info);
        let Some(key) = announcement_key(info, settings) else {
            return;
        };
        let is_new = log.observe(key, info.telemetry(), |key| {
            verify_announcement(oracle, &fen, claim.claimed_mate, key)
        });
        if is_new {
            trace!("#{} new line: {:?}", claim.index, info.score);
        }
    };
    let summary = session
        .analyse(&req, &mut on_info)
        .with_context(|| format!("search failed for FEN \"{}\"", claim.fen))?;

    debug!(
        "#{} bm #{}: {} distinct lines, bestmove {:?}",
        claim.index,
        claim.claimed_mate,
        log.len(),
        summary.bestmove
    );
    Ok(PositionRecord {
        index: claim.index,
        fen: claim.fen.clone(),
        claimed_mate: claim.claimed_mate,
        announcements: log.finish(),
        telemetry,
        elapsed_ms: summary.elapsed_ms,
    })
}

/// チャンクを先頭から順に処理する。`shutdown` が立ったら残りを捨てて返す。
pub fn analyse_chunk<E, O>(
    session: &mut E,
    oracle: &O,
    claims: &[PositionClaim],
    settings: &WorkerSettings,
    shutdown: &AtomicBool,
) -> Result<Vec<PositionRecord>>
where
    E: EngineSession + ?Sized,
    O: RulesOracle,
{
    let mut records = Vec::with_capacity(claims.len());
    for claim in claims {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        records.push(analyse_position(session, oracle, claim, settings)?);
    }
    Ok(records)
}
