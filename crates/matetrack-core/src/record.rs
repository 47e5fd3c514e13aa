use serde::Serialize;

use crate::announce::Announcement;

/// info 行から拾った探索量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchTelemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
}

/// 1局面の解析結果。ワーカーが作り、集計で1回だけ消費される。
#[derive(Debug, Clone, Serialize)]
pub struct PositionRecord {
    /// データセット内の位置（シャッフル前）
    pub index: usize,
    pub fen: String,
    pub claimed_mate: i32,
    pub announcements: Vec<Announcement>,
    /// 最後に受け取った info 行の探索量
    pub telemetry: SearchTelemetry,
    /// 探索開始から bestmove までの実時間
    pub elapsed_ms: u64,
}

impl PositionRecord {
    pub fn final_line(&self) -> Option<&Announcement> {
        self.announcements.iter().find(|a| a.is_final_line)
    }
}
