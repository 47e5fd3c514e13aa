//! 探索中に流れてくる詰み/EGTB 報告の重複除去
//!
//! 同じ `(mate, tb_score, pv)` の報告は深さが進むたびに何度も届くため、
//! 初回だけ検証し、以降は「現在の最新行」の位置だけを更新する。
//! 1ワーカー内でのみ使う。

use std::collections::HashMap;

use serde::Serialize;

use crate::record::SearchTelemetry;
use crate::verify::Verdict;

/// 報告の同一性を決めるキー。PV は空白区切りの UCI 文字列。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AnnouncementKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tb_score: Option<i32>,
    pub pv: String,
}

impl AnnouncementKey {
    pub fn new<S: AsRef<str>>(mate: Option<i32>, tb_score: Option<i32>, pv: &[S]) -> Self {
        let pv = pv.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");
        Self { mate, tb_score, pv }
    }

    pub fn moves(&self) -> Vec<&str> {
        self.pv.split_whitespace().collect()
    }
}

/// 検証済みの報告
#[derive(Debug, Clone, Serialize)]
pub struct Announcement {
    #[serde(flatten)]
    pub key: AnnouncementKey,
    pub verdict: Verdict,
    /// この行が初めて報告された時点の探索量
    pub first_seen: SearchTelemetry,
    /// 探索終了時点で最新だった行か
    pub is_final_line: bool,
}

/// 1局面ぶんの報告ログ
#[derive(Default)]
pub struct AnnouncementLog {
    entries: Vec<Announcement>,
    index: HashMap<AnnouncementKey, usize>,
    active: Option<usize>,
}

impl AnnouncementLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 報告を1件取り込む。新しいキーなら `verify` を1回だけ呼び、`true` を返す。
    pub fn observe<F>(
        &mut self,
        key: AnnouncementKey,
        telemetry: SearchTelemetry,
        verify: F,
    ) -> bool
    where
        F: FnOnce(&AnnouncementKey) -> Verdict,
    {
        if let Some(&idx) = self.index.get(&key) {
            self.active = Some(idx);
            return false;
        }
        let verdict = verify(&key);
        let idx = self.entries.len();
        self.index.insert(key.clone(), idx);
        self.entries.push(Announcement {
            key,
            verdict,
            first_seen: telemetry,
            is_final_line: false,
        });
        self.active = Some(idx);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 探索終了。最新行に `is_final_line` を立てて初出順に返す。
    pub fn finish(mut self) -> Vec<Announcement> {
        if let Some(entry) = self.active.and_then(|idx| self.entries.get_mut(idx)) {
            entry.is_final_line = true;
        }
        self.entries
    }
}
