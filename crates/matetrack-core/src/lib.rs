//! チェス詰み探索の検証ライブラリ
//!
//! エンジンの報告した詰み手順を `RulesOracle` 上で再生して判定し、
//! 局面ごとの結果を順序に依存しない形で集計する。

pub mod announce;
pub mod dataset;
pub mod record;
pub mod report;
pub mod rules;
pub mod verify;

pub use announce::{Announcement, AnnouncementKey, AnnouncementLog};
pub use dataset::{PositionClaim, advance_claim, load_claims, to_epd_line};
pub use record::{PositionRecord, SearchTelemetry};
pub use report::{IssueKind, PositionOutcome, Report};
pub use rules::{ChessOracle, RulesError, RulesOracle, TbWdl};
pub use verify::{Verdict, verify_announcement, verify_mate_pv, verify_tb_pv};
