//! 詰み探索ハーネスのエンジン駆動部分とコマンドラインツール群

pub mod analysis;
pub mod common;
pub mod uci;
