//! データセットをチャンクに分けてワーカー群に配り、結果を集計する

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel as chan;
use log::{debug, error, info};
use matetrack_core::{PositionClaim, PositionRecord, Report, RulesOracle};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::worker::{WorkerSettings, analyse_chunk};
use crate::uci::EngineSession;

/// チャンク数をワーカー数の何倍にするか
const CHUNKS_PER_WORKER: usize = 4;

/// 使えるスレッド総数とエンジン1本あたりのスレッド数からワーカー数を決める。
pub fn worker_count(concurrency: usize, threads_per_engine: usize) -> Result<usize> {
    let workers = concurrency / threads_per_engine.max(1);
    if workers < 1 {
        bail!(
            "need concurrency >= threads, but concurrency = {} and threads = {}",
            concurrency,
            threads_per_engine
        );
    }
    Ok(workers)
}

pub fn chunk_size(positions: usize, workers: usize) -> usize {
    (positions / (CHUNKS_PER_WORKER * workers.max(1))).max(1)
}

/// 先頭から `size` 件ずつに分ける（最後のチャンクは端数）。
pub fn partition(claims: Vec<PositionClaim>, size: usize) -> Vec<Vec<PositionClaim>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(claims.len().div_ceil(size));
    let mut iter = claims.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// 探索コストの偏りを散らすために並びを混ぜる。同じ seed なら同じ並び。
pub fn shuffle_claims(claims: &mut [PositionClaim], seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    claims.shuffle(&mut rng);
}

/// 解析全体の設定
#[derive(Debug, Clone, Copy)]
pub struct AnalysisPlan {
    pub workers: usize,
    pub settings: WorkerSettings,
    pub keep_all_examples: bool,
}

type ChunkResult = Result<Vec<PositionRecord>>;

fn worker_main<S, O, FS, FO>(
    worker_id: usize,
    make_session: &FS,
    make_oracle: &FO,
    settings: &WorkerSettings,
    rx: chan::Receiver<Vec<PositionClaim>>,
    tx: chan::Sender<ChunkResult>,
    shutdown: &AtomicBool,
) where
    S: EngineSession,
    O: RulesOracle,
    FS: Fn(usize) -> Result<S>,
    FO: Fn() -> Result<O>,
{
    // セッションはこの関数を抜けるときに必ず破棄される
    let setup = make_session(worker_id).and_then(|session| Ok((session, make_oracle()?)));
    let (mut session, oracle) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            shutdown.store(true, Ordering::Relaxed);
            let _ = tx.send(Err(e.context(format!("worker {worker_id}: failed to start"))));
            return;
        }
    };
    debug!("worker {worker_id} ready");

    while let Ok(chunk) = rx.recv() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let result = analyse_chunk(&mut session, &oracle, &chunk, settings, shutdown);
        let failed = result.is_err();
        if failed {
            shutdown.store(true, Ordering::Relaxed);
        }
        if tx.send(result).is_err() || failed {
            break;
        }
    }
    debug!("worker {worker_id} finished");
}

/// 全局面を解析して集計結果を返す。
///
/// ワーカーごとに `make_session` / `make_oracle` で専用のエンジンと Oracle を作る。
/// いずれかのワーカーが失敗したら残りを打ち切ってそのエラーを返す。
/// `on_progress(完了チャンク数, 総チャンク数)` は集計側のスレッドで呼ばれる。
pub fn run_analysis<S, O, FS, FO, P>(
    claims: Vec<PositionClaim>,
    plan: &AnalysisPlan,
    make_session: FS,
    make_oracle: FO,
    shutdown: Arc<AtomicBool>,
    mut on_progress: P,
) -> Result<Report>
where
    S: EngineSession,
    O: RulesOracle,
    FS: Fn(usize) -> Result<S> + Sync,
    FO: Fn() -> Result<O> + Sync,
    P: FnMut(usize, usize),
{
    let workers = plan.workers.max(1);
    let positions = claims.len();
    let chunks = partition(claims, chunk_size(positions, workers));
    let total_chunks = chunks.len();
    info!("{positions} positions in {total_chunks} chunks on {workers} workers");

    let (chunk_tx, chunk_rx) = chan::unbounded::<Vec<PositionClaim>>();
    for chunk in chunks {
        chunk_tx.send(chunk).map_err(|_| anyhow!("chunk queue closed"))?;
    }
    drop(chunk_tx);
    let (result_tx, result_rx) = chan::unbounded::<ChunkResult>();

    let mut report = Report::new(plan.keep_all_examples);
    let mut first_error = None;
    let mut completed = 0usize;

    thread::scope(|scope| {
        for worker_id in 0..workers.min(total_chunks) {
            let rx = chunk_rx.clone();
            let tx = result_tx.clone();
            let make_session = &make_session;
            let make_oracle = &make_oracle;
            let settings = &plan.settings;
            let shutdown = shutdown.as_ref();
            scope.spawn(move || {
                worker_main(worker_id, make_session, make_oracle, settings, rx, tx, shutdown);
            });
        }
        // 集計側は result_tx を持たないので drop
        drop(result_tx);

        for result in result_rx.iter() {
            match result {
                Ok(records) => {
                    for record in &records {
                        report.fold(record);
                    }
                    completed += 1;
                    on_progress(completed, total_chunks);
                }
                Err(e) => {
                    error!("{e:#}");
                    shutdown.store(true, Ordering::Relaxed);
                    first_error.get_or_insert(e);
                }
            }
        }
    });

    if let Some(e) = first_error {
        return Err(e);
    }
    if completed < total_chunks || report.total_positions < positions as u64 {
        if shutdown.load(Ordering::Relaxed) {
            bail!("interrupted after {completed} of {total_chunks} chunks");
        }
        bail!("workers stopped after {completed} of {total_chunks} chunks");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use matetrack_core::ChessOracle;

    use super::*;
    use crate::analysis::worker::DEFAULT_MIN_TB_SCORE;
    use crate::analysis::worker::tests::{BACK_RANK, claim};
    use crate::uci::{InfoCallback, InfoLine, SearchLimit, SearchRequest, SearchSummary};

    /// どの局面にも同じ info 行を返すセッション
    struct EchoSession {
        lines: &'static [&'static str],
    }

    impl EngineSession for EchoSession {
        fn analyse(
            &mut self,
            _req: &SearchRequest<'_>,
            on_info: &mut InfoCallback<'_>,
        ) -> Result<SearchSummary> {
            for line in self.lines {
                if let Some(info) = InfoLine::parse(line) {
                    on_info(&info);
                }
            }
            Ok(SearchSummary {
                bestmove: Some("a1a8".to_string()),
                elapsed_ms: 1,
            })
        }
    }

    /// 特定の局面でだけ落ちるセッション
    struct FailOnSession {
        fen_prefix: &'static str,
    }

    impl EngineSession for FailOnSession {
        fn analyse(
            &mut self,
            req: &SearchRequest<'_>,
            on_info: &mut InfoCallback<'_>,
        ) -> Result<SearchSummary> {
            if req.fen.starts_with(self.fen_prefix) {
                bail!("engine exited unexpectedly");
            }
            EchoSession { lines: LINES }.analyse(req, on_info)
        }
    }

    const LINES: &[&str] = &[
        "info depth 5 score mate 2 nodes 300 pv a1a8",
        "info depth 9 score mate 1 nodes 900 time 4 pv a1a8",
    ];

    fn plan(workers: usize) -> AnalysisPlan {
        AnalysisPlan {
            workers,
            settings: WorkerSettings {
                limit: SearchLimit {
                    nodes: Some(1000),
                    ..SearchLimit::default()
                },
                min_tb_score: DEFAULT_MIN_TB_SCORE,
                tablebase: false,
            },
            keep_all_examples: true,
        }
    }

    fn claims(n: usize) -> Vec<PositionClaim> {
        (0..n).map(|i| claim(i, BACK_RANK, if i % 3 == 0 { 2 } else { 1 })).collect()
    }

    #[test]
    fn worker_count_needs_a_whole_engine() {
        assert_eq!(worker_count(8, 1).unwrap(), 8);
        assert_eq!(worker_count(8, 3).unwrap(), 2);
        assert!(worker_count(2, 4).is_err());
    }

    #[test]
    fn chunks_target_four_per_worker() {
        assert_eq!(chunk_size(100, 2), 12);
        assert_eq!(chunk_size(3, 4), 1);
        assert_eq!(chunk_size(0, 4), 1);

        let chunks = partition(claims(10), 4);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(chunks[2][1].index, 9);
        assert!(partition(Vec::new(), 3).is_empty());
    }

    #[test]
    fn shuffle_is_reproducible_permutation() {
        let mut a = claims(50);
        let mut b = claims(50);
        shuffle_claims(&mut a, 42);
        shuffle_claims(&mut b, 42);
        assert_eq!(a, b);
        assert_ne!(a, claims(50));
        let mut indices: Vec<_> = a.iter().map(|c| c.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn result_does_not_depend_on_worker_count_or_order() {
        let run = |workers: usize, shuffled: bool| {
            let mut input = claims(30);
            if shuffled {
                shuffle_claims(&mut input, 7);
            }
            let progress = AtomicUsize::new(0);
            let report = run_analysis(
                input,
                &plan(workers),
                |_| Ok(EchoSession { lines: LINES }),
                || Ok(ChessOracle::new()),
                Arc::new(AtomicBool::new(false)),
                |done, total| {
                    assert!(done <= total);
                    progress.store(done, Ordering::Relaxed);
                },
            )
            .unwrap();
            assert!(progress.load(Ordering::Relaxed) > 0);
            report
        };
        let single = run(1, false);
        assert_eq!(single.total_positions, 30);
        assert_eq!(single.found_mates, 30);
        // bm #1 の20局面だけが最短
        assert_eq!(single.best_mates, 20);
        assert_eq!(single, run(4, true));
        assert_eq!(single, run(3, false));
    }

    #[test]
    fn failing_worker_aborts_the_batch() {
        let mut input = claims(12);
        input[5].fen = "7k/8/8/8/8/8/8/7K w - -".to_string();
        let err = run_analysis(
            input,
            &plan(3),
            |_| {
                Ok(FailOnSession {
                    fen_prefix: "7k/",
                })
            },
            || Ok(ChessOracle::new()),
            Arc::new(AtomicBool::new(false)),
            |_, _| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("engine exited unexpectedly"));

        let err = run_analysis(
            claims(4),
            &plan(2),
            |_| -> Result<EchoSession> { Err(anyhow!("no such engine")) },
            || Ok(ChessOracle::new()),
            Arc::new(AtomicBool::new(false)),
            |_, _| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("no such engine"));
    }

    #[test]
    fn shutdown_before_start_is_reported() {
        let err = run_analysis(
            claims(4),
            &plan(2),
            |_| Ok(EchoSession { lines: LINES }),
            || Ok(ChessOracle::new()),
            Arc::new(AtomicBool::new(true)),
            |_, _| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }
}
