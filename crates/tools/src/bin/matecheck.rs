/// UCI エンジンが詰みデータセットの最短詰みをどれだけ見つけるかを調べる。
///
/// 局面ごとにエンジンの info 行をすべて拾い、詰み（と EGTB 勝ち）の PV を
/// 盤上で再生して検証する。エンジンはワーカーごとに1本ずつ起動する。
///
/// # 使用例
///
/// ```shell
/// cargo run -p tools --release --bin matecheck -- \
///   --engine ./stockfish --epd-file matetrack.epd \
///   --nodes 10**6 --threads 1 --concurrency 8
/// ```
///
/// EGTB 付きで PV も検証する:
/// ```shell
/// cargo run -p tools --release --bin matecheck -- \
///   --engine ./stockfish --epd-file matetrackpv.epd.gz \
///   --syzygy-path /mnt/syzygy/3-4-5:/mnt/syzygy/6 --mate claim --show-all-issues
/// ```
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use matetrack_core::{ChessOracle, Report};
use serde::Serialize;

use tools::analysis::{
    AnalysisPlan, DEFAULT_MIN_TB_SCORE, WorkerSettings, run_analysis, shuffle_claims,
    worker_count,
};
use tools::common::io::{open_writer, read_claims};
use tools::uci::{EngineConfig, EngineProcess, MateBound, SearchLimit, parse_engine_options};

/// `--nodes` の既定値（他の制限が1つも無いとき）
const DEFAULT_NODES: u64 = 1_000_000;

#[derive(Parser, Debug)]
#[command(about = "Check how many (best) mates a UCI engine finds in e.g. matetrack.epd")]
struct Cli {
    /// Engine binary
    #[arg(long, default_value = "./stockfish")]
    engine: PathBuf,

    /// Extra command line argument for the engine (repeatable)
    #[arg(long = "engine-arg", num_args = 1, allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Nodes limit per position (accepts 10**6 or 1e6); default 10**6 without other limits
    #[arg(long, value_parser = parse_count)]
    nodes: Option<u64>,

    /// Depth limit per position
    #[arg(long)]
    depth: Option<u32>,

    /// Time limit per position in seconds
    #[arg(long)]
    time: Option<f64>,

    /// Mate limit per position: a number of moves, or "claim" to use each position's |bm|
    #[arg(long, value_parser = parse_mate_bound)]
    mate: Option<MateBound>,

    /// Hash table size in MB
    #[arg(long)]
    hash: Option<u32>,

    /// Threads per engine (values > 1 may lead to non-deterministic results)
    #[arg(long)]
    threads: Option<usize>,

    /// Syzygy directories; also enables tablebase checks of PVs and TB scores
    #[arg(long, alias = "syzygyPath")]
    syzygy_path: Option<String>,

    /// Lowest cp score treated as a TB win
    #[arg(long, alias = "minTBscore", default_value_t = DEFAULT_MIN_TB_SCORE)]
    min_tb_score: i32,

    /// Total number of threads the harness may use; default: available parallelism
    #[arg(long)]
    concurrency: Option<usize>,

    /// Positions and their mate scores (.gz supported, "-" for stdin)
    #[arg(long, alias = "epdFile", default_value = "matetrack.epd")]
    epd_file: PathBuf,

    /// Extra UCI options as a JSON object, e.g. '{"Move Overhead": 10}'
    #[arg(long)]
    engine_opts: Option<String>,

    /// Shuffle positions before chunking to spread expensive ones
    #[arg(long)]
    shuffle: bool,

    /// Seed for --shuffle
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print every occurrence of each issue instead of the first affected position
    #[arg(long)]
    show_all_issues: bool,

    /// Print search effort statistics and nodes/second
    #[arg(long)]
    bench: bool,

    /// Also write the full report as JSON
    #[arg(long)]
    json_report: Option<PathBuf>,
}

/// `1000000` / `10**6` / `1e6` / `1_000_000` を受け付ける。
fn parse_count(s: &str) -> Result<u64, String> {
    let t = s.trim().replace('_', "");
    if let Some((base, exp)) = t.split_once("**") {
        let base: u64 = base.trim().parse().map_err(|_| format!("invalid base in '{s}'"))?;
        let exp: u32 = exp.trim().parse().map_err(|_| format!("invalid exponent in '{s}'"))?;
        return base.checked_pow(exp).ok_or_else(|| format!("'{s}' overflows"));
    }
    if let Ok(n) = t.parse::<u64>() {
        return Ok(n);
    }
    let f: f64 = t.parse().map_err(|_| format!("not a count: '{s}'"))?;
    if !f.is_finite() || f < 0.0 || f.fract() != 0.0 || f > u64::MAX as f64 {
        return Err(format!("not a whole non-negative count: '{s}'"));
    }
    Ok(f as u64)
}

fn parse_mate_bound(s: &str) -> Result<MateBound, String> {
    match s.trim() {
        "claim" | "bm" => Ok(MateBound::FromClaim),
        n => match n.parse::<u32>() {
            Ok(0) | Err(_) => Err(format!("expected a positive number or 'claim', got '{s}'")),
            Ok(n) => Ok(MateBound::Fixed(n)),
        },
    }
}

fn search_limit(cli: &Cli) -> Result<SearchLimit> {
    let movetime_ms = match cli.time {
        Some(t) if !(t.is_finite() && t > 0.0) => {
            bail!("--time must be a positive number of seconds")
        }
        Some(t) => Some((t * 1000.0).round().max(1.0) as u64),
        None => None,
    };
    let mut limit = SearchLimit {
        nodes: cli.nodes,
        depth: cli.depth,
        movetime_ms,
        mate: cli.mate,
    };
    if limit.is_unbounded() {
        limit.nodes = Some(DEFAULT_NODES);
    }
    Ok(limit)
}

/// 実行条件の1行要約
fn describe_run(cli: &Cli, limit: &SearchLimit) -> String {
    let mate = limit.mate.map(|m| match m {
        MateBound::Fixed(n) => n.to_string(),
        MateBound::FromClaim => "claim".to_string(),
    });
    let time = cli.time.map(|t| t.to_string());
    let settings = [
        ("nodes", limit.nodes.map(|n| n.to_string())),
        ("depth", limit.depth.map(|d| d.to_string())),
        ("time", time),
        ("mate", mate),
        ("hash", cli.hash.map(|h| h.to_string())),
        ("threads", cli.threads.map(|t| t.to_string())),
        ("syzygy-path", cli.syzygy_path.clone()),
    ];
    let flags: Vec<String> = settings
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("--{k} {v}")))
        .collect();
    format!("{} on {} with {}", cli.engine.display(), cli.epd_file.display(), flags.join(" "))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run: &'a str,
    engine_id: Option<&'a str>,
    started_at: String,
    elapsed_sec: f64,
    workers: usize,
    report: &'a Report,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let limit = search_limit(&cli)?;
    let concurrency = cli
        .concurrency
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
    let workers = worker_count(concurrency, cli.threads.unwrap_or(1))?;
    let options = match &cli.engine_opts {
        Some(json) => parse_engine_options(json)?,
        None => Vec::new(),
    };
    let engine_cfg = EngineConfig {
        path: cli.engine.clone(),
        args: cli.engine_args.clone(),
        threads: cli.threads,
        hash_mb: cli.hash,
        syzygy_path: cli.syzygy_path.clone(),
        options,
    };

    info!("Loading FENs...");
    let mut claims = read_claims(&cli.epd_file, &ChessOracle::new())?;
    println!("{} FENs loaded...", claims.len());

    let run = describe_run(&cli, &limit);
    println!("\nMatetrack started for {run} ...");
    let started_at = Local::now();
    let start = Instant::now();

    // 起動できないエンジンはワーカーを立てる前に弾く
    let engine_id = {
        let probe = EngineProcess::spawn(&engine_cfg, "probe".to_string())
            .with_context(|| format!("engine {} is not usable", cli.engine.display()))?;
        probe.name().map(str::to_string)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown_clone = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nShutting down gracefully...");
            shutdown_clone.store(true, Ordering::Relaxed);
        })
        .ok();
    }

    if cli.shuffle {
        shuffle_claims(&mut claims, cli.seed);
    }
    let plan = AnalysisPlan {
        workers,
        settings: WorkerSettings {
            limit,
            min_tb_score: cli.min_tb_score,
            tablebase: cli.syzygy_path.is_some(),
        },
        keep_all_examples: cli.show_all_issues,
    };

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks ({eta}) {msg}")
            .context("invalid progress template")?,
    );
    let syzygy_path = cli.syzygy_path.as_deref();
    let result = run_analysis(
        claims,
        &plan,
        |id| EngineProcess::spawn(&engine_cfg, format!("worker{id}")),
        || match syzygy_path {
            Some(paths) => ChessOracle::with_tablebase(paths)
                .with_context(|| format!("failed to load syzygy tables from {paths}")),
            None => Ok(ChessOracle::new()),
        },
        shutdown,
        |done, total| {
            progress.set_length(total as u64);
            progress.set_position(done as u64);
        },
    );
    progress.finish_and_clear();
    let report = result?;
    let elapsed = start.elapsed();

    println!("\nUsing {run}");
    if let Some(name) = &engine_id {
        println!("{:<15}{}", "Engine ID:", name);
    }
    report.render(&mut std::io::stdout().lock(), cli.bench)?;
    info!("finished in {:.1}s", elapsed.as_secs_f64());

    if let Some(path) = &cli.json_report {
        let json = JsonReport {
            run: &run,
            engine_id: engine_id.as_deref(),
            started_at: started_at.to_rfc3339(),
            elapsed_sec: elapsed.as_secs_f64(),
            workers,
            report: &report,
        };
        let mut out =
            open_writer(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(&mut out, &json)?;
        std::io::Write::write_all(&mut out, b"\n")?;
        out.close()?;
        info!("report written to {}", path.display());
    }
    Ok(())
}
