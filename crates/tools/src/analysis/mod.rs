pub mod scheduler;
pub mod worker;

pub use scheduler::{
    AnalysisPlan, chunk_size, partition, run_analysis, shuffle_claims, worker_count,
};
pub use worker::{
    DEFAULT_MIN_TB_SCORE, WorkerSettings, analyse_chunk, analyse_position, announcement_key,
};
