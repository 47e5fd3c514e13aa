pub mod engine;
pub mod types;

pub use engine::{EngineConfig, EngineProcess, parse_engine_options};
pub use types::{
    EngineSession, GoLimit, InfoCallback, InfoLine, MateBound, Score, ScoreBound, SearchLimit,
    SearchRequest, SearchSummary, duration_to_millis,
};
