use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};

use super::types::{
    EngineSession, InfoCallback, InfoLine, SearchRequest, SearchSummary, duration_to_millis,
};

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// エンジンプロセス起動時の設定。
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub threads: Option<usize>,
    pub hash_mb: Option<u32>,
    pub syzygy_path: Option<String>,
    /// 追加の UCI オプション (名前, 値)
    pub options: Vec<(String, String)>,
}

/// 1本のエンジンに対する入出力をカプセル化する。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    opt_names: HashSet<String>,
    id_name: Option<String>,
    pub label: String,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig, label: String) -> Result<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn engine at {}", cfg.path.display()))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("no stdout"))?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut proc = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            opt_names: HashSet::new(),
            id_name: None,
            label,
        };
        proc.initialize(cfg)?;
        Ok(proc)
    }

    fn initialize(&mut self, cfg: &EngineConfig) -> Result<()> {
        self.write_line("uci")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.opt_names.insert(name);
                }
            } else if let Some(name) = line.strip_prefix("id name ") {
                self.id_name = Some(name.trim().to_string());
            } else if line == "uciok" {
                break;
            }
        }
        if let Some(threads) = cfg.threads {
            self.set_option_if_available("Threads", &threads.to_string())?;
        }
        if let Some(hash) = cfg.hash_mb {
            self.set_option_if_available("Hash", &hash.to_string())?;
        }
        if let Some(path) = &cfg.syzygy_path {
            self.set_option_if_available("SyzygyPath", path)?;
        }
        for (name, value) in &cfg.options {
            self.set_option_if_available(name, value)?;
        }
        self.sync_ready()?;
        self.write_line("ucinewgame")?;
        Ok(())
    }

    /// `id name` で名乗った名前
    pub fn name(&self) -> Option<&str> {
        self.id_name.as_deref()
    }

    pub fn new_game(&mut self) -> Result<()> {
        self.write_line("ucinewgame")?;
        self.sync_ready()
    }

    pub fn sync_ready(&mut self) -> Result<()> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line(ENGINE_READY_TIMEOUT)?;
            if line == "readyok" {
                break;
            }
        }
        Ok(())
    }

    pub fn recv_line(&self, timeout: Duration) -> Result<String> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| anyhow!("{}: engine read timeout", self.label))
    }

    pub fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<()> {
        if self.opt_names.is_empty() || self.opt_names.contains(name) {
            self.write_line(&format!("setoption name {} value {}", name, value))?;
        } else {
            warn!("{}: engine has no option '{}', ignored", self.label, name);
        }
        Ok(())
    }

    pub fn write_line(&mut self, msg: &str) -> Result<()> {
        debug!("{} < {}", self.label, msg);
        self.stdin.write_all(msg.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;
        Ok(())
    }
}

impl EngineSession for EngineProcess {
    /// 探索制限は `go` に渡し、こちらでは時間を監視しない。
    fn analyse(
        &mut self,
        req: &SearchRequest<'_>,
        on_info: &mut InfoCallback<'_>,
    ) -> Result<SearchSummary> {
        self.new_game()?;
        self.write_line(&format!("position fen {}", req.fen))?;
        self.write_line(&req.limit.to_string())?;

        let start = Instant::now();
        loop {
            let line = self
                .rx
                .recv()
                .map_err(|_| anyhow!("{}: engine exited unexpectedly", self.label))?;
            if let Some(info) = InfoLine::parse(&line) {
                on_info(&info);
                continue;
            }
            if let Some(rest) = line.strip_prefix("bestmove") {
                let bestmove = rest
                    .split_whitespace()
                    .next()
                    .filter(|mv| *mv != "(none)")
                    .map(str::to_string);
                return Ok(SearchSummary {
                    bestmove,
                    elapsed_ms: duration_to_millis(start.elapsed()),
                });
            }
            if !line.trim().is_empty() {
                debug!("{} > {}", self.label, line);
            }
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    tokens.by_ref().find(|tok| *tok == "name")?;
    let parts: Vec<&str> = tokens.take_while(|tok| *tok != "type").collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// `--engine-opts` の JSON オブジェクトを (名前, 値) の列にする。
pub fn parse_engine_options(json: &str) -> Result<Vec<(String, String)>> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("--engine-opts is not valid JSON")?;
    let Some(map) = value.as_object() else {
        bail!("--engine-opts must be a JSON object, got {value}");
    };
    let mut options = Vec::with_capacity(map.len());
    for (name, value) in map {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            other => bail!("unsupported value for engine option '{name}': {other}"),
        };
        options.push((name.clone(), value));
    }
    Ok(options)
}
