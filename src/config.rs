use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Result};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Simulated,
    Fixture,
}

impl FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "fixture" | "mock" => Ok(Self::Fixture),
            other => bail!("Unknown analysis engine '{other}' (expected 'simulated' or 'fixture')"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    pub fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            Self::Any
        } else {
            Self::List(origins)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub public_base_url: String,
    pub upload_root: PathBuf,
    pub database_path: Option<PathBuf>,
    pub allowed_origins: AllowedOrigins,
    pub max_upload_bytes: usize,
    pub queue_capacity: usize,
    pub engine: EngineKind,
    pub analysis_delay: Duration,
    pub analysis_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = resolve_bind_addr();

        let public_base_url = env::var("SWING_PUBLIC_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}", bind_addr.port()));

        let upload_root = PathBuf::from(
            env::var("SWING_UPLOAD_ROOT").unwrap_or_else(|_| "./uploads".to_string()),
        );

        let database_path = env::var("SWING_DATABASE_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let allowed_origins = AllowedOrigins::parse(
            &env::var("SWING_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
        );

        let max_upload_bytes = env::var("SWING_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let queue_capacity = env::var("SWING_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(128);

        let engine = match env::var("SWING_ANALYSIS_ENGINE") {
            Ok(raw) => raw.parse::<EngineKind>()?,
            Err(_) => EngineKind::Simulated,
        };

        let analysis_delay = env::var("SWING_ANALYSIS_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        let analysis_timeout = env::var("SWING_ANALYSIS_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        Ok(Self {
            bind_addr,
            public_base_url,
            upload_root,
            database_path,
            allowed_origins,
            max_upload_bytes,
            queue_capacity,
            engine,
            analysis_delay,
            analysis_timeout,
        })
    }

    /// Local defaults rooted at `upload_root`, with no database and a short
    /// simulated engine. Used by embedders and tests.
    pub fn local(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            public_base_url: "http://localhost:3000".to_string(),
            upload_root: upload_root.into(),
            database_path: None,
            allowed_origins: AllowedOrigins::Any,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            queue_capacity: 128,
            engine: EngineKind::Simulated,
            analysis_delay: Duration::from_millis(50),
            analysis_timeout: Duration::from_secs(30),
        }
    }
}

fn resolve_bind_addr() -> SocketAddr {
    if let Ok(raw) = env::var("SWING_BIND_ADDR") {
        let normalized = raw.trim().trim_matches('"').trim_matches('\'').to_string();
        if let Ok(addr) = normalized.parse::<SocketAddr>() {
            return addr;
        }
    }

    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(3000);
    SocketAddr::from(([0, 0, 0, 0], port))
}
