use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigErr {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Server settings, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ip: IpAddr,
    pub port: u16,
    pub listen_backlog: u32,
    pub log_level: tracing::Level,
    /// number of agencies that must finish before the winners are known
    pub agencies: usize,
    pub max_workers: usize,
    pub bets_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 12345,
            listen_backlog: 5,
            log_level: tracing::Level::INFO,
            agencies: 5,
            max_workers: 10,
            bets_file: "./bets.csv".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config out of a key lookup, missing keys keep their default value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ip) = parse(&lookup, "SERVER_IP")? {
            config.ip = ip;
        }
        if let Some(port) = parse(&lookup, "SERVER_PORT")? {
            config.port = port;
        }
        if let Some(backlog) = parse(&lookup, "SERVER_LISTEN_BACKLOG")? {
            config.listen_backlog = backlog;
        }
        if let Some(level) = parse(&lookup, "LOGGING_LEVEL")? {
            config.log_level = level;
        }
        if let Some(agencies) = parse(&lookup, "AGENCIES")? {
            config.agencies = agencies;
        }
        if let Some(max_workers) = parse(&lookup, "MAX_WORKERS")? {
            config.max_workers = max_workers;
        }
        if let Some(bets_file) = lookup("BETS_FILE").filter(|path| !path.trim().is_empty()) {
            config.bets_file = bets_file.into();
        }

        // neither a lottery without agencies nor a pool without workers can make progress
        for (key, value) in [("AGENCIES", config.agencies), ("MAX_WORKERS", config.max_workers)] {
            if value == 0 {
                return Err(ConfigErr::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

// parses an optional key, an empty value counts as missing
fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigErr>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigErr::Invalid { key, value })
}
