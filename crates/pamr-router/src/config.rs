use clap::Parser;
use pamr_common::io::DEFAULT_MAX_FRAME_SIZE;
use pamr_common::types::DEFAULT_PORT;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Default heartbeat timeout in milliseconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

/// Default bound of the per-agent pending cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// CLI arguments for the router.
#[derive(Parser, Debug, Clone)]
#[command(name = "pamr-router")]
#[command(about = "PAMR message router")]
#[command(version)]
pub struct Args {
    /// TCP port to listen on (or to contact with --reload).
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT, env = "PAMR_PORT")]
    pub port: u16,
    /// Address or host name to bind (or to contact with --reload).
    #[arg(long, short = 'i', env = "PAMR_IP")]
    pub ip: Option<String>,
    /// Prefer IPv4 when resolving --ip.
    #[arg(long, short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,
    /// Prefer IPv6 when resolving --ip.
    #[arg(long, short = '6')]
    pub ipv6: bool,
    /// Heartbeat timeout in milliseconds.
    #[arg(long, short = 't', default_value_t = DEFAULT_HEARTBEAT_TIMEOUT_MS, env = "PAMR_TIMEOUT")]
    pub timeout: u64,
    /// Delay in milliseconds before a disconnected agent is forgotten; -1 keeps it forever.
    #[arg(long = "evictTimeout", short = 'e', default_value_t = -1, allow_negative_numbers = true)]
    pub evict_timeout: i64,
    /// Number of worker threads (defaults to the number of CPUs).
    #[arg(long = "nbWorkers", short = 'w', env = "PAMR_WORKERS")]
    pub nb_workers: Option<usize>,
    /// Reserved agent configuration file.
    #[arg(long = "configFile", short = 'f', env = "PAMR_CONFIG")]
    pub config_file: Option<PathBuf>,
    /// Log at debug level.
    #[arg(long, short = 'v')]
    pub verbose: bool,
    /// Ask a running router to reload its configuration file, then exit.
    #[arg(
        long,
        short = 'r',
        requires = "cookie",
        conflicts_with_all = ["timeout", "evict_timeout", "nb_workers", "config_file", "cache_size", "metrics_addr"]
    )]
    pub reload: bool,
    /// Admin cookie used with --reload.
    #[arg(long, short = 'c', requires = "reload")]
    pub cookie: Option<String>,
    /// Maximum number of frames cached per disconnected agent.
    #[arg(long = "cacheSize", default_value_t = DEFAULT_CACHE_SIZE, env = "PAMR_CACHE_SIZE")]
    pub cache_size: usize,
    /// Socket address for the Prometheus metrics endpoint.
    #[arg(long = "metricsAddr", env = "PAMR_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Address family preference used when resolving host names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Family {
    /// First resolved address wins.
    #[default]
    Any,
    /// IPv4 addresses only.
    V4,
    /// IPv6 addresses only.
    V6,
}

impl Family {
    fn accepts(self, ip: &IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => ip.is_ipv4(),
            Self::V6 => ip.is_ipv6(),
        }
    }
}

/// Resolves `host:port` honouring the family preference.
///
/// # Errors
///
/// Returns a description if the name does not resolve to a usable address.
pub fn resolve(host: &str, port: u16, family: Family) -> Result<SocketAddr, String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !family.accepts(&ip) {
            return Err(format!("{ip} does not match the requested address family"));
        }
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve {host}: {e}"))?
        .find(|addr| family.accepts(&addr.ip()))
        .ok_or_else(|| format!("no usable address for {host}"))
}

/// Runtime configuration derived from [`Args`]. Immutable once the router starts.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Silence after which a connected agent is declared disconnected.
    pub heartbeat_timeout: Duration,
    /// Delay after which a disconnected agent is forgotten; `None` = never.
    pub evict_timeout: Option<Duration>,
    /// Number of runtime worker threads.
    pub nb_workers: usize,
    /// Reserved agent configuration file.
    pub reserved_config: Option<PathBuf>,
    /// Maximum number of frames cached per agent.
    pub cache_size: usize,
    /// Maximum accepted frame size, header included.
    pub max_frame_size: usize,
    /// Capacity of each tunnel's outbound queue.
    pub outbound_queue: usize,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: Option<SocketAddr>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            evict_timeout: None,
            nb_workers: default_workers(),
            reserved_config: None,
            cache_size: DEFAULT_CACHE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_queue: 1024,
            metrics_addr: None,
        }
    }
}

impl RouterConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        let hb = self.heartbeat_timeout.as_millis();
        if hb == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        // Sent to agents as an i32 millisecond count.
        if hb > i32::MAX as u128 {
            return Err(format!("timeout exceeds maximum ({} ms)", i32::MAX));
        }

        if let Some(evict) = self.evict_timeout {
            if evict.is_zero() {
                return Err("evictTimeout must be greater than 0 or -1".to_string());
            }
        }

        if self.nb_workers == 0 {
            return Err("nbWorkers must be greater than 0".to_string());
        }
        if self.nb_workers > 1024 {
            return Err("nbWorkers exceeds reasonable limit (1024)".to_string());
        }

        if self.cache_size == 0 {
            return Err("cacheSize must be greater than 0".to_string());
        }
        if self.cache_size > 1_000_000 {
            return Err("cacheSize exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_frame_size < pamr_common::frame::HEADER_SIZE + 36 {
            return Err("max_frame_size cannot hold a registration frame".to_string());
        }
        if self.outbound_queue == 0 {
            return Err("outbound_queue must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl TryFrom<Args> for RouterConfig {
    type Error = String;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let family = args.family();
        let listen = match args.ip.as_deref() {
            Some(host) => resolve(host, args.port, family)?,
            None if family == Family::V6 => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), args.port)
            }
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port),
        };
        let evict_timeout = match args.evict_timeout {
            -1 => None,
            ms if ms < 0 => return Err(format!("evictTimeout must be -1 or positive, got {ms}")),
            ms => Some(Duration::from_millis(ms.unsigned_abs())),
        };
        Ok(Self {
            listen,
            heartbeat_timeout: Duration::from_millis(args.timeout),
            evict_timeout,
            nb_workers: args.nb_workers.unwrap_or_else(default_workers),
            reserved_config: args.config_file,
            cache_size: args.cache_size,
            metrics_addr: args.metrics_addr,
            ..Self::default()
        })
    }
}

impl Args {
    /// Address family requested on the command line.
    #[must_use]
    pub fn family(&self) -> Family {
        if self.ipv4 {
            Family::V4
        } else if self.ipv6 {
            Family::V6
        } else {
            Family::Any
        }
    }

    /// Router contacted by `--reload`: `--ip` (default localhost) and `--port`.
    ///
    /// # Errors
    ///
    /// Returns a description if the host cannot be resolved.
    pub fn reload_target(&self) -> Result<SocketAddr, String> {
        let host = self.ip.as_deref().unwrap_or("localhost");
        resolve(host, self.port, self.family())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RouterConfig {
        RouterConfig {
            listen: "127.0.0.1:33647".parse().unwrap(),
            heartbeat_timeout: Duration::from_secs(30),
            evict_timeout: Some(Duration::from_secs(60)),
            nb_workers: 4,
            reserved_config: None,
            cache_size: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_queue: 1024,
            metrics_addr: None,
        }
    }

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("pamr-router").chain(args.iter().copied()))
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
        assert!(RouterConfig::default().validate().is_ok());
    }

    #[test]
    fn heartbeat_timeout_zero() {
        let mut c = valid_config();
        c.heartbeat_timeout = Duration::ZERO;
        assert!(c.validate().unwrap_err().contains("timeout"));
    }

    #[test]
    fn heartbeat_timeout_must_fit_wire_field() {
        let mut c = valid_config();
        c.heartbeat_timeout = Duration::from_millis(i32::MAX as u64 + 1);
        assert!(c.validate().unwrap_err().contains("timeout"));
        c.heartbeat_timeout = Duration::from_millis(i32::MAX as u64);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn evict_timeout_zero() {
        let mut c = valid_config();
        c.evict_timeout = Some(Duration::ZERO);
        assert!(c.validate().unwrap_err().contains("evictTimeout"));
    }

    #[test]
    fn nb_workers_bounds() {
        let mut c = valid_config();
        c.nb_workers = 0;
        assert!(c.validate().unwrap_err().contains("nbWorkers"));
        c.nb_workers = 1025;
        assert!(c.validate().unwrap_err().contains("nbWorkers"));
        c.nb_workers = 1;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn cache_size_zero() {
        let mut c = valid_config();
        c.cache_size = 0;
        assert!(c.validate().unwrap_err().contains("cacheSize"));
    }

    #[test]
    fn tiny_frame_limit_is_rejected() {
        let mut c = valid_config();
        c.max_frame_size = 40;
        assert!(c.validate().unwrap_err().contains("max_frame_size"));
    }

    #[test]
    fn defaults_from_empty_command_line() {
        let config = RouterConfig::try_from(parse(&[]).unwrap()).unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert!(config.listen.ip().is_unspecified());
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.evict_timeout, None);
        assert_eq!(config.cache_size, DEFAULT_CACHE_SIZE);
        assert!(config.nb_workers >= 1);
    }

    #[test]
    fn explicit_values_are_applied() {
        let args = parse(&[
            "--port",
            "4000",
            "--ip",
            "127.0.0.1",
            "--timeout",
            "1500",
            "--evictTimeout",
            "9000",
            "--nbWorkers",
            "3",
            "--cacheSize",
            "10",
        ])
        .unwrap();
        let config = RouterConfig::try_from(args).unwrap();
        assert_eq!(config.listen, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(1500));
        assert_eq!(config.evict_timeout, Some(Duration::from_millis(9000)));
        assert_eq!(config.nb_workers, 3);
        assert_eq!(config.cache_size, 10);
    }

    #[test]
    fn negative_evict_timeout_other_than_minus_one_is_rejected() {
        let args = parse(&["--evictTimeout", "-5"]).unwrap();
        assert!(RouterConfig::try_from(args).unwrap_err().contains("evictTimeout"));
    }

    #[test]
    fn ipv6_wildcard_when_requested() {
        let config = RouterConfig::try_from(parse(&["--ipv6"]).unwrap()).unwrap();
        assert!(config.listen.is_ipv6());
    }

    #[test]
    fn family_mismatch_is_rejected() {
        let args = parse(&["--ip", "127.0.0.1", "--ipv6"]).unwrap();
        assert!(RouterConfig::try_from(args).is_err());
    }

    #[test]
    fn ipv4_and_ipv6_conflict() {
        assert!(parse(&["--ipv4", "--ipv6"]).is_err());
    }

    #[test]
    fn cookie_requires_reload() {
        assert!(parse(&["--cookie", "secret"]).is_err());
    }

    #[test]
    fn reload_requires_cookie() {
        assert!(parse(&["--reload"]).is_err());
    }

    #[test]
    fn reload_rejects_start_options() {
        assert!(parse(&["--reload", "--cookie", "s", "--timeout", "10"]).is_err());
        assert!(parse(&["--reload", "--cookie", "s", "--configFile", "x.toml"]).is_err());
        assert!(parse(&["--reload", "--cookie", "s", "--nbWorkers", "2"]).is_err());
    }

    #[test]
    fn reload_target_defaults_to_localhost() {
        let args = parse(&["--reload", "--cookie", "s", "--ip", "127.0.0.1", "--port", "5000"]).unwrap();
        assert_eq!(args.reload_target().unwrap(), "127.0.0.1:5000".parse().unwrap());
        let args = parse(&["--reload", "--cookie", "s"]).unwrap();
        assert_eq!(args.reload_target().unwrap().port(), DEFAULT_PORT);
    }

    #[test]
    fn resolve_literal_addresses() {
        assert_eq!(
            resolve("::1", 1, Family::Any).unwrap(),
            "[::1]:1".parse().unwrap()
        );
        assert!(resolve("::1", 1, Family::V4).is_err());
    }
}
