//! Connection and pool configuration.

use crate::error::ConnectError;

pub const DEFAULT_READ_BUFFER_INITIAL: usize = 4096;
pub const DEFAULT_READ_BUFFER_MAX: usize = 1024 * 1024;
pub const DEFAULT_PORT: u16 = 6379;

/// Where and how to connect, plus the handshake parameters.
///
/// Only UTF-8 text encoding is implemented: RESP itself is binary-safe, so
/// the "encoding" knob only governs how a caller's `&str` arguments are
/// turned into bytes before they enter the protocol, not how the protocol
/// itself behaves. Any other value is rejected at construction time.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub unix_path: Option<String>,
    pub db: i64,
    pub password: Option<Vec<u8>>,
    pub read_buffer_initial: usize,
    pub read_buffer_max: usize,
    pub encoding: String,
    /// Raise `RedisClientError::Redis` on the first Redis-level error reply
    /// instead of returning it as `Value::Error` data.
    pub raise_on_error: bool,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        ConnectionInfo {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unix_path: None,
            db: 0,
            password: None,
            read_buffer_initial: DEFAULT_READ_BUFFER_INITIAL,
            read_buffer_max: DEFAULT_READ_BUFFER_MAX,
            encoding: "utf-8".to_string(),
            raise_on_error: false,
        }
    }
}

impl ConnectionInfo {
    pub fn validate(&self) -> Result<(), ConnectError> {
        if !self.encoding.eq_ignore_ascii_case("utf-8") && !self.encoding.eq_ignore_ascii_case("utf8") {
            return Err(ConnectError::UnsupportedEncoding(self.encoding.clone()));
        }
        Ok(())
    }

    /// Parse `redis://[:password@]host[:port][/db]` or `redis+unix:///path[?db=N]`,
    /// the scheme the wider `redis`/`valkey` client family exposes.
    pub fn from_url(url: &str) -> Result<ConnectionInfo, ConnectError> {
        let parsed = url::Url::parse(url).map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;
        let mut info = ConnectionInfo::default();

        match parsed.scheme() {
            "redis" => {
                if let Some(host) = parsed.host_str() {
                    info.host = host.to_string();
                }
                if let Some(port) = parsed.port() {
                    info.port = port;
                }
                let path = parsed.path().trim_start_matches('/');
                if !path.is_empty() {
                    info.db = path
                        .parse()
                        .map_err(|_| ConnectError::InvalidUrl(format!("invalid db segment: {path}")))?;
                }
            }
            "redis+unix" | "unix" => {
                info.unix_path = Some(parsed.path().to_string());
                for (k, v) in parsed.query_pairs() {
                    if k == "db" {
                        info.db = v
                            .parse()
                            .map_err(|_| ConnectError::InvalidUrl(format!("invalid db query param: {v}")))?;
                    }
                }
            }
            other => {
                return Err(ConnectError::InvalidUrl(format!("unsupported scheme: {other}")));
            }
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            let pw = parsed.password().unwrap_or(parsed.username());
            info.password = Some(pw.as_bytes().to_vec());
        }

        info.validate()?;
        Ok(info)
    }
}

/// Configuration for a [`crate::pool::Pool`]: a required bounded size plus
/// every `ConnectionInfo` field, passed through to each pooled connection.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub size: usize,
    pub connection: ConnectionInfo,
}

impl PoolConfig {
    pub fn new(size: usize, connection: ConnectionInfo) -> PoolConfig {
        PoolConfig { size, connection }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connection_info_matches_spec_defaults() {
        let info = ConnectionInfo::default();
        assert_eq!(info.host, "127.0.0.1");
        assert_eq!(info.port, 6379);
        assert_eq!(info.db, 0);
        assert!(info.password.is_none());
        assert_eq!(info.read_buffer_initial, 4096);
        assert_eq!(info.read_buffer_max, 1024 * 1024);
    }

    #[test]
    fn parses_redis_url_with_password_and_db() {
        let info = ConnectionInfo::from_url("redis://:secret@example.com:6380/3").unwrap();
        assert_eq!(info.host, "example.com");
        assert_eq!(info.port, 6380);
        assert_eq!(info.db, 3);
        assert_eq!(info.password.as_deref(), Some(b"secret".as_slice()));
    }

    #[test]
    fn parses_unix_socket_url() {
        let info = ConnectionInfo::from_url("redis+unix:///tmp/redis.sock?db=2").unwrap();
        assert_eq!(info.unix_path.as_deref(), Some("/tmp/redis.sock"));
        assert_eq!(info.db, 2);
    }

    #[test]
    fn rejects_unsupported_encoding() {
        let mut info = ConnectionInfo::default();
        info.encoding = "latin-1".to_string();
        assert!(matches!(
            info.validate(),
            Err(ConnectError::UnsupportedEncoding(_))
        ));
    }
}
