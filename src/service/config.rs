use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub static GLOBAL_CONFIG: OnceCell<HighwayConfig> = OnceCell::new();
pub fn global_config() -> &'static HighwayConfig {
    GLOBAL_CONFIG.get().unwrap()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    /// header plus body bytes accepted before the stream is treated as corrupted
    pub max_frame_size: usize,
    pub conn_read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 7070,
            max_connection: 1024,
            max_frame_size: 8 * 1024 * 1024,
            conn_read_buffer_size: 4 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub login_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// connections kept per remote endpoint
    pub pool_size: usize,
    pub sweep_interval_ms: u64,
    pub max_frame_size: usize,
    pub conn_read_buffer_size: usize,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    /// protocol/compression preference carried in the login handshake
    pub protocol_name: String,
    pub zip_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout_ms: 5_000,
            login_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            pool_size: 4,
            sweep_interval_ms: 30,
            max_frame_size: 8 * 1024 * 1024,
            conn_read_buffer_size: 4 * 1024,
            reconnect_backoff_ms: 100,
            reconnect_backoff_max_ms: 5_000,
            protocol_name: "highway".to_string(),
            zip_name: "none".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InvokeWorkerPool {
    pub channel_capacity: usize,
    /// zero selects one worker per cpu
    pub num_channels: usize,
}

impl Default for InvokeWorkerPool {
    fn default() -> Self {
        InvokeWorkerPool {
            channel_capacity: 1024,
            num_channels: 0,
        }
    }
}

impl InvokeWorkerPool {
    pub fn worker_count(&self) -> usize {
        if self.num_channels == 0 {
            num_cpus::get()
        } else {
            self.num_channels
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct HighwayConfig {
    pub network: NetworkConfig,
    pub client: ClientConfig,
    pub invoke_worker_pool: InvokeWorkerPool,
}

impl HighwayConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<HighwayConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let server_config: HighwayConfig = config.try_deserialize()?;

        Ok(server_config)
    }
}
