use std::{env, net::IpAddr, path::PathBuf};

use anyhow::Context;
use tracing::Level;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_host: IpAddr,
    pub settings_path: PathBuf,
    pub log_dir: PathBuf,
    pub camera_input_format: String,
    pub ffmpeg_bin: String,
    pub log_level: Level,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "RemoteCam".to_owned());
        let bind_host = env::var("BIND_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_owned())
            .parse()
            .context("BIND_HOST must be an IP address")?;
        let settings_path = env::var("SETTINGS_PATH")
            .unwrap_or_else(|_| "remotecam-settings.json".to_owned())
            .into();
        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_owned()).into();
        let camera_input_format =
            env::var("CAMERA_INPUT_FORMAT").unwrap_or_else(|_| "mjpeg".to_owned());
        let ffmpeg_bin = env::var("FFMPEG_BIN")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "ffmpeg".to_owned());
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|value| value.trim().parse::<Level>().ok())
            .unwrap_or(Level::INFO);

        Ok(Self {
            app_name,
            bind_host,
            settings_path,
            log_dir,
            camera_input_format,
            ffmpeg_bin,
            log_level,
        })
    }
}
