//! Streaming-server front-end.
//!
//! Configuration comes exclusively from `STREAMSERVER_*` environment
//! variables; bad values abort startup with a non-zero exit. SIGINT and
//! SIGTERM both trigger exactly one graceful stop.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::info;

use gencam::BackendKind;
use gencam_stream::{StreamConfig, StreamServer};

const DEFAULT_PORT: u16 = 8888;

pub fn run() -> Result<()> {
    let (port, config) = config_from_env()?;

    let mut server = StreamServer::spawn(config, port)
        .with_context(|| format!("starting the stream server on port {port} failed"))?;
    info!(addr = %server.local_addr(), "stream server running");

    // The handler only flags the request; the stop itself runs on this
    // thread. Further signals send into a channel nobody reads again.
    let (signal_tx, signal_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })
    .context("installing signal handlers failed")?;

    let _ = signal_rx.recv();
    info!("signal received, stopping");
    server.stop();
    Ok(())
}

/// Read one environment variable and parse it, with a useful error.
fn env_parsed<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse()
                .with_context(|| format!("{name}={raw:?} is not valid"))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{name} is not valid unicode")),
    }
}

fn config_from_env() -> Result<(u16, StreamConfig)> {
    let mut config = StreamConfig::default();

    let port = env_parsed::<u16>("STREAMSERVER_PORT")?.unwrap_or(DEFAULT_PORT);
    if let Some(index) = env_parsed::<u32>("STREAMSERVER_CAMIDX")? {
        config.camera_index = index;
    }
    if let Ok(ext) = env::var("STREAMSERVER_COMPRESSIONEXT") {
        config.compression_ext = ext;
    }
    if let Some(fps) = env_parsed::<f64>("STREAMSERVER_FPS")? {
        config.target_fps = fps;
    }
    if let Some(max_queue) = env_parsed::<usize>("STREAMSERVER_MAXQUEUE")? {
        config.max_queue = max_queue;
    }
    if let Ok(backend) = env::var("STREAMSERVER_BACKEND") {
        let kind = BackendKind::from_str(&backend)
            .with_context(|| format!("STREAMSERVER_BACKEND={backend:?} is not valid"))?;
        if kind == BackendKind::Any {
            bail!("STREAMSERVER_BACKEND can't be 'any'");
        }
        config.backend = kind;
    }
    if let Ok(line_enable) = env::var("STREAMSERVER_LINEENABLE") {
        config.line_enable = line_enable != "0";
    }
    config.trigger_pin = env_parsed::<u32>("STREAMSERVER_TRIGGERPIN")?;

    Ok((port, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment mutation is process-wide, so everything lives in one test.
    #[test]
    fn env_overrides_and_rejects() {
        let (port, config) = config_from_env().unwrap();
        assert_eq!(port, DEFAULT_PORT);
        assert_eq!(config.backend, BackendKind::IdsPeak);

        env::set_var("STREAMSERVER_PORT", "9001");
        env::set_var("STREAMSERVER_CAMIDX", "2");
        env::set_var("STREAMSERVER_COMPRESSIONEXT", ".png");
        env::set_var("STREAMSERVER_FPS", "12.5");
        env::set_var("STREAMSERVER_MAXQUEUE", "4");
        env::set_var("STREAMSERVER_BACKEND", "SPINNAKER");
        env::set_var("STREAMSERVER_LINEENABLE", "1");
        env::set_var("STREAMSERVER_TRIGGERPIN", "3");

        let (port, config) = config_from_env().unwrap();
        assert_eq!(port, 9001);
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.compression_ext, ".png");
        assert_eq!(config.target_fps, 12.5);
        assert_eq!(config.max_queue, 4);
        assert_eq!(config.backend, BackendKind::Spinnaker);
        assert!(config.line_enable);
        assert_eq!(config.trigger_pin, Some(3));

        env::set_var("STREAMSERVER_LINEENABLE", "0");
        let (_, config) = config_from_env().unwrap();
        assert!(!config.line_enable);

        env::set_var("STREAMSERVER_BACKEND", "any");
        assert!(config_from_env().is_err());
        env::set_var("STREAMSERVER_BACKEND", "pylon");
        assert!(config_from_env().is_err());
        env::set_var("STREAMSERVER_PORT", "not-a-port");
        assert!(config_from_env().is_err());

        for name in [
            "STREAMSERVER_PORT",
            "STREAMSERVER_CAMIDX",
            "STREAMSERVER_COMPRESSIONEXT",
            "STREAMSERVER_FPS",
            "STREAMSERVER_MAXQUEUE",
            "STREAMSERVER_BACKEND",
            "STREAMSERVER_LINEENABLE",
            "STREAMSERVER_TRIGGERPIN",
        ] {
            env::remove_var(name);
        }
    }
}
