use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

/// Process wiring. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "bloomscan", version, about = "Flower detection and telemetry migration service")]
pub struct ServiceArgs {
    #[arg(long, env = "BLOOMSCAN_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// SQLite file holding pending operations and registered rovers.
    #[arg(long, env = "BLOOMSCAN_STAGING_DB", default_value = "data/staging.db")]
    pub staging_db: PathBuf,

    /// SQLite file holding archived telemetry documents.
    #[arg(long, env = "BLOOMSCAN_ARCHIVE_DB", default_value = "data/archive.db")]
    pub archive_db: PathBuf,

    /// Directory for blobs when no container URL is given.
    #[arg(long, env = "BLOOMSCAN_BLOB_DIR", default_value = "data/blobs")]
    pub blob_dir: PathBuf,

    /// Block-blob container URL. Takes precedence over `--blob-dir`.
    #[arg(long, env = "BLOOMSCAN_BLOB_CONTAINER_URL")]
    pub blob_container_url: Option<String>,

    #[arg(long, env = "BLOOMSCAN_BLOB_SAS_TOKEN", hide_env_values = true)]
    pub blob_sas_token: Option<String>,

    #[arg(long, env = "BLOOMSCAN_MODEL_PATH", default_value = "YOLOv8-str-flower-model.onnx")]
    pub model_path: PathBuf,

    /// JSON tuning file for detection and migration.
    #[arg(long, env = "BLOOMSCAN_SETTINGS", default_value = "bloomscan.json")]
    pub settings: PathBuf,

    /// Drain staging every N seconds. Unset leaves draining to `/rover/trigger/`.
    #[arg(long, env = "BLOOMSCAN_DRAIN_INTERVAL_SECS")]
    pub drain_interval_secs: Option<u64>,

    /// Disable the migration journal. A retried drain then re-uploads and
    /// re-archives records a failed attempt already handled.
    #[arg(long, env = "BLOOMSCAN_UNGUARDED_REPLAY")]
    pub unguarded_replay: bool,
}

impl ServiceArgs {
    pub fn drain_interval(&self) -> Option<Duration> {
        self.drain_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_service() {
        let args = ServiceArgs::try_parse_from(["bloomscan"]).unwrap();
        assert_eq!(args.bind, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(args.model_path, PathBuf::from("YOLOv8-str-flower-model.onnx"));
        assert!(args.drain_interval().is_none());
        assert!(!args.unguarded_replay);
    }

    #[test]
    fn flags_override_defaults() {
        let args = ServiceArgs::try_parse_from([
            "bloomscan",
            "--drain-interval-secs",
            "300",
            "--unguarded-replay",
            "--blob-container-url",
            "https://acct.blob.core.windows.net/images",
        ])
        .unwrap();
        assert_eq!(args.drain_interval(), Some(Duration::from_secs(300)));
        assert!(args.unguarded_replay);
        assert!(args.blob_container_url.is_some());
    }

    #[test]
    fn zero_interval_disables_scheduling() {
        let args = ServiceArgs::try_parse_from(["bloomscan", "--drain-interval-secs", "0"]).unwrap();
        assert!(args.drain_interval().is_none());
    }
}
