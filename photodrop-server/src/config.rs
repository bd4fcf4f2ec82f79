use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cleanup::SweepSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "photodrop-server", about = "Photo upload server")]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on, also used in the URLs returned by uploads.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Directory holding the date buckets.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Periodically delete photos older than `--max-age`.
    #[arg(long, env = "PHOTODROP_SWEEP")]
    pub sweep: bool,

    /// Seconds between two sweeps.
    #[arg(long = "sweep-interval", env = "PHOTODROP_SWEEP_INTERVAL", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Age in seconds after which a photo is swept.
    #[arg(long = "max-age", env = "PHOTODROP_MAX_AGE", default_value_t = 900)]
    pub max_age_secs: u64,

    #[arg(long = "request-timeout", env = "PHOTODROP_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `None` when the sweeper is disabled for this deployment.
    pub fn sweep_settings(&self) -> Option<SweepSettings> {
        self.sweep.then(|| SweepSettings {
            interval: Duration::from_secs(self.sweep_interval_secs),
            max_age: Duration::from_secs(self.max_age_secs),
        })
    }
}
