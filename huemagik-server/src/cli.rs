//! Specifies the CLI and handles arg parsing

use clap::Parser;

/// The origins allowed by CORS when none are given on the command line
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://huemagik.com",
    "https://huemagik.com",
    "https://huemagik-frontend.onrender.com",
    "https://joyinfant99.github.io",
    "http://localhost:3000",
];

/// Serve the HueMagik palette extraction API over HTTP.
///
/// Images POSTed to /process_image are reduced to a palette of dominant colors
/// by k-means clustering and the colors are returned as JSON.
#[derive(Parser)]
#[command(version)]
pub struct Options {
    /// The address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// An origin allowed by CORS, replacing the built-in allowlist
    ///
    /// Pass the option multiple times to allow multiple origins.
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    pub allowed_origins: Vec<String>,

    /// The maximum accepted request body size in bytes
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    pub max_body_size: usize,

    /// The seed value used for centroid initialization
    ///
    /// Extraction is randomized by default, so repeated uploads of the same
    /// image may return different palettes. Set a seed for reproducible output.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Options {
    /// The configured origin allowlist, falling back to the built-in origins
    pub fn origins(&self) -> Vec<String> {
        if self.allowed_origins.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|&origin| origin.to_owned()).collect()
        } else {
            self.allowed_origins.clone()
        }
    }
}
