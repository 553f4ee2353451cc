use std::net::IpAddr;
use std::path::PathBuf;

/// Runtime settings read from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Absolute origin used when building QR upload links.
    pub public_base_url: String,
    pub frontend_url: Option<String>,
    pub auto_flag_threshold: i32,
    pub max_upload_bytes: usize,
    pub jpeg_quality: u8,
    pub max_image_dimension: u32,
    pub data_dir: PathBuf,
    /// Peers whose `Forwarded`/`X-Forwarded-For` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
}

pub const DEFAULT_AUTO_FLAG_THRESHOLD: i32 = 3;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 2048;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            public_base_url: "http://localhost:8080".into(),
            frontend_url: None,
            auto_flag_threshold: DEFAULT_AUTO_FLAG_THRESHOLD,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            data_dir: PathBuf::from("data"),
            trusted_proxies: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(d.host),
            port: parsed("PORT", d.port),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.public_base_url),
            frontend_url: std::env::var("FRONTEND_URL").ok().filter(|s| !s.is_empty()),
            auto_flag_threshold: parsed("AUTO_FLAG_THRESHOLD", d.auto_flag_threshold).max(1),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", d.max_upload_bytes),
            jpeg_quality: parsed::<u32>("JPEG_QUALITY", d.jpeg_quality.into()).clamp(1, 100) as u8,
            max_image_dimension: parsed("MAX_IMAGE_DIMENSION", d.max_image_dimension).max(1),
            data_dir: std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            trusted_proxies: std::env::var("TRUSTED_PROXIES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .filter_map(|s| match s.parse() {
                            Ok(ip) => Some(ip),
                            Err(_) => {
                                tracing::warn!("ignoring invalid TRUSTED_PROXIES entry '{s}'");
                                None
                            }
                        })
                        .collect()
                })
                .unwrap_or(d.trusted_proxies),
        }
    }

    pub fn is_trusted_proxy(&self, peer: IpAddr) -> bool {
        self.trusted_proxies.contains(&peer)
    }

    pub fn photo_url(&self, storage_path: &str) -> String {
        format!("{}/photos/{}", self.public_base_url, storage_path)
    }
}
