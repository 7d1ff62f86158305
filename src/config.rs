// ============================================================================
// CONFIG — engine settings from a key=value file plus GPUCONV_* overrides
// ============================================================================

use std::path::{Path, PathBuf};

/// Which kernel backend the engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// GPU if an adapter can be created, CPU otherwise.
    Auto,
    /// GPU or fail.
    Gpu,
    /// CPU reference backend only.
    Cpu,
}

impl BackendChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(BackendChoice::Auto),
            "gpu" => Some(BackendChoice::Gpu),
            "cpu" => Some(BackendChoice::Cpu),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Gpu => "gpu",
            BackendChoice::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub backend: BackendChoice,
    /// "high performance" / "low power"; anything else means high performance.
    pub preferred_gpu: String,
    /// Accept the software fallback adapter when no hardware adapter exists.
    pub allow_software_adapter: bool,
    /// RGBA artwork composited over `ups` results.
    pub overlay_path: Option<PathBuf>,
    pub overlay_opacity: f32,
    /// Accept odd kernel sizes outside the preset sets.
    pub allow_custom_sizes: bool,
    /// Write the session log file.
    pub log_to_file: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            preferred_gpu: "high performance".to_string(),
            allow_software_adapter: true,
            overlay_path: None,
            overlay_opacity: 1.0,
            allow_custom_sizes: true,
            log_to_file: true,
        }
    }
}

impl EngineConfig {
    /// Path to the settings file.
    /// On Linux:   ~/.config/gpuconv/gpuconv.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\gpuconv\gpuconv.cfg
    /// On macOS:   ~/Library/Application Support/gpuconv/gpuconv.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").ok()?;
            return Some(PathBuf::from(appdata).join("gpuconv").join("gpuconv.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("gpuconv")
                    .join("gpuconv.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let base = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(base.join("gpuconv").join("gpuconv.cfg"))
        }
    }

    /// Defaults, then the settings file (if any), then the environment.
    pub fn load(explicit: Option<&Path>) -> Self {
        let path = explicit.map(Path::to_path_buf).or_else(Self::settings_path);
        let mut cfg = match path.as_deref().map(std::fs::read_to_string) {
            Some(Ok(content)) => Self::parse(&content),
            Some(Err(e)) => {
                if explicit.is_some() {
                    log::warn!("could not read config {:?}: {e}; using defaults", path);
                }
                Self::default()
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// Parse `key = value` lines.  Unknown keys and malformed values are
    /// skipped so an old or hand-edited file never blocks startup.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            s.set(key.trim(), val.trim());
        }
        s
    }

    /// Apply `GPUCONV_<KEY>` variables, e.g. `GPUCONV_BACKEND=cpu`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in Self::KEYS {
            let var = format!("GPUCONV_{}", key.to_uppercase());
            if let Some(val) = lookup(&var) {
                self.set(key, val.trim());
            }
        }
    }

    const KEYS: [&'static str; 7] = [
        "backend",
        "preferred_gpu",
        "allow_software_adapter",
        "overlay_path",
        "overlay_opacity",
        "allow_custom_sizes",
        "log_to_file",
    ];

    fn set(&mut self, key: &str, val: &str) {
        match key {
            "backend" => {
                if let Some(b) = BackendChoice::parse(val) {
                    self.backend = b;
                }
            }
            "preferred_gpu" => self.preferred_gpu = val.to_string(),
            "allow_software_adapter" => {
                if let Some(b) = parse_bool(val) {
                    self.allow_software_adapter = b;
                }
            }
            "overlay_path" => {
                self.overlay_path = (!val.is_empty()).then(|| PathBuf::from(val));
            }
            "overlay_opacity" => {
                if let Ok(v) = val.parse::<f32>() {
                    self.overlay_opacity = v.clamp(0.0, 1.0);
                }
            }
            "allow_custom_sizes" => {
                if let Some(b) = parse_bool(val) {
                    self.allow_custom_sizes = b;
                }
            }
            "log_to_file" => {
                if let Some(b) = parse_bool(val) {
                    self.log_to_file = b;
                }
            }
            _ => {}
        }
    }

    /// Serialise in the same format `parse` reads.
    pub fn to_cfg_string(&self) -> String {
        format!(
            "backend={}\n\
             preferred_gpu={}\n\
             allow_software_adapter={}\n\
             overlay_path={}\n\
             overlay_opacity={}\n\
             allow_custom_sizes={}\n\
             log_to_file={}\n",
            self.backend.as_str(),
            self.preferred_gpu,
            self.allow_software_adapter,
            self.overlay_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default(),
            self.overlay_opacity,
            self.allow_custom_sizes,
            self.log_to_file,
        )
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_cfg_string())
    }
}

/// Only the literals `true` and `false`; anything else is ignored.
fn parse_bool(val: &str) -> Option<bool> {
    match val {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
