//! GPU image filtering: convolution masks, four compute programs, and the
//! pipeline that wires decoded uploads to them.
//!
//! ```no_run
//! use gpuconv::{Engine, EngineConfig};
//!
//! let engine = Engine::from_config(&EngineConfig::default())?;
//! let bytes = std::fs::read("photo.png")?;
//! let report = engine.process_upload(&bytes, "gaussian", 31)?;
//! std::fs::write("blurred.png", report.encode_png()?)?;
//! # Ok::<(), gpuconv::FilterError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gpu;
pub mod io;
pub mod logger;
pub mod ops;
pub mod raster;

pub use config::{BackendChoice, EngineConfig};
pub use error::{FilterError, FilterResult};
pub use gpu::{KernelBackend, LaunchGeometry, WorkgroupSize};
pub use ops::cpu::CpuBackend;
pub use ops::masks::{BuiltMask, Mask, MaskSet};
pub use ops::pipeline::{Engine, FilterKind, FilterOutcome, FilterReport};
pub use raster::Raster;
