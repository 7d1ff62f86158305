// ============================================================================
// OPS — host-side filter logic
// ============================================================================
//
//   masks.rs    — mask builder: Sobel / Gaussian / Emboss weights + validation
//   cpu.rs      — CPU reference backend (rayon), same semantics as the shaders
//   overlay.rs  — RGBA artwork composited over `ups` results
//   pipeline.rs — filter selection, dispatch guard, post-processing

pub mod cpu;
pub mod masks;
pub mod overlay;
pub mod pipeline;
