// ============================================================================
// GPU SHADERS — WGSL source for the four filter programs
// ============================================================================
//
// Byte images never appear as bytes on the device: single-channel planes are
// widened to one u32 per pixel and RGB is packed 0x00BBGGRR, so every
// invocation owns exactly the word it writes.
//
// The workgroup size is spliced in once at program creation (see
// `specialize`); all programs are compiled together at startup.

use super::WorkgroupSize;

const WG_X_TOKEN: &str = "{{WG_X}}";
const WG_Y_TOKEN: &str = "{{WG_Y}}";

/// Substitute the workgroup dimensions into a program's source.
pub fn specialize(source: &str, wg: WorkgroupSize) -> String {
    source
        .replace(WG_X_TOKEN, &wg.x.to_string())
        .replace(WG_Y_TOKEN, &wg.y.to_string())
}

// ============================================================================
// GENERIC CONVOLUTION — f32 in, f32 out, replicate border
// ============================================================================
pub const CONVOLVE_SHADER: &str = r#"
struct ImageParams {
    width:  u32,
    height: u32,
    ksize:  u32,
    _pad0:  u32,
};

@group(0) @binding(0) var<storage, read>       src:  array<f32>;
@group(0) @binding(1) var<storage, read_write> dst:  array<f32>;
@group(0) @binding(2) var<storage, read>       mask: array<f32>;
@group(0) @binding(3) var<uniform>             params: ImageParams;

@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
fn cs_convolve(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let w = i32(params.width);
    let h = i32(params.height);
    let n = i32(params.ksize);
    let r = n / 2;
    var acc: f32 = 0.0;

    for (var ky: i32 = -r; ky <= r; ky = ky + 1) {
        let yy = clamp(i32(gid.y) + ky, 0, h - 1);
        let krow = (ky + r) * n;
        let row_off = yy * w;
        for (var kx: i32 = -r; kx <= r; kx = kx + 1) {
            let xx = clamp(i32(gid.x) + kx, 0, w - 1);
            acc = acc + src[u32(row_off + xx)] * mask[u32(krow + kx + r)];
        }
    }

    dst[gid.y * params.width + gid.x] = acc;
}
"#;

// ============================================================================
// SOBEL — stage 1 gradient magnitude, stage 2 rescale by the global max
// ============================================================================
pub const SOBEL_SHADER: &str = r#"
struct SobelParams {
    width:   u32,
    height:  u32,
    ksize:   u32,
    max_val: f32,
};

@group(0) @binding(0) var<storage, read>       gray: array<u32>;
@group(0) @binding(1) var<storage, read_write> mag:  array<f32>;
@group(0) @binding(2) var<storage, read>       kx:   array<f32>;
@group(0) @binding(3) var<storage, read>       ky:   array<f32>;
@group(0) @binding(4) var<uniform>             params: SobelParams;
@group(0) @binding(5) var<storage, read_write> out_gray: array<u32>;

@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
fn cs_sobel_magnitude(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let w = i32(params.width);
    let h = i32(params.height);
    let n = i32(params.ksize);
    let pad = n / 2;
    var gx: f32 = 0.0;
    var gy: f32 = 0.0;

    for (var i: i32 = 0; i < n; i = i + 1) {
        let yy = clamp(i32(gid.y) + i - pad, 0, h - 1);
        for (var j: i32 = 0; j < n; j = j + 1) {
            let xx = clamp(i32(gid.x) + j - pad, 0, w - 1);
            let pixel = f32(gray[u32(yy * w + xx)]);
            let k = u32(i * n + j);
            gx = gx + pixel * kx[k];
            gy = gy + pixel * ky[k];
        }
    }

    mag[gid.y * params.width + gid.x] = sqrt(gx * gx + gy * gy);
}

@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
fn cs_sobel_normalize(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let idx = gid.y * params.width + gid.x;
    let v = clamp((mag[idx] / params.max_val) * 255.0, 0.0, 255.0);
    out_gray[idx] = u32(v);
}
"#;

// ============================================================================
// BOX MEAN — u8 in, u8 out, replicate border, rounded
// ============================================================================
pub const MEAN_SHADER: &str = r#"
struct ImageParams {
    width:  u32,
    height: u32,
    ksize:  u32,
    _pad0:  u32,
};

@group(0) @binding(0) var<storage, read>       src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform>             params: ImageParams;

@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
fn cs_mean(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let w = i32(params.width);
    let h = i32(params.height);
    let n = i32(params.ksize);
    let pad = n / 2;
    var sum: f32 = 0.0;

    for (var i: i32 = 0; i < n; i = i + 1) {
        let yy = clamp(i32(gid.y) + i - pad, 0, h - 1);
        for (var j: i32 = 0; j < n; j = j + 1) {
            let xx = clamp(i32(gid.x) + j - pad, 0, w - 1);
            sum = sum + f32(src[u32(yy * w + xx)]);
        }
    }

    let val = clamp(sum / f32(n * n), 0.0, 255.0);
    dst[gid.y * params.width + gid.x] = u32(val + 0.5);
}
"#;

// ============================================================================
// COLOR-RANGE HIGHLIGHT — keep blue/yellow, everything else to luma gray
// ============================================================================
pub const HIGHLIGHT_SHADER: &str = r#"
struct ImageParams {
    width:  u32,
    height: u32,
    ksize:  u32,
    _pad0:  u32,
};

@group(0) @binding(0) var<storage, read>       src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform>             params: ImageParams;

@compute @workgroup_size({{WG_X}}, {{WG_Y}}, 1)
fn cs_highlight(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.width || gid.y >= params.height) { return; }

    let idx = gid.y * params.width + gid.x;
    let p = src[idx];
    let r8 = p & 0xffu;
    let g8 = (p >> 8u) & 0xffu;
    let b8 = (p >> 16u) & 0xffu;

    let r = f32(r8) / 255.0;
    let g = f32(g8) / 255.0;
    let b = f32(b8) / 255.0;

    let maxv = max(r, max(g, b));
    let minv = min(r, min(g, b));
    let delta = maxv - minv;

    var h_deg: f32 = 0.0;
    if (delta > 1e-6) {
        if (maxv == r) {
            h_deg = 60.0 * (((g - b) / delta) % 6.0);
        } else if (maxv == g) {
            h_deg = 60.0 * (((b - r) / delta) + 2.0);
        } else {
            h_deg = 60.0 * (((r - g) / delta) + 4.0);
        }
        if (h_deg < 0.0) { h_deg = h_deg + 360.0; }
    }

    var s: f32 = 0.0;
    if (maxv > 0.0) { s = delta / maxv; }

    // OpenCV scale: H [0,179], S [0,255], V [0,255]
    let hh = u32(h_deg / 2.0 + 0.5);
    let s8 = u32(s * 255.0 + 0.5);
    let v8 = u32(maxv * 255.0 + 0.5);

    let in_blue = hh >= 90u && hh <= 140u && s8 >= 50u && v8 >= 40u;
    let in_yellow = hh >= 15u && hh <= 40u && s8 >= 70u && v8 >= 70u;

    if (in_blue || in_yellow) {
        dst[idx] = p & 0x00ffffffu;
    } else {
        let gray = u32(0.299 * f32(r8) + 0.587 * f32(g8) + 0.114 * f32(b8));
        dst[idx] = gray | (gray << 8u) | (gray << 16u);
    }
}
"#;
