//! Trigonometric approximations and angle helpers for the FOC loops.
//!
//! The control loop evaluates sin/cos thousands of times per second, so the
//! exact libm routines (~100-200 cycles on Cortex-M) are replaced by a
//! 65-entry quarter-wave lookup table with linear interpolation (RMS error
//! ~6.5e-5 against the exact function). With the `idsp` feature enabled,
//! `sincos` instead uses `idsp::cossin` (~40 cycles on Cortex-M).

use core::f32::consts::{PI, TAU};

/// 3π/2, the rotor-hold angle used during zero-electrical-angle capture.
pub const _3PI_2: f32 = 3.0 * PI / 2.0;

/// Smallest sensor movement treated as genuine rotation during calibration.
pub const MIN_ANGLE_DETECT_MOVEMENT: f32 = TAU / 101.0;

// Quarter-wave sine table, u16 full scale = 32768. 8 fractional bits are
// used for interpolation between adjacent entries.
static SINE_TABLE: [u16; 65] = [
    0, 804, 1608, 2411, 3212, 4011, 4808, 5602, 6393, 7180, 7962, 8740, 9512, 10279, 11039, 11793,
    12540, 13279, 14010, 14733, 15447, 16151, 16846, 17531, 18205, 18868, 19520, 20160, 20788,
    21403, 22006, 22595, 23170, 23732, 24279, 24812, 25330, 25833, 26320, 26791, 27246, 27684,
    28106, 28511, 28899, 29269, 29622, 29957, 30274, 30572, 30853, 31114, 31357, 31581, 31786,
    31972, 32138, 32286, 32413, 32522, 32610, 32679, 32729, 32758, 32768,
];

/// Sine approximation via table lookup and interpolation.
///
/// `a` must already be normalized to `[0, 2π)`; see [`normalize_angle`].
pub fn sin(a: f32) -> f32 {
    let i = (a * (64.0 * 4.0 * 256.0 / TAU)) as u32;
    let frac = (i & 0xff) as i32;
    let i = ((i >> 8) & 0xff) as usize;
    let (t1, t2): (i32, i32) = if i < 64 {
        (SINE_TABLE[i] as i32, SINE_TABLE[i + 1] as i32)
    } else if i < 128 {
        (SINE_TABLE[128 - i] as i32, SINE_TABLE[127 - i] as i32)
    } else if i < 192 {
        (-(SINE_TABLE[i - 128] as i32), -(SINE_TABLE[i - 127] as i32))
    } else {
        (-(SINE_TABLE[256 - i] as i32), -(SINE_TABLE[255 - i] as i32))
    };
    (1.0 / 32768.0) * (t1 + (((t2 - t1) * frac) >> 8)) as f32
}

/// Cosine via the quarter-period shift of [`sin`]. `a` must be in `[0, 2π)`.
pub fn cos(a: f32) -> f32 {
    let a_sin = a + PI / 2.0;
    sin(if a_sin > TAU { a_sin - TAU } else { a_sin })
}

/// Simultaneous sine and cosine of an angle in `[0, 2π)`.
#[cfg(not(feature = "idsp"))]
pub fn sincos(a: f32) -> (f32, f32) {
    (sin(a), cos(a))
}

/// Simultaneous sine and cosine of an angle in `[0, 2π)`.
#[cfg(feature = "idsp")]
pub fn sincos(a: f32) -> (f32, f32) {
    // idsp maps the full i32 range onto [-π, π).
    const SCALE: f32 = 2147483648.0 / PI;
    const TO_F32: f32 = 1.0 / 2147483648.0;
    let a = normalize_angle(a);
    let wrapped = if a > PI { a - TAU } else { a };
    let (c, s) = idsp::cossin((wrapped * SCALE) as i32);
    (s as f32 * TO_F32, c as f32 * TO_F32)
}

/// Four-quadrant arctangent, minimax polynomial on `min/max` ratio with
/// quadrant correction. No trigonometric calls. Max error ~0.005 rad.
pub fn atan2(y: f32, x: f32) -> f32 {
    let abs_y = libm::fabsf(y);
    let abs_x = libm::fabsf(x);
    // MIN_POSITIVE keeps the ratio finite when both inputs are zero.
    let a = if abs_x > abs_y { abs_y } else { abs_x }
        / (if abs_x > abs_y { abs_x } else { abs_y } + f32::MIN_POSITIVE);
    let s = a * a;
    let mut r = ((-0.046_496_475 * s + 0.159_314_22) * s - 0.327_622_76) * s * a + a;
    if abs_y > abs_x {
        r = 1.570_796_4 - r;
    }
    if x < 0.0 {
        r = PI - r;
    }
    if y < 0.0 {
        r = -r;
    }
    r
}

/// Fold an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let a = libm::fmodf(angle, TAU);
    if a >= 0.0 {
        a
    } else {
        a + TAU
    }
}

/// Electrical angle for a given mechanical shaft angle. Not normalized;
/// callers fold the result into `[0, 2π)` before any trigonometry.
pub fn electrical_angle(shaft_angle: f32, pole_pairs: u8) -> f32 {
    shaft_angle * pole_pairs as f32
}

/// Fast square root (inverse-sqrt bit trick, ~2% accuracy). Good enough for
/// current-magnitude estimates; not for anything fed back into trig.
pub fn sqrt_approx(number: f32) -> f32 {
    let y = f32::from_bits(0x5f37_5a86_u32.wrapping_sub(number.to_bits() >> 1));
    number * y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn sin_matches_libm_within_bound() {
        let mut max_err: f32 = 0.0;
        for i in 0..3217 {
            let a = TAU * i as f32 / 3217.0;
            let err = (sin(a) - libm::sinf(a)).abs();
            max_err = max_err.max(err);
        }
        assert!(max_err < 2e-4, "max sin error {}", max_err);
    }

    #[test]
    fn cos_quarter_shift() {
        for i in 0..100 {
            let a = TAU * i as f32 / 100.0;
            assert!(approx_eq(cos(a), libm::cosf(a), 2e-4));
        }
    }

    #[test]
    fn sincos_agrees_with_components() {
        let (s, c) = sincos(1.0);
        assert!(approx_eq(s, libm::sinf(1.0), 1e-3));
        assert!(approx_eq(c, libm::cosf(1.0), 1e-3));
    }

    #[test]
    fn atan2_all_quadrants() {
        let cases = [
            (1.0, 1.0),
            (1.0, -1.0),
            (-1.0, 1.0),
            (-1.0, -1.0),
            (0.5, 2.0),
            (-3.0, 0.2),
        ];
        for (y, x) in cases {
            assert!(
                approx_eq(atan2(y, x), libm::atan2f(y, x), 0.01),
                "atan2({}, {})",
                y,
                x
            );
        }
    }

    #[test]
    fn normalize_in_range_and_idempotent() {
        for x in [-100.0f32, -7.0, -1.0, 0.0, 1.0, TAU, 7.0, 100.0] {
            let n = normalize_angle(x);
            assert!((0.0..TAU).contains(&n), "normalize({}) = {}", x, n);
            assert_eq!(normalize_angle(n), n);
        }
    }

    #[test]
    fn electrical_angle_scales_by_pole_pairs() {
        assert!(approx_eq(electrical_angle(0.5, 7), 3.5, 1e-6));
    }

    #[test]
    fn sqrt_approx_close_to_exact() {
        for x in [0.01f32, 0.5, 1.0, 2.0, 100.0, 12345.0] {
            let rel = (sqrt_approx(x) - libm::sqrtf(x)).abs() / libm::sqrtf(x);
            assert!(rel < 0.04, "sqrt_approx({}) off by {}", x, rel);
        }
    }
}
