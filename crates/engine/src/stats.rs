//! Scalar statistics helpers.

const INV_SQRT_PI: f64 = 0.564_189_583_547_756_286_95;

/// Beyond this argument `erfc` underflows to zero.
const ERFC_XBIG: f64 = 26.543;

/// Rational coefficients for `erf` on |x| <= 0.46875.
const ERF_A: [f64; 5] = [
    3.161_123_743_870_565_6e0,
    1.138_641_541_510_501_56e2,
    3.774_852_376_853_020_21e2,
    3.209_377_589_138_469_47e3,
    1.857_777_061_846_031_53e-1,
];
const ERF_B: [f64; 4] = [
    2.360_129_095_234_412_09e1,
    2.440_246_379_344_441_73e2,
    1.282_616_526_077_372_28e3,
    2.844_236_833_439_170_62e3,
];

/// Rational coefficients for `erfc` on 0.46875 < x <= 4.
const ERFC_C: [f64; 9] = [
    5.641_884_969_886_700_89e-1,
    8.883_149_794_388_375_94e0,
    6.611_919_063_714_162_95e1,
    2.986_351_381_974_001_31e2,
    8.819_522_212_417_690_9e2,
    1.712_047_612_634_070_58e3,
    2.051_078_377_826_071_47e3,
    1.230_339_354_797_997_25e3,
    2.153_115_354_744_038_46e-8,
];
const ERFC_D: [f64; 8] = [
    1.574_492_611_070_983_47e1,
    1.176_939_508_913_124_99e2,
    5.371_811_018_620_098_58e2,
    1.621_389_574_566_690_19e3,
    3.290_799_235_733_459_63e3,
    4.362_619_090_143_247_16e3,
    3.439_367_674_143_721_64e3,
    1.230_339_354_803_749_42e3,
];

/// Asymptotic coefficients for `erfc` on x > 4.
const ERFC_P: [f64; 6] = [
    3.053_266_349_612_323_44e-1,
    3.603_448_999_498_044_39e-1,
    1.257_817_261_112_292_46e-1,
    1.608_378_514_874_227_66e-2,
    6.587_491_615_298_378_03e-4,
    1.631_538_713_730_209_78e-2,
];
const ERFC_Q: [f64; 5] = [
    2.568_520_192_289_822_42e0,
    1.872_952_849_923_467_25e0,
    5.279_051_029_514_284_12e-1,
    6.051_834_131_244_131_91e-2,
    2.335_204_976_268_691_85e-3,
];

/// `exp(-y²)` split so the rounding of `y²` does not leak into the tail.
fn exp_neg_square(y: f64) -> f64 {
    let head = (y * 16.0).trunc() / 16.0;
    let del = (y - head) * (y + head);
    (-head * head).exp() * (-del).exp()
}

/// Complementary error function for y >= 0.46875.
fn erfc_upper(y: f64) -> f64 {
    if y >= ERFC_XBIG {
        return 0.0;
    }

    let ratio = if y <= 4.0 {
        let mut num = ERFC_C[8] * y;
        let mut den = y;
        for (c, d) in ERFC_C[..7].iter().zip(&ERFC_D[..7]) {
            num = (num + c) * y;
            den = (den + d) * y;
        }
        (num + ERFC_C[7]) / (den + ERFC_D[7])
    } else {
        let z = 1.0 / (y * y);
        let mut num = ERFC_P[5] * z;
        let mut den = z;
        for (p, q) in ERFC_P[..4].iter().zip(&ERFC_Q[..4]) {
            num = (num + p) * z;
            den = (den + q) * z;
        }
        let correction = z * (num + ERFC_P[4]) / (den + ERFC_Q[4]);
        (INV_SQRT_PI - correction) / y
    };

    exp_neg_square(y) * ratio
}

/// Error function for |x| <= 0.46875.
fn erf_small(x: f64) -> f64 {
    let z = x * x;
    let mut num = ERF_A[4] * z;
    let mut den = z;
    for (a, b) in ERF_A[..3].iter().zip(&ERF_B[..3]) {
        num = (num + a) * z;
        den = (den + b) * z;
    }
    x * (num + ERF_A[3]) / (den + ERF_B[3])
}

/// Complementary error function, W. J. Cody's rational Chebyshev
/// approximations. Evaluated directly in the tails so small results keep
/// their relative precision.
pub fn erfc(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    let y = x.abs();
    if y <= 0.468_75 {
        return 1.0 - erf_small(x);
    }
    let upper = erfc_upper(y);
    if x < 0.0 { 2.0 - upper } else { upper }
}

/// Standard normal cumulative distribution function.
///
/// NaN in, NaN out; the infinities map to 0 and 1.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x == f64::INFINITY {
        return 1.0;
    }
    if x == f64::NEG_INFINITY {
        return 0.0;
    }
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}
