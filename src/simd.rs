/// Fixed-width lane vectors used throughout the pipeline.
///
/// Every vector holds `LANES` independent values: 16 vertices, 16 triangles
/// or the 16 pixels of one 4x4 tile. The hot operations (compares, FMA,
/// masked gathers/stores, blends and the point transform) run on two AVX2
/// registers when the CPU supports it; the element loops are the scalar fallback.
use glam::Mat4;
use std::ops::{
    Add, AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign, Div, Index, Mul, MulAssign, Neg, Not,
    Shl, Shr, Sub, SubAssign,
};

/// Lane count of every vector type (W).
pub const LANES: usize = 16;

/// Runs `$fast` when the CPU has every listed feature (and `$guard` holds),
/// otherwise evaluates `$fallback`. Must be the tail of a function body.
macro_rules! dispatch {
    ($($feature:tt),+ $(; if $guard:expr)? => $fast:expr, else $fallback:expr) => {{
        #[cfg(target_arch = "x86_64")]
        {
            if true $(&& is_x86_feature_detected!($feature))+ $(&& $guard)? {
                // Safety: the required target features were just detected.
                return unsafe { $fast };
            }
        }
        $fallback
    }};
}

/// Vector of 16 `f32` lanes.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C, align(64))]
pub struct VFloat(pub [f32; LANES]);

/// Vector of 16 `i32` lanes. Arithmetic wraps like hardware lanes do.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C, align(64))]
pub struct VInt(pub [i32; LANES]);

/// One bit per lane; bit `i` set means lane `i` is live.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VMask(pub u16);

/// Four lane vectors, typically a clip-space position.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct VFloat4 {
    pub x: VFloat,
    pub y: VFloat,
    pub z: VFloat,
    pub w: VFloat,
}

impl Default for VFloat {
    #[inline]
    fn default() -> Self {
        Self([0.0; LANES])
    }
}

impl Default for VInt {
    #[inline]
    fn default() -> Self {
        Self([0; LANES])
    }
}

impl VFloat {
    #[inline(always)]
    pub const fn splat(v: f32) -> Self {
        Self([v; LANES])
    }

    #[inline(always)]
    pub fn from_fn(f: impl FnMut(usize) -> f32) -> Self {
        Self(std::array::from_fn(f))
    }

    /// Loads 16 contiguous values. `src` must hold at least `LANES` elements.
    #[inline(always)]
    pub fn load(src: &[f32]) -> Self {
        let mut out = [0.0; LANES];
        out.copy_from_slice(&src[..LANES]);
        Self(out)
    }

    #[inline(always)]
    pub fn store(self, dst: &mut [f32]) {
        dst[..LANES].copy_from_slice(&self.0);
    }

    /// Stores only the lanes set in `mask`.
    #[inline(always)]
    pub fn store_masked(self, dst: &mut [f32], mask: VMask) {
        let dst = &mut dst[..LANES];
        dispatch!("avx2" => avx2::maskstore(self.0.as_ptr() as *const i32, dst.as_mut_ptr() as *mut i32, mask), else {
            for i in 0..LANES {
                if mask.test(i) {
                    dst[i] = self.0[i];
                }
            }
        })
    }

    /// Gathers live lanes and substitutes `default` elsewhere. Dead lanes never touch memory.
    ///
    /// Panics if a live lane indexes past `base`.
    #[inline(always)]
    pub fn gather_masked(default: VFloat, mask: VMask, base: &[f32], indices: VInt) -> Self {
        dispatch!("avx2"; if indices.in_bounds(mask, base.len())
            => Self(avx2::mask_gather_ps(&default.0, mask, base.as_ptr(), &indices.0)),
        else Self::from_fn(|i| {
            if mask.test(i) {
                base[indices.0[i] as usize]
            } else {
                default.0[i]
            }
        }))
    }

    #[inline(always)]
    pub fn lane(self, i: usize) -> f32 {
        self.0[i]
    }

    #[inline(always)]
    pub fn map(self, mut f: impl FnMut(f32) -> f32) -> Self {
        Self::from_fn(|i| f(self.0[i]))
    }

    #[inline(always)]
    fn zip(self, rhs: Self, mut f: impl FnMut(f32, f32) -> f32) -> Self {
        Self::from_fn(|i| f(self.0[i], rhs.0[i]))
    }

    #[inline(always)]
    fn cmp(self, rhs: Self, mut f: impl FnMut(f32, f32) -> bool) -> VMask {
        VMask::from_fn(|i| f(self.0[i], rhs.0[i]))
    }

    #[inline(always)]
    pub fn lt(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmp_ps::<{ avx2::LT }>(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a < b))
    }

    #[inline(always)]
    pub fn le(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmp_ps::<{ avx2::LE }>(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a <= b))
    }

    #[inline(always)]
    pub fn gt(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmp_ps::<{ avx2::GT }>(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a > b))
    }

    #[inline(always)]
    pub fn ge(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmp_ps::<{ avx2::GE }>(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a >= b))
    }

    /// True for NaN lanes, like the scalar `!=`.
    #[inline(always)]
    pub fn cmp_ne(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmp_ps::<{ avx2::NE }>(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a != b))
    }

    #[inline(always)]
    pub fn is_finite(self) -> VMask {
        VMask::from_fn(|i| self.0[i].is_finite())
    }

    #[inline(always)]
    pub fn min(self, rhs: Self) -> Self {
        self.zip(rhs, f32::min)
    }

    #[inline(always)]
    pub fn max(self, rhs: Self) -> Self {
        self.zip(rhs, f32::max)
    }

    #[inline(always)]
    pub fn abs(self) -> Self {
        self.map(f32::abs)
    }

    /// `self * b + c`
    #[inline(always)]
    pub fn fma(self, b: Self, c: Self) -> Self {
        dispatch!("avx2", "fma" => Self(avx2::fmadd_ps(&self.0, &b.0, &c.0)),
            else Self::from_fn(|i| self.0[i].mul_add(b.0[i], c.0[i])))
    }

    #[inline(always)]
    pub fn rcp(self) -> Self {
        self.map(|v| 1.0 / v)
    }

    /// Picks `a` in lanes set in `mask`, `b` elsewhere.
    #[inline(always)]
    pub fn select(mask: VMask, a: Self, b: Self) -> Self {
        dispatch!("avx2" => Self(bytemuck::cast(avx2::blend(mask, &bytemuck::cast(a.0), &bytemuck::cast(b.0)))),
            else Self::from_fn(|i| if mask.test(i) { a.0[i] } else { b.0[i] }))
    }

    /// Round to nearest. Out-of-range and NaN lanes saturate instead of trapping.
    #[inline(always)]
    pub fn round_to_int(self) -> VInt {
        VInt::from_fn(|i| self.0[i].round() as i32)
    }

    #[inline(always)]
    pub fn truncate_to_int(self) -> VInt {
        VInt::from_fn(|i| self.0[i] as i32)
    }

    /// Reinterprets the bits of each lane.
    #[inline(always)]
    pub fn to_bits(self) -> VInt {
        VInt::from_fn(|i| self.0[i].to_bits() as i32)
    }
}

impl VInt {
    #[inline(always)]
    pub const fn splat(v: i32) -> Self {
        Self([v; LANES])
    }

    #[inline(always)]
    pub fn from_fn(f: impl FnMut(usize) -> i32) -> Self {
        Self(std::array::from_fn(f))
    }

    #[inline(always)]
    pub fn lane(self, i: usize) -> i32 {
        self.0[i]
    }

    /// Gathers live lanes and substitutes `default` elsewhere. Dead lanes never touch memory.
    ///
    /// Panics if a live lane indexes past `base`.
    #[inline(always)]
    pub fn gather_masked(default: VInt, mask: VMask, base: &[u32], indices: VInt) -> Self {
        dispatch!("avx2"; if indices.in_bounds(mask, base.len())
            => Self(avx2::mask_gather_epi32(&default.0, mask, base.as_ptr() as *const i32, &indices.0)),
        else Self::from_fn(|i| {
            if mask.test(i) {
                base[indices.0[i] as usize] as i32
            } else {
                default.0[i]
            }
        }))
    }

    /// Stores only the lanes set in `mask`, reinterpreted as `u32`.
    #[inline(always)]
    pub fn store_masked(self, dst: &mut [u32], mask: VMask) {
        let dst = &mut dst[..LANES];
        dispatch!("avx2" => avx2::maskstore(self.0.as_ptr(), dst.as_mut_ptr() as *mut i32, mask), else {
            for i in 0..LANES {
                if mask.test(i) {
                    dst[i] = self.0[i] as u32;
                }
            }
        })
    }

    /// Every live lane is a valid index into a slice of `len` elements.
    #[inline(always)]
    #[allow(dead_code)] // only consulted on x86_64
    fn in_bounds(self, mask: VMask, len: usize) -> bool {
        len <= i32::MAX as usize && (mask & !self.lt_unsigned(VInt::splat(len as i32))) == VMask::NONE
    }

    #[inline(always)]
    pub fn map(self, mut f: impl FnMut(i32) -> i32) -> Self {
        Self::from_fn(|i| f(self.0[i]))
    }

    #[inline(always)]
    fn zip(self, rhs: Self, mut f: impl FnMut(i32, i32) -> i32) -> Self {
        Self::from_fn(|i| f(self.0[i], rhs.0[i]))
    }

    #[inline(always)]
    fn cmp(self, rhs: Self, mut f: impl FnMut(i32, i32) -> bool) -> VMask {
        VMask::from_fn(|i| f(self.0[i], rhs.0[i]))
    }

    #[inline(always)]
    pub fn lt(self, rhs: Self) -> VMask {
        rhs.gt(self)
    }

    #[inline(always)]
    pub fn le(self, rhs: Self) -> VMask {
        !self.gt(rhs)
    }

    #[inline(always)]
    pub fn gt(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmpgt_epi32(&self.0, &rhs.0, 0), else self.cmp(rhs, |a, b| a > b))
    }

    #[inline(always)]
    pub fn ge(self, rhs: Self) -> VMask {
        !rhs.gt(self)
    }

    #[inline(always)]
    pub fn cmp_eq(self, rhs: Self) -> VMask {
        dispatch!("avx2" => avx2::cmpeq_epi32(&self.0, &rhs.0), else self.cmp(rhs, |a, b| a == b))
    }

    /// Unsigned `self < rhs`. With a non-negative bound this checks `0 <= self < rhs` in one compare.
    #[inline(always)]
    pub fn lt_unsigned(self, rhs: Self) -> VMask {
        // Flipping the sign bit maps unsigned order onto signed order.
        dispatch!("avx2" => avx2::cmpgt_epi32(&rhs.0, &self.0, i32::MIN),
            else self.cmp(rhs, |a, b| (a as u32) < (b as u32)))
    }

    /// Lanes holding a non-negative value.
    #[inline(always)]
    pub fn non_negative(self) -> VMask {
        dispatch!("avx2" => !avx2::sign_mask(&self.0), else VMask::from_fn(|i| self.0[i] >= 0))
    }

    #[inline(always)]
    pub fn min(self, rhs: Self) -> Self {
        self.zip(rhs, i32::min)
    }

    #[inline(always)]
    pub fn max(self, rhs: Self) -> Self {
        self.zip(rhs, i32::max)
    }

    #[inline(always)]
    pub fn select(mask: VMask, a: Self, b: Self) -> Self {
        dispatch!("avx2" => Self(avx2::blend(mask, &a.0, &b.0)),
            else Self::from_fn(|i| if mask.test(i) { a.0[i] } else { b.0[i] }))
    }

    #[inline(always)]
    pub fn to_float(self) -> VFloat {
        VFloat::from_fn(|i| self.0[i] as f32)
    }

    /// Logical (zero-filling) right shift.
    #[inline(always)]
    pub fn shr_logical(self, amount: u32) -> Self {
        self.map(|v| ((v as u32) >> amount) as i32)
    }
}

impl VMask {
    pub const NONE: VMask = VMask(0);
    pub const ALL: VMask = VMask(u16::MAX);

    #[inline(always)]
    pub fn from_fn(mut f: impl FnMut(usize) -> bool) -> Self {
        let mut bits = 0u16;
        for i in 0..LANES {
            bits |= (f(i) as u16) << i;
        }
        Self(bits)
    }

    /// Mask with the lowest `n` lanes set (saturates at `LANES`).
    #[inline(always)]
    pub fn first_n(n: usize) -> Self {
        if n >= LANES {
            Self::ALL
        } else {
            Self(((1u32 << n) - 1) as u16)
        }
    }

    #[inline(always)]
    pub fn test(self, lane: usize) -> bool {
        self.0 & (1 << lane) != 0
    }

    #[inline(always)]
    pub fn any(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates the indices of set lanes in ascending order.
    #[inline(always)]
    pub fn lanes(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let lane = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(lane)
        })
    }
}

impl BitAnd for VMask {
    type Output = Self;
    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for VMask {
    type Output = Self;
    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAndAssign for VMask {
    #[inline(always)]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOrAssign for VMask {
    #[inline(always)]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for VMask {
    type Output = Self;
    #[inline(always)]
    fn not(self) -> Self {
        Self(!self.0)
    }
}

macro_rules! impl_float_op {
    ($trait:ident, $fn:ident, $assign_trait:ident, $assign_fn:ident, $op:tt) => {
        impl $trait for VFloat {
            type Output = Self;
            #[inline(always)]
            fn $fn(self, rhs: Self) -> Self {
                self.zip(rhs, |a, b| a $op b)
            }
        }

        impl $trait<f32> for VFloat {
            type Output = Self;
            #[inline(always)]
            fn $fn(self, rhs: f32) -> Self {
                self.map(|a| a $op rhs)
            }
        }

        impl $assign_trait for VFloat {
            #[inline(always)]
            fn $assign_fn(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        }

        impl $assign_trait<f32> for VFloat {
            #[inline(always)]
            fn $assign_fn(&mut self, rhs: f32) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_float_op!(Add, add, AddAssign, add_assign, +);
impl_float_op!(Sub, sub, SubAssign, sub_assign, -);
impl_float_op!(Mul, mul, MulAssign, mul_assign, *);

impl Div for VFloat {
    type Output = Self;
    #[inline(always)]
    fn div(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a / b)
    }
}

impl Neg for VFloat {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        self.map(|a| -a)
    }
}

impl From<f32> for VFloat {
    #[inline(always)]
    fn from(v: f32) -> Self {
        Self::splat(v)
    }
}

impl Index<usize> for VFloat {
    type Output = f32;
    #[inline(always)]
    fn index(&self, i: usize) -> &f32 {
        &self.0[i]
    }
}

macro_rules! impl_int_op {
    ($trait:ident, $fn:ident, $assign_trait:ident, $assign_fn:ident, $wrapping:ident) => {
        impl $trait for VInt {
            type Output = Self;
            #[inline(always)]
            fn $fn(self, rhs: Self) -> Self {
                self.zip(rhs, i32::$wrapping)
            }
        }

        impl $trait<i32> for VInt {
            type Output = Self;
            #[inline(always)]
            fn $fn(self, rhs: i32) -> Self {
                self.map(|a| a.$wrapping(rhs))
            }
        }

        impl $assign_trait for VInt {
            #[inline(always)]
            fn $assign_fn(&mut self, rhs: Self) {
                *self = $trait::$fn(*self, rhs);
            }
        }

        impl $assign_trait<i32> for VInt {
            #[inline(always)]
            fn $assign_fn(&mut self, rhs: i32) {
                *self = $trait::$fn(*self, rhs);
            }
        }
    };
}

impl_int_op!(Add, add, AddAssign, add_assign, wrapping_add);
impl_int_op!(Sub, sub, SubAssign, sub_assign, wrapping_sub);
impl_int_op!(Mul, mul, MulAssign, mul_assign, wrapping_mul);

impl Neg for VInt {
    type Output = Self;
    #[inline(always)]
    fn neg(self) -> Self {
        self.map(i32::wrapping_neg)
    }
}

impl BitAnd for VInt {
    type Output = Self;
    #[inline(always)]
    fn bitand(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a & b)
    }
}

impl BitAnd<i32> for VInt {
    type Output = Self;
    #[inline(always)]
    fn bitand(self, rhs: i32) -> Self {
        self.map(|a| a & rhs)
    }
}

impl BitOr for VInt {
    type Output = Self;
    #[inline(always)]
    fn bitor(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a | b)
    }
}

/// Arithmetic (sign-extending) right shift.
impl Shr<u32> for VInt {
    type Output = Self;
    #[inline(always)]
    fn shr(self, rhs: u32) -> Self {
        self.map(|a| a.wrapping_shr(rhs))
    }
}

impl Shl<u32> for VInt {
    type Output = Self;
    #[inline(always)]
    fn shl(self, rhs: u32) -> Self {
        self.map(|a| a.wrapping_shl(rhs))
    }
}

impl From<i32> for VInt {
    #[inline(always)]
    fn from(v: i32) -> Self {
        Self::splat(v)
    }
}

impl Index<usize> for VInt {
    type Output = i32;
    #[inline(always)]
    fn index(&self, i: usize) -> &i32 {
        &self.0[i]
    }
}

impl VFloat4 {
    #[inline(always)]
    pub fn new(x: VFloat, y: VFloat, z: VFloat, w: VFloat) -> Self {
        Self { x, y, z, w }
    }
}

/// Transforms 16 points `(x, y, z, 1)` by `m`, broadcasting each matrix column across the lanes.
#[inline]
pub fn transform_point(m: &Mat4, x: VFloat, y: VFloat, z: VFloat) -> VFloat4 {
    dispatch!("avx2", "fma" => avx2::transform_point(m, &x.0, &y.0, &z.0), else transform_point_scalar(m, x, y, z))
}

#[inline]
fn transform_point_scalar(m: &Mat4, x: VFloat, y: VFloat, z: VFloat) -> VFloat4 {
    let (c0, c1, c2, c3) = (m.x_axis, m.y_axis, m.z_axis, m.w_axis);

    VFloat4 {
        x: x.fma(c0.x.into(), y.fma(c1.x.into(), z.fma(c2.x.into(), c3.x.into()))),
        y: x.fma(c0.y.into(), y.fma(c1.y.into(), z.fma(c2.y.into(), c3.y.into()))),
        z: x.fma(c0.z.into(), y.fma(c1.z.into(), z.fma(c2.z.into(), c3.z.into()))),
        w: x.fma(c0.w.into(), y.fma(c1.w.into(), z.fma(c2.w.into(), c3.w.into()))),
    }
}

/// Two-register AVX2 implementations of the hot lane operations.
///
/// Arrays may be plain temporaries, so all loads and stores are unaligned.
#[cfg(target_arch = "x86_64")]
mod avx2 {
    use super::{VFloat, VFloat4, VMask, LANES};
    use core::arch::x86_64::*;
    use glam::Mat4;

    const HALF: usize = LANES / 2;

    // Ordered, non-signaling predicates except NE, which is true for NaN.
    pub const LT: i32 = _CMP_LT_OQ;
    pub const LE: i32 = _CMP_LE_OQ;
    pub const GT: i32 = _CMP_GT_OQ;
    pub const GE: i32 = _CMP_GE_OQ;
    pub const NE: i32 = _CMP_NEQ_UQ;

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn movemask(lo: __m256, hi: __m256) -> VMask {
        VMask(_mm256_movemask_ps(lo) as u16 | (_mm256_movemask_ps(hi) as u16) << HALF)
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn movemask_epi32(lo: __m256i, hi: __m256i) -> VMask {
        movemask(_mm256_castsi256_ps(lo), _mm256_castsi256_ps(hi))
    }

    /// Expands mask bits into all-ones / all-zeros lanes.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn expand(mask: VMask) -> (__m256i, __m256i) {
        let bits = _mm256_setr_epi32(1, 2, 4, 8, 16, 32, 64, 128);
        let lo = _mm256_and_si256(_mm256_set1_epi32((mask.0 & 0xFF) as i32), bits);
        let hi = _mm256_and_si256(_mm256_set1_epi32((mask.0 >> HALF) as i32), bits);
        (_mm256_cmpeq_epi32(lo, bits), _mm256_cmpeq_epi32(hi, bits))
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn load_epi32(src: &[i32; LANES]) -> (__m256i, __m256i) {
        let ptr = src.as_ptr() as *const __m256i;
        (_mm256_loadu_si256(ptr), _mm256_loadu_si256(ptr.add(1)))
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn store_epi32(lo: __m256i, hi: __m256i) -> [i32; LANES] {
        let mut out = super::VInt::default();
        let ptr = out.0.as_mut_ptr() as *mut __m256i;
        _mm256_storeu_si256(ptr, lo);
        _mm256_storeu_si256(ptr.add(1), hi);
        out.0
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn cmp_ps<const PRED: i32>(a: &[f32; LANES], b: &[f32; LANES]) -> VMask {
        let (a, b) = (a.as_ptr(), b.as_ptr());
        let lo = _mm256_cmp_ps::<PRED>(_mm256_loadu_ps(a), _mm256_loadu_ps(b));
        let hi = _mm256_cmp_ps::<PRED>(_mm256_loadu_ps(a.add(HALF)), _mm256_loadu_ps(b.add(HALF)));
        movemask(lo, hi)
    }

    /// Signed `a > b` after XOR-ing both sides with `bias`.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn cmpgt_epi32(a: &[i32; LANES], b: &[i32; LANES], bias: i32) -> VMask {
        let bias = _mm256_set1_epi32(bias);
        let (a_lo, a_hi) = load_epi32(a);
        let (b_lo, b_hi) = load_epi32(b);
        movemask_epi32(
            _mm256_cmpgt_epi32(_mm256_xor_si256(a_lo, bias), _mm256_xor_si256(b_lo, bias)),
            _mm256_cmpgt_epi32(_mm256_xor_si256(a_hi, bias), _mm256_xor_si256(b_hi, bias)),
        )
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn cmpeq_epi32(a: &[i32; LANES], b: &[i32; LANES]) -> VMask {
        let (a_lo, a_hi) = load_epi32(a);
        let (b_lo, b_hi) = load_epi32(b);
        movemask_epi32(_mm256_cmpeq_epi32(a_lo, b_lo), _mm256_cmpeq_epi32(a_hi, b_hi))
    }

    /// Lanes whose sign bit is set.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn sign_mask(v: &[i32; LANES]) -> VMask {
        let (lo, hi) = load_epi32(v);
        movemask_epi32(lo, hi)
    }

    #[inline]
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn fmadd_ps(a: &[f32; LANES], b: &[f32; LANES], c: &[f32; LANES]) -> [f32; LANES] {
        let mut out = VFloat::default();
        for h in [0, HALF] {
            let r = _mm256_fmadd_ps(
                _mm256_loadu_ps(a.as_ptr().add(h)),
                _mm256_loadu_ps(b.as_ptr().add(h)),
                _mm256_loadu_ps(c.as_ptr().add(h)),
            );
            _mm256_storeu_ps(out.0.as_mut_ptr().add(h), r);
        }
        out.0
    }

    /// `a` where `mask` is set, `b` elsewhere.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn blend(mask: VMask, a: &[i32; LANES], b: &[i32; LANES]) -> [i32; LANES] {
        let (m_lo, m_hi) = expand(mask);
        let (a_lo, a_hi) = load_epi32(a);
        let (b_lo, b_hi) = load_epi32(b);
        store_epi32(_mm256_blendv_epi8(b_lo, a_lo, m_lo), _mm256_blendv_epi8(b_hi, a_hi, m_hi))
    }

    /// Writes the lanes of `src` selected by `mask` to `dst`, which must hold `LANES` elements.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn maskstore(src: *const i32, dst: *mut i32, mask: VMask) {
        let (m_lo, m_hi) = expand(mask);
        let src = src as *const __m256i;
        _mm256_maskstore_epi32(dst, m_lo, _mm256_loadu_si256(src));
        _mm256_maskstore_epi32(dst.add(HALF), m_hi, _mm256_loadu_si256(src.add(1)));
    }

    /// Masked gather; every live lane of `indices` must be in bounds of `base`.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn mask_gather_ps(default: &[f32; LANES], mask: VMask, base: *const f32, indices: &[i32; LANES]) -> [f32; LANES] {
        let (m_lo, m_hi) = expand(mask);
        let (i_lo, i_hi) = load_epi32(indices);
        let src = default.as_ptr();
        let lo = _mm256_mask_i32gather_ps::<4>(_mm256_loadu_ps(src), base, i_lo, _mm256_castsi256_ps(m_lo));
        let hi = _mm256_mask_i32gather_ps::<4>(_mm256_loadu_ps(src.add(HALF)), base, i_hi, _mm256_castsi256_ps(m_hi));
        let mut out = VFloat::default();
        _mm256_storeu_ps(out.0.as_mut_ptr(), lo);
        _mm256_storeu_ps(out.0.as_mut_ptr().add(HALF), hi);
        out.0
    }

    /// Masked gather; every live lane of `indices` must be in bounds of `base`.
    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn mask_gather_epi32(default: &[i32; LANES], mask: VMask, base: *const i32, indices: &[i32; LANES]) -> [i32; LANES] {
        let (m_lo, m_hi) = expand(mask);
        let (i_lo, i_hi) = load_epi32(indices);
        let (d_lo, d_hi) = load_epi32(default);
        store_epi32(
            _mm256_mask_i32gather_epi32::<4>(d_lo, base, i_lo, m_lo),
            _mm256_mask_i32gather_epi32::<4>(d_hi, base, i_hi, m_hi),
        )
    }

    /// Same operation order as the scalar path, so both produce identical bits.
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn transform_point(m: &Mat4, x: &[f32; LANES], y: &[f32; LANES], z: &[f32; LANES]) -> VFloat4 {
        let cols = m.to_cols_array_2d();
        let mut out = VFloat4::default();

        for h in [0, HALF] {
            let px = _mm256_loadu_ps(x.as_ptr().add(h));
            let py = _mm256_loadu_ps(y.as_ptr().add(h));
            let pz = _mm256_loadu_ps(z.as_ptr().add(h));

            for (row, dst) in [&mut out.x, &mut out.y, &mut out.z, &mut out.w].into_iter().enumerate() {
                let r = _mm256_fmadd_ps(
                    px,
                    _mm256_set1_ps(cols[0][row]),
                    _mm256_fmadd_ps(
                        py,
                        _mm256_set1_ps(cols[1][row]),
                        _mm256_fmadd_ps(pz, _mm256_set1_ps(cols[2][row]), _mm256_set1_ps(cols[3][row])),
                    ),
                );
                _mm256_storeu_ps(dst.0.as_mut_ptr().add(h), r);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn mask_lane_iteration_is_ascending() {
        let mask = VMask(0b1000_0000_0010_0101);
        let lanes: Vec<usize> = mask.lanes().collect();
        assert_eq!(lanes, vec![0, 2, 5, 15]);
        assert_eq!(mask.count(), 4);
    }

    #[test]
    fn first_n_saturates() {
        assert_eq!(VMask::first_n(0), VMask::NONE);
        assert_eq!(VMask::first_n(3).0, 0b111);
        assert_eq!(VMask::first_n(16), VMask::ALL);
        assert_eq!(VMask::first_n(100), VMask::ALL);
    }

    #[test]
    fn unsigned_compare_rejects_negative_and_large() {
        let v = VInt::from_fn(|i| i as i32 - 4);
        let mask = v.lt_unsigned(VInt::splat(8));
        for i in 0..LANES {
            let value = i as i32 - 4;
            assert_eq!(mask.test(i), (0..8).contains(&value), "lane {i}");
        }
    }

    #[test]
    fn integer_ops_wrap_instead_of_panicking() {
        let v = VInt::splat(i32::MAX) + 1;
        assert_eq!(v.lane(0), i32::MIN);
        let v = VInt::splat(i32::MAX) * 2;
        assert_eq!(v.lane(3), -2);
    }

    #[test]
    fn arithmetic_shift_sign_extends() {
        let v = VInt::splat(-16) >> 2;
        assert_eq!(v.lane(0), -4);
        assert_eq!(VInt::splat(-16).shr_logical(28).lane(0), 0xF);
    }

    #[test]
    fn masked_gather_skips_dead_lanes() {
        let base = [1.0f32, 2.0, 3.0];
        // Dead lanes point far out of bounds and must not be dereferenced.
        let indices = VInt::from_fn(|i| if i < 3 { i as i32 } else { 1_000_000 });
        let v = VFloat::gather_masked(VFloat::splat(-1.0), VMask::first_n(3), &base, indices);
        assert_eq!(&v.0[..4], &[1.0, 2.0, 3.0, -1.0]);
    }

    #[test]
    fn transform_matches_glam() {
        let m = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0) * Mat4::from_translation(Vec3::new(0.5, -1.0, -3.0));
        let xs = VFloat::from_fn(|i| i as f32 * 0.25);
        let ys = VFloat::from_fn(|i| 1.0 - i as f32 * 0.1);
        let zs = VFloat::from_fn(|i| -(i as f32));
        let out = transform_point(&m, xs, ys, zs);

        for i in 0..LANES {
            let expected = m * Vec4::new(xs[i], ys[i], zs[i], 1.0);
            let actual = Vec4::new(out.x[i], out.y[i], out.z[i], out.w[i]);
            assert!((expected - actual).abs().max_element() < 1e-3, "lane {i}: {expected} vs {actual}");
        }
    }

    #[test]
    fn masked_store_leaves_dead_lanes() {
        let mut dst = [7.0f32; LANES + 2];
        VFloat::splat(1.0).store_masked(&mut dst, VMask(0b1000_0000_0000_0011));
        assert_eq!(&dst[..4], &[1.0, 1.0, 7.0, 7.0]);
        assert_eq!(dst[15], 1.0);
        assert_eq!(dst[16], 7.0);

        let mut colors = [0u32; LANES];
        VInt::splat(-1).store_masked(&mut colors, VMask(0b100));
        assert_eq!(colors.iter().filter(|&&c| c == u32::MAX).count(), 1);
        assert_eq!(colors[2], u32::MAX);
    }

    #[test]
    fn compares_follow_scalar_nan_rules() {
        let nan = VFloat::from_fn(|i| if i % 2 == 0 { f32::NAN } else { i as f32 });
        let ones = VFloat::splat(1.0);
        assert_eq!(nan.cmp_ne(nan), VMask(0x5555));
        assert_eq!(nan.lt(ones) | nan.ge(ones), VMask(0xAAAA));
    }

    #[test]
    #[should_panic]
    fn masked_gather_panics_on_live_out_of_bounds_lane() {
        let base = [1.0f32, 2.0];
        VFloat::gather_masked(VFloat::splat(0.0), VMask(0b1), &base, VInt::splat(2));
    }

    /// The AVX2 paths agree bit-for-bit with the scalar loops.
    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_matches_scalar() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        if !is_x86_feature_detected!("avx2") || !is_x86_feature_detected!("fma") {
            return;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(16);

        for _ in 0..200 {
            let a = VFloat::from_fn(|_| rng.gen_range(-4.0..4.0f32).round() * 0.5);
            let b = VFloat::from_fn(|_| rng.gen_range(-4.0..4.0f32).round() * 0.5);
            let c = VFloat::from_fn(|_| rng.gen_range(-100.0..100.0));
            // Mixed magnitudes with both signs, including small values that collide
            let ia = VInt::from_fn(|_| rng.gen::<i32>() >> rng.gen_range(0..32u32));
            let ib = VInt::from_fn(|_| rng.gen::<i32>() >> rng.gen_range(0..32u32));
            let mask = VMask(rng.gen());

            unsafe {
                assert_eq!(avx2::cmp_ps::<{ avx2::LT }>(&a.0, &b.0), a.cmp(b, |x, y| x < y));
                assert_eq!(avx2::cmp_ps::<{ avx2::GE }>(&a.0, &b.0), a.cmp(b, |x, y| x >= y));
                assert_eq!(avx2::cmp_ps::<{ avx2::NE }>(&a.0, &b.0), a.cmp(b, |x, y| x != y));
                assert_eq!(avx2::cmpgt_epi32(&ia.0, &ib.0, 0), ia.cmp(ib, |x, y| x > y));
                assert_eq!(avx2::cmpgt_epi32(&ib.0, &ia.0, i32::MIN), ia.cmp(ib, |x, y| (x as u32) < (y as u32)));
                assert_eq!(avx2::cmpeq_epi32(&ia.0, &ia.0), VMask::ALL);
                assert_eq!(!avx2::sign_mask(&ia.0), VMask::from_fn(|i| ia.0[i] >= 0));

                let fused = avx2::fmadd_ps(&a.0, &b.0, &c.0);
                assert_eq!(fused, std::array::from_fn(|i| a.0[i].mul_add(b.0[i], c.0[i])));

                let blended = avx2::blend(mask, &ia.0, &ib.0);
                assert_eq!(blended, std::array::from_fn(|i| if mask.test(i) { ia.0[i] } else { ib.0[i] }));

                let base: Vec<u32> = (0..64).map(|_| rng.gen()).collect();
                let indices = VInt::from_fn(|_| rng.gen_range(0..64));
                let gathered = avx2::mask_gather_epi32(&ib.0, mask, base.as_ptr() as *const i32, &indices.0);
                let expected: [i32; LANES] =
                    std::array::from_fn(|i| if mask.test(i) { base[indices.0[i] as usize] as i32 } else { ib.0[i] });
                assert_eq!(gathered, expected);
            }
        }

        let m = Mat4::perspective_rh(1.2, 1.0, 0.1, 50.0) * Mat4::from_rotation_y(0.3);
        let xs = VFloat::from_fn(|i| i as f32 - 8.0);
        let ys = VFloat::from_fn(|i| (i as f32).sin());
        let zs = VFloat::from_fn(|i| -(i as f32) * 0.75);
        let fast = unsafe { avx2::transform_point(&m, &xs.0, &ys.0, &zs.0) };
        assert_eq!(fast, transform_point_scalar(&m, xs, ys, zs));
    }
}
