use crate::{
    floating_type_mod::{FT, PI},
    V3,
};

/// Squared displacements below this value are treated as "same position".
/// Kernel gradients and normalizations return zero instead of dividing by it.
pub const DISPLACEMENT_EPSILON_SQ: FT = 1.0e-10;

/**
 * Smoothing kernels with a fixed support radius `h`.
 *
 * The normalization constants depend only on `h` and are computed once per
 * run, so every kernel evaluation is a handful of multiplications.
 */
#[derive(Debug, Clone, Copy)]
pub struct SmoothingKernels {
    h: FT,
    h2: FT,
    poly6_norm: FT,
    spiky_norm: FT,
    spiky_grad_norm: FT,
}

impl SmoothingKernels {
    pub fn new(h: FT) -> Self {
        assert!(h > 0., "kernel support radius must be positive (got {})", h);
        let h3 = h * h * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;
        SmoothingKernels {
            h,
            h2: h * h,
            poly6_norm: 315. / (64. * PI * h9),
            spiky_norm: 15. / (PI * h6),
            spiky_grad_norm: -45. / (PI * h6),
        }
    }

    /**
     * Density kernel. `r2` is the squared distance between two particles.
     * Zero for `r2 >= h^2`.
     */
    #[inline(always)]
    pub fn poly6(&self, r2: FT) -> FT {
        if r2 >= 0. && r2 < self.h2 {
            let v = self.h2 - r2;
            self.poly6_norm * v * v * v
        } else {
            0.
        }
    }

    /** Spiky kernel value at distance `r`. Its gradient is [`Self::grad_spiky`]. */
    #[inline(always)]
    pub fn spiky(&self, r: FT) -> FT {
        if r >= 0. && r < self.h {
            let v = self.h - r;
            self.spiky_norm * v * v * v
        } else {
            0.
        }
    }

    /**
     * Gradient of the spiky kernel with respect to `x_i` where `diff = x_i - x_j`.
     *
     * Zero outside the support and for (near) coincident particles, so a
     * particle never contributes a direction to itself.
     */
    #[inline(always)]
    pub fn grad_spiky(&self, diff: V3) -> V3 {
        let r2 = diff.norm_squared();
        if r2 < DISPLACEMENT_EPSILON_SQ || r2 >= self.h2 {
            return V3::zeros();
        }
        let r = r2.sqrt();
        let v = self.h - r;
        diff * (self.spiky_grad_norm * v * v / r)
    }

    /**
     * Density of an interior particle of an infinite cubic lattice with the
     * given spacing (unit particle mass). Useful for choosing a rest density
     * that matches an initial block of particles.
     */
    pub fn lattice_density(&self, spacing: FT) -> FT {
        assert!(spacing > 0.);
        let reach = FT::ceil(self.h / spacing) as i32;
        let mut density = 0.;
        for z in -reach..=reach {
            for y in -reach..=reach {
                for x in -reach..=reach {
                    let offset = V3::new(x as FT, y as FT, z as FT) * spacing;
                    density += self.poly6(offset.norm_squared());
                }
            }
        }
        density
    }
}

#[test]
fn poly6_integrates_to_one() {
    let h = 1.5;
    let kernels = SmoothingKernels::new(h);
    let grid_size = 60;
    let cube_len = 2. * h / grid_size as FT;
    let cube_volume = cube_len * cube_len * cube_len;

    let mut integral = 0.;
    for z in 0..grid_size {
        for y in 0..grid_size {
            for x in 0..grid_size {
                let p = V3::new(
                    (x as FT + 0.5) * cube_len - h,
                    (y as FT + 0.5) * cube_len - h,
                    (z as FT + 0.5) * cube_len - h,
                );
                integral += kernels.poly6(p.norm_squared()) * cube_volume;
            }
        }
    }

    println!("Integration of poly6 kernel with h={:.2}: {}", h, integral);
    crate::assert_ft_approx_eq(integral, 1., 0.01, || "poly6 integral".to_string());
}

#[test]
fn poly6_vanishes_outside_support() {
    let kernels = SmoothingKernels::new(2.);
    assert_eq!(kernels.poly6(4.), 0.);
    assert_eq!(kernels.poly6(4.5), 0.);
    assert!(kernels.poly6(3.99) > 0.);
    assert!(kernels.poly6(0.) > kernels.poly6(1.));
}

#[test]
fn grad_spiky_is_zero_at_origin_and_outside_support() {
    for h in [0.1, 1., 2.5, 10.] {
        let kernels = SmoothingKernels::new(h);
        assert_eq!(kernels.grad_spiky(V3::zeros()), V3::zeros());
        assert_eq!(kernels.grad_spiky(V3::new(h, 0., 0.)), V3::zeros());
        assert_eq!(kernels.grad_spiky(V3::new(0., 0., -2. * h)), V3::zeros());
    }
}

#[test]
fn grad_spiky_matches_finite_differences() {
    let h = 1.;
    let kernels = SmoothingKernels::new(h);
    let diff = 2.0e-3;
    let diff_half = diff * 0.5;
    let test_grid_size = 16;
    let probe_offset = 2. * h / test_grid_size as FT;

    for z in 0..test_grid_size {
        for y in 0..test_grid_size {
            for x in 0..test_grid_size {
                let p = V3::new(
                    (x as FT + 0.5) * probe_offset - h,
                    (y as FT + 0.5) * probe_offset - h,
                    (z as FT + 0.5) * probe_offset - h,
                );
                if p.norm() < 0.25 * h {
                    continue;
                }

                let analytical = kernels.grad_spiky(p);
                let mut approx = V3::zeros();
                for d in 0..3 {
                    let mut step = V3::zeros();
                    step[d] = diff_half;
                    approx[d] = (kernels.spiky((p + step).norm()) - kernels.spiky((p - step).norm())) / diff;
                }

                let error = analytical - approx;
                assert!(
                    error.norm() < 5.0e-3,
                    "at {:?}: analytical={:?} approx={:?}",
                    p,
                    analytical,
                    approx
                );
            }
        }
    }
}

#[test]
fn grad_spiky_points_from_i_towards_j() {
    let kernels = SmoothingKernels::new(1.);
    let g = kernels.grad_spiky(V3::new(0.5, 0., 0.));
    assert!(g.x < 0.);
    assert_eq!(g.y, 0.);
    assert_eq!(g.z, 0.);
}

#[test]
fn lattice_density_sums_all_lattice_neighbors() {
    let kernels = SmoothingKernels::new(1.);
    // spacing larger than the support: only the particle itself contributes
    crate::assert_ft_approx_eq(kernels.lattice_density(1.5), kernels.poly6(0.), 1.0e-6, || {
        "isolated lattice density".to_string()
    });
    assert!(kernels.lattice_density(0.5) > kernels.poly6(0.));
}
