use crate::{concurrency::par_iter_mut1, floating_type_mod::FT, V3};

/// `dst[i] = src[permutation[i]]` for every slot.
pub fn gather<T: Copy + Send + Sync>(dst: &mut [T], src: &[T], permutation: &[u32]) {
    assert_eq!(dst.len(), src.len());
    assert_eq!(dst.len(), permutation.len());
    par_iter_mut1(dst, |i, d| {
        *d = src[permutation[i] as usize];
    });
}

/**
 * Declares a structure-of-arrays particle storage. Every field holds one
 * entry per particle slot (active or not) and all fields always have the
 * same length.
 */
macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        #[derive(Clone)]
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn new(capacity: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..capacity).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }

            pub fn capacity(&self) -> usize {
                let lens = [$(self.$field_name.len()),*];
                debug_assert!(lens.iter().all(|&len| len == lens[0]));
                lens[0]
            }

            /// Reorders every field by the same permutation, reading from `src`.
            pub fn gather_from(&mut self, src: &Self, permutation: &[u32]) {
                $(
                    gather(&mut self.$field_name, &src.$field_name, permutation);
                )*
            }
        }
    }
}

decl_particle_vec! {
    pub struct FluidParticles {
        pub position: Vec<V3> | V3::zeros(),
        pub velocity: Vec<V3> | V3::zeros(),
        pub predicted: Vec<V3> | V3::zeros(),
        pub correction: Vec<V3> | V3::zeros(),
        pub density: Vec<FT> | 0.,
        // constraint factor
        pub lambda: Vec<FT> | 0.,
        pub cell_id: Vec<u32> | 0,
    }
}

decl_particle_vec! {
    pub struct BoidParticles {
        pub position: Vec<V3> | V3::zeros(),
        pub velocity: Vec<V3> | V3::zeros(),
        pub velocity_next: Vec<V3> | V3::zeros(),
        pub acceleration: Vec<V3> | V3::zeros(),
        pub cell_id: Vec<u32> | 0,
    }
}

/// Active slots get `positions[i]` and zero velocity, all other slots are
/// moved to infinity.
pub fn reset_slots(position: &mut [V3], velocity: &mut [V3], init_positions: &[V3]) {
    assert!(init_positions.len() <= position.len());
    par_iter_mut1(position, |i, p| {
        *p = match init_positions.get(i) {
            Some(init) => *init,
            None => V3::from_element(FT::INFINITY),
        };
    });
    par_iter_mut1(velocity, |_, v| {
        *v = V3::zeros();
    });
}

#[test]
fn gather_from_permutes_all_fields_together() {
    let mut src = BoidParticles::new(3);
    for i in 0..3 {
        src.position[i] = V3::from_element(i as FT);
        src.velocity[i] = V3::from_element(10. * i as FT);
        src.cell_id[i] = 100 + i as u32;
    }
    let mut dst = BoidParticles::new(3);
    dst.gather_from(&src, &[2, 0, 1]);

    assert_eq!(dst.cell_id, vec![102, 100, 101]);
    assert_eq!(dst.position[0], V3::from_element(2.));
    assert_eq!(dst.velocity[0], V3::from_element(20.));
    assert_eq!(dst.velocity[2], V3::from_element(10.));
    assert_eq!(dst.capacity(), 3);
}

#[test]
fn reset_slots_moves_inactive_particles_to_infinity() {
    let mut particles = FluidParticles::new(4);
    particles.velocity[1] = V3::from_element(3.);
    let init = [V3::from_element(1.), V3::from_element(-1.)];
    reset_slots(&mut particles.position, &mut particles.velocity, &init);

    assert_eq!(particles.position[1], V3::from_element(-1.));
    assert_eq!(particles.velocity[1], V3::zeros());
    assert!(particles.position[2].x.is_infinite());
    assert!(particles.position[3].z.is_infinite());
}
