/*!
Grid-accelerated particle simulations: position based fluids and boids
flocking on a shared uniform grid with a stable counting sort by cell.

The binary in `main.rs` is a headless driver around [`start`].
*/

mod platform;
pub mod simulation;

pub use simulation::*;

pub use platform::start;
