fn main() {
    grid_particles::start();
}
