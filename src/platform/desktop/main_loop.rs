use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, error, info};

use crate::{
    floating_type_mod::FT,
    frame_clock::FrameClock,
    init_simulation,
    simulation_parameters::{InitialLayout, ModelType, SimulationParams},
    sph_kernels::SmoothingKernels,
    ParticleModel,
};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

pub fn start() {
    let matches = App::new("Grid Particles")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite config"),
                )
                .arg(
                    Arg::with_name("MAX_STEPS")
                        .long("max-steps")
                        .short("n")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given number of steps"),
                )
                .arg(
                    Arg::with_name("FIXED_TIME_STEP")
                        .long("fixed-time-step")
                        .short("t")
                        .required(false)
                        .takes_value(true)
                        .help("Use this time step instead of the wall clock (1.0 is one frame)"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("default-config")
                .about("Print the default simulation parameters as YAML or write them to a file")
                .arg(
                    Arg::with_name("OUTPUT_YAML")
                        .help("YAML file where the parameters are written to")
                        .takes_value(true)
                        .required(false),
                ),
        )
        .get_matches();

    init_logger(matches.occurrences_of("v"));

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run(run_matches)
    } else if let Some(subcmd_matches) = matches.subcommand_matches("default-config") {
        write_default_config(subcmd_matches.value_of("OUTPUT_YAML"))
    } else {
        unreachable!()
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logger(verbosity: u64) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// Parses the parameter file and replaces its top-level keys with the ones
/// from the overwrite file.
pub fn parse_simulation_params(params_yaml: &str, overwrite_yaml: Option<&str>) -> Result<SimulationParams, String> {
    let mut simulation_params_serde: serde_yaml::Value =
        serde_yaml::from_str(params_yaml).map_err(|e| format!("failed parsing simulation config file: {}", e))?;

    if let Some(overwrite_config_str) = overwrite_yaml {
        let overwrite_config_file: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(overwrite_config_str)
            .map_err(|e| format!("failed parsing overwrite config file: {}", e))?;
        let mapping = simulation_params_serde
            .as_mapping_mut()
            .ok_or_else(|| "cannot get parsed simulation parameters as mapping".to_string())?;
        for (k, v) in overwrite_config_file.into_iter() {
            debug!("overwrite parameter {}", k);
            mapping.insert(serde_yaml::Value::String(k), v);
        }
    }

    serde_yaml::from_value(simulation_params_serde).map_err(|e| format!("failed to unpack SimulationParams: {}", e))
}

fn read_file(path: &str) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("failed reading file `{}`: {}", path, e))
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, String> {
    match matches.value_of(name) {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid value `{}` for {}", s, name)),
        None => Ok(None),
    }
}

fn run(run_matches: &ArgMatches) -> Result<(), String> {
    let parameter_file = run_matches
        .value_of("SIMULATION_CONFIG")
        .ok_or_else(|| "missing simulation config".to_string())?;
    let params_yaml = read_file(parameter_file)?;
    let overwrite_yaml = match run_matches.value_of("OVERWRITE_CONFIG_FILE") {
        Some(path) => Some(read_file(path)?),
        None => None,
    };

    let simulation_params = parse_simulation_params(&params_yaml, overwrite_yaml.as_deref())?;
    simulation_params
        .validate()
        .map_err(|e| format!("invalid simulation parameters: {}", e))?;
    debug!("{:?}", simulation_params);

    if let (ModelType::Fluids, InitialLayout::Block { spacing, .. }) =
        (simulation_params.model, simulation_params.initial_layout)
    {
        info!(
            "lattice density for block spacing {}: {} (rest density {})",
            spacing,
            SmoothingKernels::new(simulation_params.effect_radius).lattice_density(spacing),
            simulation_params.rest_density
        );
    }

    let max_steps: Option<usize> = parse_arg(run_matches, "MAX_STEPS")?;
    let fixed_time_step: Option<FT> = parse_arg(run_matches, "FIXED_TIME_STEP")?;
    let counters_enabled = run_matches.is_present("STATISTICS_ENABLED");
    let statistics_path_opt = run_matches.value_of("STATISTICS_PATH");

    let mut simulation = init_simulation(simulation_params, counters_enabled).map_err(|e| e.to_string())?;
    let mut clock = FrameClock::new(&simulation_params);

    let mut total_duration: Duration = Duration::from_nanos(0);
    let mut frame_number = 0;

    while max_steps.map_or(true, |max_steps| frame_number < max_steps) {
        let dt = match fixed_time_step {
            Some(dt) => dt,
            None => clock.tick(),
        };

        let a = Instant::now();
        simulation.step(dt);
        let b = Instant::now();

        total_duration += b - a;
        frame_number += 1;

        info!(
            "{:05}: {} particles dt {:.3} {:.3}msec ({:.3}msec AVG)",
            frame_number,
            simulation.num_particles(),
            dt,
            (b - a).as_secs_f64() * 1000.,
            total_duration.as_secs_f64() * 1000. / frame_number as f64,
        );
    }

    if counters_enabled {
        let s = simulation
            .statistics()
            .map_err(|e| format!("failed writing statistics: {}", e))?;
        print!("{}", s);
        if let Some(statistics_path) = statistics_path_opt {
            std::fs::write(statistics_path, s)
                .map_err(|e| format!("failed writing statistics to `{}`: {}", statistics_path, e))?;
        }
    }

    Ok(())
}

fn write_default_config(output_path: Option<&str>) -> Result<(), String> {
    let yaml = serde_yaml::to_string(&SimulationParams::default())
        .map_err(|e| format!("failed serializing parameters: {}", e))?;
    match output_path {
        Some(path) => {
            info!("Writing to file `{}`...", path);
            std::fs::write(path, yaml).map_err(|e| format!("failed writing `{}`: {}", path, e))
        }
        None => {
            print!("{}", yaml);
            Ok(())
        }
    }
}

#[test]
fn overwrite_file_replaces_and_adds_keys() {
    let params_yaml = "model: Boids\nwall_position: 8.0\ngrid_resolution: 8\n";
    let overwrite_yaml = "grid_resolution: 4\nnum_particles: 12\n";
    let params = parse_simulation_params(params_yaml, Some(overwrite_yaml)).unwrap();
    assert_eq!(params.model, ModelType::Boids);
    assert_eq!(params.wall_position, 8.);
    assert_eq!(params.grid_resolution, 4);
    assert_eq!(params.num_particles, 12);
}

#[test]
fn default_config_parses_back() {
    let yaml = serde_yaml::to_string(&SimulationParams::default()).unwrap();
    let params = parse_simulation_params(&yaml, None).unwrap();
    assert_eq!(params.validate(), Ok(()));
    assert_eq!(params.max_parts_in_cell, SimulationParams::default().max_parts_in_cell);
}

#[test]
fn malformed_config_is_an_error() {
    assert!(parse_simulation_params("model: [", None).is_err());
    assert!(parse_simulation_params("model: Boids\n", Some("- 1\n- 2\n")).is_err());
}
