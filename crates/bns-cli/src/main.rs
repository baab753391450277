use std::process::ExitCode;

use bns_solver::{
    BuilderKind, BuilderSettings, DofKey, GroundSpring, LinearBar, ModelPart,
    NewtonRaphsonStrategy, PointLoad, SolverError, StepResults, VariableRegistry,
};
use log::{LevelFilter, info};
use nalgebra::DMatrix;
use std::sync::Arc;

const NUM_NODES: usize = 12;
const BAR_STIFFNESS: f64 = 10.0;
const SPRING_STIFFNESS: f64 = 0.5;
const TIP_LOAD: f64 = 1.0;

fn usage() {
    eprintln!("usage: bns-cli solve [<settings.json>]");
}

fn init_logging() -> Result<(), String> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| format!("unable to apply logger configuration ({e})"))
}

/// Clamped bar chain on elastic supports with a load at the free end.
fn demo_model(settings: &BuilderSettings) -> Result<(ModelPart, Vec<DofKey>), SolverError> {
    let registry = Arc::new(VariableRegistry::structural());
    let ux = registry.key("DISPLACEMENT_X")?;
    let mut model = ModelPart::new(registry);

    let mut keys = Vec::with_capacity(NUM_NODES);
    for id in 1..=NUM_NODES {
        model.add_node(id, [id as f64 - 1.0, 0.0, 0.0])?;
        keys.push(model.add_dof(id, ux)?);
        model.add_condition(Box::new(GroundSpring::new(id, id, ux, SPRING_STIFFNESS)));
    }
    for id in 1..NUM_NODES {
        model.add_element(Box::new(LinearBar::new(id, [id, id + 1], ux, BAR_STIFFNESS)));
    }
    model.add_condition(Box::new(PointLoad::new(NUM_NODES + 1, NUM_NODES, ux, TIP_LOAD)));
    model.fix_dof(keys[0])?;

    if settings.builder == BuilderKind::Rom {
        // Monomials of the normalized coordinate, one row per nodal unknown
        let rows = settings.nodal_unknowns.len();
        let length = (NUM_NODES - 1) as f64;
        for id in 1..=NUM_NODES {
            let x = (id as f64 - 1.0) / length;
            let basis = DMatrix::from_fn(rows, settings.number_of_rom_dofs, |_, j| {
                x.powi(j as i32 + 1)
            });
            model.set_reduced_basis(id, basis)?;
        }
    }
    Ok((model, keys))
}

fn print_results(results: &StepResults, model: &ModelPart, keys: &[DofKey]) {
    println!("iterations: {}", results.num_iterations);
    println!("converged_by: {:?}", results.status);
    println!("increment_norm: {:.6e}", results.increment_norm);
    println!("residual_norm: {:.6e}", results.residual_norm);
    for key in keys {
        if let Ok(dof) = model.dof(*key) {
            if dof.fixed {
                println!("node {:>3}: u = {:>12.6e}  reaction = {:>12.6e}", key.node, dof.value, dof.reaction_value);
            } else {
                println!("node {:>3}: u = {:>12.6e}", key.node, dof.value);
            }
        }
    }
}

fn run(settings: &BuilderSettings) -> Result<(), SolverError> {
    let (mut model, keys) = demo_model(settings)?;
    info!(
        "Solving a {}-node bar chain ({} dofs, {} entities) with the {} builder",
        NUM_NODES,
        model.num_dofs_declared(),
        model.entities().count(),
        settings.builder.name()
    );
    let mut strategy = NewtonRaphsonStrategy::from_settings(settings, model.registry())?;
    let results = strategy.solve_solution_step(&mut model)?;
    print_results(&results, &model, &keys);
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 || args[1] != "solve" {
        usage();
        return ExitCode::from(2);
    }

    if let Err(err) = init_logging() {
        eprintln!("{err}");
        return ExitCode::from(1);
    }

    let settings = match args.get(2) {
        Some(path) => match BuilderSettings::from_json_file(path) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("settings error: {err}");
                return ExitCode::from(1);
            }
        },
        None => BuilderSettings::default(),
    };

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("solve error: {err}");
            ExitCode::from(1)
        }
    }
}
