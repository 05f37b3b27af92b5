use std::env;
use std::error::Error;

use crate::core::demo::{demo, DemoConfiguration};

mod core;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = env::args().collect::<Vec<_>>();

    let instructions = "pass any of `--input [x]`, `--random` (x drawn from [0, 1)), `--epsilon [ε]`";

    let configuration = match DemoConfiguration::from_arguments(args.get(1..).unwrap_or(&[])) {
        Some(configuration) => configuration,
        None => {
            println!("{}", instructions);
            return Ok(());
        }
    };

    println!("y = (e^(x²))² at x = {}", configuration.input);
    let report = demo(&configuration)?;
    println!("y: {}", report.output);
    println!("dy/dx (backward): {}", report.analytic);
    println!("dy/dx (central difference, ε = {}): {}", configuration.epsilon, report.numerical);
    Ok(())
}
