use gumdrop::Options;

use crate_node::cli::Args;
use crate_node::config::Config;

fn main() {
    let args = Args::parse_args_default_or_exit();

    if args.help {
        println!("{}", Args::usage());
        std::process::exit(0);
    }

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = crate_node::logging::init(&config.datadir, "info") {
        eprintln!("failed to open debug.log: {}", error);
        std::process::exit(3);
    }

    match futures::executor::block_on(crate_node::run(config)) {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            tracing::error!(%error, "node exited with an error");
            std::process::exit(crate_node::exit_code(&error));
        }
    }
}
