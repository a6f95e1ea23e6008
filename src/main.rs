use std::net::TcpListener;
use std::process;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::error;

use rust_ofp_l2::{Controller, ControllerArgs, ControllerConfig};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = ControllerConfig::from(ControllerArgs::parse());
    let listener = match TcpListener::bind(config.listen) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Cannot listen on {}: {}", config.listen, e);
            process::exit(1);
        }
    };

    let controller = Arc::new(Controller::new(config));
    if let Err(e) = controller.run(listener) {
        error!("Controller stopped: {}", e);
        process::exit(1);
    }
}
