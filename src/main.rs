// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use std::env;
use std::process;

use fanctl::beckhoff::EL4001;
use fanctl::sim::{SimBus, SimInterface, SimSlave};
use fanctl::ControllerBuilder;

const USAGE: &str = "\
usage: fanctl [options]

    --bind ADDR     control server address (default 127.0.0.1:5020)
    --log PATH      command log file (default logs/commands.csv)
    -v, --debug     debug logging
    -h, --help      this help
";

fn main() {
    let mut bind = "127.0.0.1:5020".to_string();
    let mut log_path = "logs/commands.csv".to_string();
    let mut debug = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => match args.next() {
                Some(v) => bind = v,
                None => {
                    eprintln!("--bind needs an argument");
                    process::exit(2);
                }
            },
            "--log" => match args.next() {
                Some(v) => log_path = v,
                None => {
                    eprintln!("--log needs an argument");
                    process::exit(2);
                }
            },
            "-v" | "--debug" => debug = true,
            "-h" | "--help" => {
                print!("{}", USAGE);
                return;
            }
            other => {
                eprintln!("unknown argument {:?}\n{}", other, USAGE);
                process::exit(2);
            }
        }
    }

    // Simulated rig until a hardware driver is plugged in: one adapter
    // without the output terminal, one wired to it, so bring-up has to
    // walk past the first candidate.
    let bus = SimBus::new()
        .interface(SimInterface::new("wlp3s0"))
        .interface(
            SimInterface::new("enp2s0")
                .with_slave(SimSlave::new(EL4001, "EL4001 1Ch. Ana. Output 0-10V")),
        );

    let controller = ControllerBuilder::new("fanctl")
        .bind_addr(bind)
        .command_log(log_path)
        .logging_cfg(None, debug)
        .build(Box::new(bus))
        .unwrap_or_else(|e| {
            eprintln!("startup failed: {}", e);
            process::exit(1);
        });
    controller.run();
}
