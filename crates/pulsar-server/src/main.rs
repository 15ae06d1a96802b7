use clap::Parser;
use colored::Colorize;
use pulsar_server::cli::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = pulsar_server::run(cli) {
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(1);
    }
}
