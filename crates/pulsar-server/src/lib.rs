pub mod app;
pub mod cli;
mod commands;
pub mod endpoint;
pub mod error;
pub mod local_client;
pub mod messaging;

use cli::{Cli, Commands};
use error::ServerError;
use pulsar_core::config::load_config;
use pulsar_core::logging::{self, LogLevel};

pub use app::PulsarApp;
pub use local_client::LocalJobClient;
pub use messaging::{bind_manager_to_queue, InMemoryExchange, MessageExchange, QueueBinding};

pub fn run(cli: Cli) -> Result<(), ServerError> {
    let interactive = !matches!(cli.command, Commands::Serve(_));
    if interactive {
        logging::set_log_level(LogLevel::Warn);
    }
    logging::set_log_level_from_env();
    if cli.verbose > 0 {
        logging::set_log_level(LogLevel::from(cli.verbose.saturating_add(2)));
    }

    if interactive {
        logging::init_stderr_logger();
    }
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let log_path = logging::init_server_logger(&config.logging)?;
            println!("- Logging to '{}'", log_path.display());
            commands::serve::handle_serve(args, config)
        }
        Commands::Submit(args) => commands::submit::handle_submit(args, config),
        Commands::CheckConfig => commands::check_config::handle_check_config(&config),
    }
}
