use crate::error::ServerError;
use colored::Colorize;
use pulsar_core::config::AppConfig;

pub fn handle_check_config(config: &AppConfig) -> Result<(), ServerError> {
    println!(
        "{} staging directory '{}'",
        "[OK]".green(),
        config.staging_directory.display()
    );
    match &config.persistence_directory {
        Some(directory) => println!("- persistence directory '{}'", directory.display()),
        None => println!(
            "- {}",
            "no persistence directory, active jobs are not recovered after a restart".yellow()
        ),
    }
    for (name, manager) in &config.managers {
        println!(
            "- manager '{}' of type '{}'",
            name.cyan(),
            manager.backend.type_name()
        );
    }
    Ok(())
}
