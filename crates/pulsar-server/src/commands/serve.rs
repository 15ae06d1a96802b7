use crate::app::PulsarApp;
use crate::cli::ServeArgs;
use crate::error::ServerError;
use colored::Colorize;
use pulsar_core::config::AppConfig;
use pulsar_core::model::{JobId, JobStatus};
use pulsar_manager::StateChangeCallback;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn handle_serve(args: ServeArgs, config: AppConfig) -> Result<(), ServerError> {
    let app = PulsarApp::new(config)?;
    for (name, manager) in app.managers() {
        let manager_name = name.to_string();
        let callback: StateChangeCallback = Arc::new(move |job_id: &JobId, status: JobStatus| {
            tracing::info!("Job '{}' of manager '{}' is now {}", job_id, manager_name, status);
        });
        manager.set_state_change_callback(callback);
    }
    app.recover();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| ServerError::Io(std::io::Error::other(e)))?;

    println!(
        "{} serving {} manager(s) from '{}'. Press Ctrl-C to stop.",
        "[OK]".green(),
        app.managers().count(),
        app.config().staging_directory.display()
    );
    while running.load(Ordering::SeqCst) {
        thread::sleep(SIGNAL_POLL_INTERVAL);
    }

    println!("- Shutting down...");
    app.shutdown(Some(Duration::from_secs_f64(args.shutdown_timeout.max(0.0))));
    Ok(())
}
