use tokio::signal;
use tracing::info;

use super::CliContext;
use feedflow::app::{App, AppError};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

pub async fn execute(context: &CliContext) -> Result<(), AppError> {
    info!(config = %context.config_path.display(), "feedflow starting");
    let app = App::bootstrap(context.app.clone(), &context.registry).await?;

    info!("feedflow running; press Ctrl-C to exit");
    shutdown_signal().await;

    info!("feedflow shutting down");
    app.shutdown().await;
    Ok(())
}
