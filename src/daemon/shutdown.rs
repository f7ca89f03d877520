use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGTERM or SIGINT
///
/// The daemon only looks at the token between cycles, so a command already sent to the
/// cluster is always waited for.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping after this cycle"),
            _ = sigint.recv() => info!("Received SIGINT, stopping after this cycle"),
        }
        token_clone.cancel();
    });

    Ok(token)
}
