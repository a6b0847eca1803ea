use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::watch;

/// Shutdown request message sent by the [`Controller`] to subscribed services.
///
/// A handler has to ensure that it doesn't take longer than `timeout` to resolve the future.
/// Ideally, open work is persisted or finished in an orderly manner but no new requests are
/// accepted anymore.
///
/// After the timeout the system will shut down regardless of what the receivers of this message
/// do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

type Channel<T> = (watch::Sender<Option<T>>, watch::Receiver<Option<T>>);

/// Global [`Shutdown`] channel.
static SHUTDOWN: Lazy<Channel<Shutdown>> = Lazy::new(|| watch::channel(None));

/// Notifies a service about an upcoming shutdown.
// TODO: The receiver of this message can not yet signal they have completed shutdown.
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Wait for a shutdown.
    ///
    /// This receives all shutdown signals since the [`Controller`] has been started, even before
    /// this shutdown handle has been obtained.
    ///
    /// # Cancellation
    ///
    /// This method is cancellation safe and can be used in `select!`.
    pub async fn notified(&mut self) -> Shutdown {
        while self.0.changed().await.is_ok() {
            if let Some(shutdown) = &*self.0.borrow() {
                return shutdown.clone();
            }
        }

        Shutdown { timeout: None }
    }
}

/// Service to start and gracefully stop the system runtime.
///
/// This service offers a static API to wait for a shutdown signal or manually initiate the system
/// shutdown. It is started with [`Controller::start`] and subscribed to with
/// [`Controller::shutdown_handle`].
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use relay_system::Controller;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// Controller::start(Duration::from_millis(10));
/// let mut shutdown = Controller::shutdown_handle();
///
/// // Normally, a service would listen for this in its main loop.
/// Controller::shutdown(Some(Duration::from_millis(10)));
/// assert_eq!(shutdown.notified().await.timeout, Some(Duration::from_millis(10)));
/// # });
/// ```
#[derive(Debug)]
pub struct Controller;

impl Controller {
    /// Starts a controller that monitors shutdown signals.
    ///
    /// `SIGINT` and `SIGQUIT` trigger an immediate shutdown. `SIGTERM` triggers a graceful
    /// shutdown with the given timeout.
    pub fn start(shutdown_timeout: Duration) {
        tokio::spawn(monitor_shutdown(shutdown_timeout));
    }

    /// Returns a [`ShutdownHandle`] that resolves once the system shuts down.
    pub fn shutdown_handle() -> ShutdownHandle {
        ShutdownHandle(SHUTDOWN.1.clone())
    }

    /// Manually initiates the shutdown process of the system.
    pub fn shutdown(timeout: Option<Duration>) {
        let (ref tx, _) = *SHUTDOWN;
        tx.send(Some(Shutdown { timeout })).ok();
    }
}

#[cfg(unix)]
async fn monitor_shutdown(timeout: Duration) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_term = signal(SignalKind::terminate())?;

    let timeout = tokio::select! {
        biased;

        Some(()) = sig_int.recv() => {
            relay_log::info!("SIGINT received, exiting");
            None
        }
        Some(()) = sig_quit.recv() => {
            relay_log::info!("SIGQUIT received, exiting");
            None
        }
        Some(()) = sig_term.recv() => {
            relay_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
            Some(timeout)
        }

        else => return Ok(()),
    };

    Controller::shutdown(timeout);
    Ok(())
}

#[cfg(windows)]
async fn monitor_shutdown(_timeout: Duration) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    relay_log::info!("CTRL-C received, exiting");
    Controller::shutdown(None);
    Ok(())
}
