use futures::{
    FutureExt, Stream, StreamExt,
    future::{BoxFuture, select_all},
    stream,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SignalTo {
    /// Signal to reload config.
    Reload,
    /// Signal to shutdown process.
    Shutdown,
    /// Shutdown process immediately.
    Quit,
}

/// Signals from OS/user.
///
/// Every signal is delivered, not only the first one: a second `SIGTERM` during a graceful
/// shutdown turns it into an immediate one.
pub fn signals() -> std::io::Result<impl Stream<Item = SignalTo>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let set: Vec<BoxFuture<'_, Option<SignalTo>>> = vec![
                Box::pin(sigint.recv().map(|s| s.map(|()| SignalTo::Shutdown))),
                Box::pin(sigterm.recv().map(|s| s.map(|()| SignalTo::Shutdown))),
                Box::pin(sigquit.recv().map(|s| s.map(|()| SignalTo::Quit))),
                Box::pin(sighup.recv().map(|s| s.map(|()| SignalTo::Reload))),
            ];
            let (signal, _, _) = select_all(set).await;
            match signal {
                Some(signal) if tx.send(signal).is_ok() => {}
                _ => break,
            }
        }
    });

    Ok(UnboundedReceiverStream::new(rx))
}

/// Turns configuration file changes into reload requests.
pub fn reloads(rx: mpsc::UnboundedReceiver<()>) -> impl Stream<Item = SignalTo> {
    UnboundedReceiverStream::new(rx).map(|()| SignalTo::Reload)
}

/// A stream that never yields, used when config watching is disabled.
pub fn never() -> impl Stream<Item = SignalTo> {
    stream::pending()
}
