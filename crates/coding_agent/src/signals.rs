//! Ctrl-C handling: SIGINT/SIGTERM set the conversation's cancel flag.

use std::io;
use std::thread::JoinHandle;

use crate::provider::CancelSignal;

/// Keeps the signal listener alive; dropping it unregisters the handlers.
pub struct CancelOnSignal {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
pub fn cancel_on_signal(cancel: CancelSignal) -> io::Result<CancelOnSignal> {
    use std::sync::atomic::Ordering;
    use std::thread;

    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use tracing::info;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("coding-agent-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!(signal, "cancelling conversation");
                cancel.store(true, Ordering::SeqCst);
            }
        })?;

    Ok(CancelOnSignal {
        handle,
        thread: Some(thread),
    })
}

#[cfg(not(unix))]
pub fn cancel_on_signal(_cancel: CancelSignal) -> io::Result<CancelOnSignal> {
    Ok(CancelOnSignal { thread: None })
}

impl Drop for CancelOnSignal {
    fn drop(&mut self) {
        #[cfg(unix)]
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
