pub mod gb28181;
pub mod hooks;
pub mod janus;
pub mod srt;
pub mod webrtc;

pub use hooks::SessionHooks;

use streambench_protocol::SessionId;
use tokio::sync::watch;

/// Everything one session task needs besides its own protocol config:
/// identity (for dump-file gating) and the root cancellation signal.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub cancel: watch::Receiver<bool>,
}

impl SessionContext {
    pub fn is_canceled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the root context is canceled.
    pub async fn canceled(&mut self) {
        let _ = self.cancel.wait_for(|c| *c).await;
    }
}

/// Case-insensitive extension check, used to dispatch source/dump files to
/// the right elementary-stream reader or dumper (`.ivf` vs `.h264`, etc).
pub fn has_extension(path: &std::path::Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
