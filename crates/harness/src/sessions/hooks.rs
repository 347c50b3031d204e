//! Optional test hooks (Design Notes §9, "Callback hooks"): callable
//! closures invoked at precise points in a session's protocol state
//! machine, so a conformance test can assert or cancel at an exact phase
//! without reimplementing the session. Each hook runs on the same task as
//! the event it instruments, so a hook that calls the session's own cancel
//! path takes effect deterministically rather than racing the next step.
//!
//! Every field is optional and every protocol ignores the hooks it has no
//! corresponding phase for, so one `SessionHooks` value can be shared
//! across a run that mixes SFU dialects.

use std::sync::Arc;

pub type OnOfferHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnAnswerHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type IceReadyHook = Arc<dyn Fn() + Send + Sync>;
pub type OnRegisterDoneHook = Arc<dyn Fn() + Send + Sync>;
pub type OnInviteRequestHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type OnMessageHeartbeatHook = Arc<dyn Fn() + Send + Sync>;
pub type OnSendPacketHook = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type OnWebrtcUpHook = Arc<dyn Fn() + Send + Sync>;
pub type OnMediaHook = Arc<dyn Fn(bool, bool) + Send + Sync>;

/// `onOffer`/`onAnswer`/`iceReady` fire from the WebRTC session (§4.6);
/// `onRegisterDone`/`onInviteRequest`/`onMessageHeartbeat`/`onSendPacket`
/// from the GB28181 SIP session (§4.7); `onWebrtcUp`/`onMedia` from the
/// Janus long-poll client's event dispatcher (§4.8).
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub on_offer: Option<OnOfferHook>,
    pub on_answer: Option<OnAnswerHook>,
    pub ice_ready: Option<IceReadyHook>,
    pub on_register_done: Option<OnRegisterDoneHook>,
    pub on_invite_request: Option<OnInviteRequestHook>,
    pub on_message_heartbeat: Option<OnMessageHeartbeatHook>,
    pub on_send_packet: Option<OnSendPacketHook>,
    pub on_webrtc_up: Option<OnWebrtcUpHook>,
    pub on_media: Option<OnMediaHook>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fires_the_hook_it_sets_and_leaves_others_unset() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let hooks = SessionHooks {
            ice_ready: Some(Arc::new(move || fired_clone.store(true, Ordering::SeqCst))),
            ..Default::default()
        };
        assert!(hooks.on_offer.is_none());
        (hooks.ice_ready.unwrap())();
        assert!(fired.load(Ordering::SeqCst));
    }
}
