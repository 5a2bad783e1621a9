//! The SIP dialog state machine, modeled as an explicit tagged enum with
//! an event-driven transition function rather than an integer enum with
//! ad-hoc guards. Modeled on `dialog-core/src/dialog/dialog_state.rs`'s
//! shape.

use tracing::debug;

/// The seven states of the registration/invite/bye lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Init,
    Registered,
    Inviting,
    Trying,
    Stable,
    ReInviting,
    Bye,
}

/// Events that can drive the dialog state machine. Distinguished from raw
/// [`crate::message::Message`]s so the state machine stays independent of
/// the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogEvent {
    /// REGISTER observed, carrying its Expires value.
    Register { expires: u32 },
    /// MESSAGE observed (heartbeat).
    Message,
    /// We are about to send an INVITE.
    InviteSent,
    /// 100 Trying received in reply to our INVITE.
    Trying,
    /// 200 OK received in reply to our INVITE.
    InviteOk,
    /// 200 OK received in reply to our BYE.
    ByeOk,
    /// BYE received from the device.
    Bye,
}

impl DialogState {
    /// Apply one event, returning the resulting state. Unmodeled
    /// (state, event) pairs are a no-op: the dialog stays put and the
    /// caller's supervisor logs it at `debug`. Only transitions that
    /// change state are listed; every other combination is ignored,
    /// matching the device's tolerance for duplicate/out-of-order
    /// heartbeats.
    pub fn apply(self, event: DialogEvent) -> DialogState {
        use DialogEvent::*;
        use DialogState::*;

        let next = match (self, event) {
            (Init, Register { expires }) if expires > 0 => Registered,
            (Init, Register { expires: 0 }) => Bye,
            (Init, Message) => Stable,

            (Registered, InviteSent) => Inviting,

            (Inviting, Trying) => Trying,
            (Inviting, InviteOk) => Stable,
            (Inviting, Register { expires }) if expires > 0 => Inviting,

            (Trying, InviteOk) => Stable,

            (Stable, Register { expires: 0 }) => Bye,
            (Stable, Bye) => Bye,

            (ReInviting, ByeOk) => Inviting,

            (state, _) => state,
        };

        if next != self {
            debug!(from = ?self, to = ?next, ?event, "sip dialog transition");
        }
        next
    }

    /// Used by the session controller's media-loss recovery path: drop
    /// straight back to `Registered` without a BYE/200 round trip, so the
    /// next session tick re-issues an INVITE from `Init`.
    pub fn force_registered() -> DialogState {
        DialogState::Registered
    }

    /// Enter the explicit re-invite-via-BYE path: the owning connection is
    /// about to send a BYE to reset a stuck dialog.
    pub fn begin_reinvite(self) -> DialogState {
        debug!(from = ?self, to = ?DialogState::ReInviting, "sip dialog entering re-invite via BYE");
        DialogState::ReInviting
    }

    pub fn is_registered_or_later(self) -> bool {
        !matches!(self, DialogState::Init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DialogEvent::*;
    use DialogState::*;

    #[test]
    fn register_handshake() {
        let s = Init.apply(Register { expires: 3600 });
        assert_eq!(s, Registered);
    }

    #[test]
    fn register_with_zero_expires_is_bye() {
        assert_eq!(Init.apply(Register { expires: 0 }), Bye);
        assert_eq!(Stable.apply(Register { expires: 0 }), Bye);
    }

    #[test]
    fn invite_lifecycle_through_trying() {
        let s = Registered.apply(InviteSent);
        assert_eq!(s, Inviting);
        let s = s.apply(Trying);
        assert_eq!(s, Trying);
        let s = s.apply(InviteOk);
        assert_eq!(s, Stable);
    }

    #[test]
    fn invite_ok_without_trying_still_reaches_stable() {
        // Trying is optional; lenient devices skip straight to the 200 OK.
        let s = Registered.apply(InviteSent).apply(InviteOk);
        assert_eq!(s, Stable);
    }

    #[test]
    fn bye_from_device_in_stable() {
        assert_eq!(Stable.apply(Bye), Bye);
    }

    #[test]
    fn reinvite_via_bye_returns_to_inviting() {
        let s = Stable.begin_reinvite();
        assert_eq!(s, ReInviting);
        assert_eq!(s.apply(ByeOk), Inviting);
    }

    #[test]
    fn register_while_inviting_reissues_and_stays() {
        let s = Inviting.apply(Register { expires: 3600 });
        assert_eq!(s, Inviting);
    }
}
