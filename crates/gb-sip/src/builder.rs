//! Fluent constructors for the handful of messages this gateway ever
//! emits: REGISTER-200, MESSAGE-200/403, INVITE, ACK, BYE-200. Modeled
//! on `sip-core/src/builder/request.rs`'s `SimpleRequestBuilder` shape.

use rand::Rng;

use crate::message::{Message, StartLine};
use crate::types::{Addr, CSeq, Contact, Method, Transport, Via, BRANCH_MAGIC};

const BRANCH_RAND_LEN: usize = 6;
const TAG_LEN: usize = 8;
const CALL_ID_LEN: usize = 16;

fn rand_alnum(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

/// A fresh branch parameter: the RFC 3261 magic cookie plus six random
/// alphanumerics.
pub fn gen_branch() -> String {
    format!("{BRANCH_MAGIC}{}", rand_alnum(BRANCH_RAND_LEN))
}

pub fn gen_tag() -> String {
    rand_alnum(TAG_LEN)
}

pub fn gen_call_id() -> String {
    rand_alnum(CALL_ID_LEN)
}

/// A CSeq starting number below 1000.
pub fn gen_cseq_number() -> u32 {
    rand::thread_rng().gen_range(1..1000)
}

/// Build the 200 OK response to a REGISTER: echoes Via/From/To/CSeq/
/// Call-ID/Contact/Expires, adds our Server identity as User-Agent, no
/// body. Generated identically whether the REGISTER drives
/// `Init -> Registered` or refreshes an existing registration.
pub fn register_ok(req: &Message, user_agent: &str) -> Message {
    Message {
        start: StartLine::Response { status: 200, reason: "OK".to_string() },
        via: req.via.clone(),
        from: req.from.clone(),
        to: req.to.clone().with_tag(gen_tag()),
        call_id: req.call_id.clone(),
        cseq: req.cseq,
        contact: req.contact.clone(),
        expires: req.expires,
        max_forwards: None,
        content_type: None,
        subject: None,
        user_agent: Some(user_agent.to_string()),
        body: String::new(),
    }
}

/// 200 OK acknowledging a MESSAGE heartbeat.
pub fn message_ok(req: &Message, user_agent: &str) -> Message {
    simple_response(req, 200, "OK", user_agent)
}

/// 403 Forbidden: a MESSAGE arrived before the dialog reached `Init`'s
/// successor state.
pub fn message_forbidden(req: &Message, user_agent: &str) -> Message {
    simple_response(req, 403, "Forbidden", user_agent)
}

/// 200 OK to a BYE.
pub fn bye_ok(req: &Message, user_agent: &str) -> Message {
    simple_response(req, 200, "OK", user_agent)
}

fn simple_response(req: &Message, status: u16, reason: &str, user_agent: &str) -> Message {
    Message {
        start: StartLine::Response { status, reason: reason.to_string() },
        via: req.via.clone(),
        from: req.from.clone(),
        to: req.to.clone().with_tag(gen_tag()),
        call_id: req.call_id.clone(),
        cseq: req.cseq,
        contact: None,
        expires: None,
        max_forwards: None,
        content_type: None,
        subject: None,
        user_agent: Some(user_agent.to_string()),
        body: String::new(),
    }
}

/// Build the ACK that must follow a 200 OK to our INVITE.
///
/// `our_candidate`/`our_sip_port` supply the new Via sent-by; the request
/// URI is `sip:<to-user>@<to-host>` taken from the 200's To header.
pub fn ack_for_invite_ok(ok: &Message, our_candidate: &str, our_sip_port: u16) -> Message {
    let request_uri = format!("sip:{}@{}", ok.to.user, ok.to.host);
    let via = Via::new(Transport::Tcp, our_candidate.to_string(), Some(our_sip_port), gen_branch());
    Message {
        start: StartLine::Request { method: Method::Ack, request_uri },
        via,
        from: ok.from.clone(),
        to: ok.to.clone(),
        call_id: ok.call_id.clone(),
        cseq: CSeq { number: ok.cseq.number, method: Method::Ack },
        contact: None,
        expires: None,
        max_forwards: Some(70),
        content_type: None,
        subject: None,
        user_agent: None,
        body: String::new(),
    }
}

/// Build the INVITE that offers a media session to the device.
/// `sdp_body` is produced by [`crate::sdp::encode_offer`].
#[allow(clippy::too_many_arguments)]
pub fn invite(
    from_user: &str,
    from_host: &str,
    to_user: &str,
    to_host: &str,
    our_candidate: &str,
    our_sip_port: u16,
    ssrc_decimal: &str,
    sdp_body: String,
) -> Message {
    let request_uri = format!("sip:{from_user}@{from_host}");
    let via = Via::new(Transport::Tcp, our_candidate.to_string(), Some(our_sip_port), gen_branch());
    let from = Addr::new(to_user.to_string(), to_host.to_string()).with_tag(gen_tag());
    let to = Addr::new(from_user.to_string(), from_host.to_string());
    Message {
        start: StartLine::Request { method: Method::Invite, request_uri },
        via,
        from,
        to,
        call_id: gen_call_id(),
        cseq: CSeq { number: gen_cseq_number(), method: Method::Invite },
        contact: Some(Contact { user: to_user.to_string(), host: our_candidate.to_string(), port: Some(our_sip_port) }),
        expires: None,
        max_forwards: Some(70),
        content_type: Some("Application/SDP".to_string()),
        subject: Some(format!("{from_user}:{ssrc_decimal},{to_user}:0")),
        user_agent: None,
        body: sdp_body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn sample_register() -> Message {
        let h = [
            ("Via".to_string(), "SIP/2.0/TCP 3402000000:5060;branch=z9hG4bK1234567".to_string()),
            ("From".to_string(), "<sip:34020000001320000001@3402000000>;tag=307202390".to_string()),
            ("To".to_string(), "<sip:34020000001320000001@3402000000>".to_string()),
            ("Call-ID".to_string(), "123456789".to_string()),
            ("CSeq".to_string(), "1 REGISTER".to_string()),
            ("Contact".to_string(), "<sip:34020000001320000001@3402000000:5060>".to_string()),
            ("Expires".to_string(), "3600".to_string()),
        ];
        parser::parse("REGISTER sip:3402000000 SIP/2.0", &h, String::new()).unwrap()
    }

    #[test]
    fn register_ok_echoes_fields() {
        let req = sample_register();
        let resp = register_ok(&req, "gb-gateway/0.1");
        assert_eq!(resp.status(), Some(200));
        assert_eq!(resp.call_id, req.call_id);
        assert_eq!(resp.cseq, req.cseq);
        assert_eq!(resp.expires, Some(3600));
        assert_eq!(resp.user_agent.as_deref(), Some("gb-gateway/0.1"));
    }

    #[test]
    fn invite_has_required_shape() {
        let sdp = "v=0\r\n".to_string();
        let msg = invite("34020000001320000001", "3402000000", "34020000001320000000", "3402000000", "10.0.0.1", 5060, "0123456789", sdp);
        assert!(msg.is_invite());
        assert!(msg.via.branch.starts_with(BRANCH_MAGIC));
        assert!(!msg.from.tag.as_ref().unwrap().is_empty());
        assert_eq!(msg.cseq.method, Method::Invite);
        assert_eq!(msg.max_forwards, Some(70));
        assert_eq!(msg.subject.as_deref(), Some("34020000001320000001:0123456789,34020000001320000000:0"));
    }

    #[test]
    fn ack_reuses_invite_ok_call_and_cseq_number_with_fresh_branch() {
        let h = [
            ("Via".to_string(), "SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bKorig".to_string()),
            ("From".to_string(), "<sip:34020000001320000000@3402000000>;tag=abc".to_string()),
            ("To".to_string(), "<sip:34020000001320000001@3402000000>;tag=def".to_string()),
            ("Call-ID".to_string(), "call-1".to_string()),
            ("CSeq".to_string(), "42 INVITE".to_string()),
        ];
        let ok = parser::parse("SIP/2.0 200 OK", &h, String::new()).unwrap();
        let ack = ack_for_invite_ok(&ok, "10.0.0.1", 5060);
        assert!(ack.is_ack());
        assert_eq!(ack.call_id, ok.call_id);
        assert_eq!(ack.cseq.number, 42);
        assert_ne!(ack.via.branch, "z9hG4bKorig");
        assert!(ack.via.branch.starts_with(BRANCH_MAGIC));
        assert!(ack.body.is_empty());
    }
}
