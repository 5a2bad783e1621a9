//! Turns an already line-split SIP message (start line + header lines +
//! body) into a [`Message`], and serializes a [`Message`] back to wire
//! bytes.
//!
//! The byte-level CRLF tokenizer that splits a TCP stream into discrete
//! header lines and slices off a Content-Length-sized body is treated as
//! an external collaborator (a generic HTTP-parser-style tokenizer);
//! [`gb_sip::connection`](crate::connection) performs that framing with a
//! plain `tokio` line reader and hands this module the already-split
//! result. This module's job is turning header *text* into typed headers
//! and enforcing the fail conditions.

use crate::error::{Error, Result};
use crate::message::{Message, StartLine};
use crate::types::{Addr, CSeq, Contact, Method, Via};

/// A raw, case-insensitively-addressable header line.
pub struct RawHeaders<'a>(pub &'a [(String, String)]);

impl<'a> RawHeaders<'a> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Parse one SIP message from its start line, header lines, and body.
///
/// `start_line` is the first line of the message with the trailing CRLF
/// already stripped, e.g. `"REGISTER sip:3402000000 SIP/2.0"` or
/// `"SIP/2.0 200 OK"`. `headers` is every subsequent header line up to (but
/// not including) the blank line, already unfolded and split on the first
/// `:` into `(name, value)` with both sides trimmed.
pub fn parse(start_line: &str, headers: &[(String, String)], body: String) -> Result<Message> {
    let start = parse_start_line(start_line)?;
    let h = RawHeaders(headers);

    let via_raw = h.get("Via").ok_or(Error::MissingHeader("Via"))?;
    let via = Via::parse(via_raw)?;

    let from_raw = h.get("From").ok_or(Error::MissingHeader("From"))?;
    let from = Addr::parse(from_raw)?;
    if from.tag.is_none() {
        return Err(Error::MissingFromTag);
    }

    let to_raw = h.get("To").ok_or(Error::MissingHeader("To"))?;
    let to = Addr::parse(to_raw)?;

    let call_id = h.get("Call-ID").or_else(|| h.get("Call-Id")).ok_or(Error::MissingHeader("Call-ID"))?.to_string();

    let cseq_raw = h.get("CSeq").ok_or(Error::MissingHeader("CSeq"))?;
    let cseq = CSeq::parse(cseq_raw)?;

    if let StartLine::Request { method, .. } = &start {
        if cseq.method != *method {
            return Err(Error::BadCSeq(format!("CSeq method {} does not match request method {}", cseq.method, method)));
        }
    }

    let contact = match h.get("Contact") {
        Some(v) => Some(Contact::parse(v)?),
        None => None,
    };

    let expires = match h.get("Expires") {
        Some(v) => Some(v.trim().parse::<u32>().map_err(|_| Error::BadExpires(v.to_string()))?),
        None => None,
    };

    let max_forwards = match h.get("Max-Forwards") {
        Some(v) => {
            let n: u32 = v.trim().parse().map_err(|_| Error::BadMaxForwards(v.to_string()))?;
            if n == 0 {
                return Err(Error::BadMaxForwards(v.to_string()));
            }
            Some(n)
        }
        None => None,
    };

    let content_type = h.get("Content-Type").map(|s| s.to_string());
    let subject = h.get("Subject").map(|s| s.to_string());
    let user_agent = h.get("User-Agent").map(|s| s.to_string());

    if let StartLine::Request { method, request_uri } = &start {
        if *method != Method::Register {
            let req_user = Addr::parse(&format!("<sip:{}>", strip_sip(request_uri)))
                .map(|a| a.user)
                .unwrap_or_default();
            if req_user != to.user {
                return Err(Error::ToUriMismatch);
            }
        }
    }

    Ok(Message {
        start,
        via,
        from,
        to,
        call_id,
        cseq,
        contact,
        expires,
        max_forwards,
        content_type,
        subject,
        user_agent,
        body,
    })
}

fn strip_sip(uri: &str) -> &str {
    uri.strip_prefix("sip:").unwrap_or(uri)
}

fn parse_start_line(line: &str) -> Result<StartLine> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let mut parts = rest.splitn(2, ' ');
        let status = parts.next().ok_or_else(|| Error::BadStartLine(line.to_string()))?;
        let status: u16 = status.parse().map_err(|_| Error::BadStartLine(line.to_string()))?;
        let reason = parts.next().unwrap_or("").to_string();
        return Ok(StartLine::Response { status, reason });
    }

    let mut parts = line.splitn(3, ' ');
    let method_tok = parts.next().ok_or_else(|| Error::BadStartLine(line.to_string()))?;
    let request_uri = parts.next().ok_or_else(|| Error::BadStartLine(line.to_string()))?.to_string();
    let version = parts.next().unwrap_or("");
    if version != "SIP/2.0" {
        return Err(Error::BadStartLine(line.to_string()));
    }
    let method = Method::parse(method_tok).ok_or_else(|| Error::UnsupportedMethod(method_tok.to_string()))?;
    Ok(StartLine::Request { method, request_uri })
}

/// Serialize a [`Message`] to wire bytes (CRLF-terminated headers, blank
/// line, body). The inverse of [`parse`] on the fields that must
/// round-trip.
pub fn serialize(msg: &Message) -> String {
    let mut out = String::new();
    out.push_str(&msg.start.to_string());
    out.push_str("\r\n");
    out.push_str(&format!("Via: {}\r\n", msg.via));
    out.push_str(&format!("From: {}\r\n", msg.from));
    out.push_str(&format!("To: {}\r\n", msg.to));
    out.push_str(&format!("Call-ID: {}\r\n", msg.call_id));
    out.push_str(&format!("CSeq: {}\r\n", msg.cseq));
    if let Some(c) = &msg.contact {
        out.push_str(&format!("Contact: {c}\r\n"));
    }
    if let Some(mf) = msg.max_forwards {
        out.push_str(&format!("Max-Forwards: {mf}\r\n"));
    }
    if let Some(e) = msg.expires {
        out.push_str(&format!("Expires: {e}\r\n"));
    }
    if let Some(ct) = &msg.content_type {
        out.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    if let Some(s) = &msg.subject {
        out.push_str(&format!("Subject: {s}\r\n"));
    }
    if let Some(ua) = &msg.user_agent {
        out.push_str(&format!("User-Agent: {ua}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n", msg.body.len()));
    out.push_str("\r\n");
    out.push_str(&msg.body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transport;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_standard_register() {
        let h = headers(&[
            ("Via", "SIP/2.0/TCP 3402000000:5060;branch=z9hG4bK1234567"),
            ("From", "<sip:34020000001320000001@3402000000>;tag=307202390"),
            ("To", "<sip:34020000001320000001@3402000000>"),
            ("Call-ID", "123456789"),
            ("CSeq", "1 REGISTER"),
            ("Contact", "<sip:34020000001320000001@3402000000:5060>"),
            ("Expires", "3600"),
            ("Max-Forwards", "70"),
        ]);
        let msg = parse("REGISTER sip:3402000000 SIP/2.0", &h, String::new()).unwrap();
        assert!(msg.is_register());
        assert_eq!(msg.device_id(), "34020000001320000001");
        assert_eq!(msg.expires, Some(3600));
        assert_eq!(msg.via.transport, Transport::Tcp);
    }

    #[test]
    fn rejects_missing_via() {
        let h = headers(&[
            ("From", "<sip:a@b>;tag=1"),
            ("To", "<sip:a@b>"),
            ("Call-ID", "1"),
            ("CSeq", "1 REGISTER"),
        ]);
        let err = parse("REGISTER sip:b SIP/2.0", &h, String::new()).unwrap_err();
        assert!(matches!(err, Error::MissingHeader("Via")));
    }

    #[test]
    fn rejects_from_without_tag() {
        let h = headers(&[
            ("Via", "SIP/2.0/TCP h:5060;branch=z9hG4bK1"),
            ("From", "<sip:a@b>"),
            ("To", "<sip:a@b>"),
            ("Call-ID", "1"),
            ("CSeq", "1 REGISTER"),
        ]);
        let err = parse("REGISTER sip:b SIP/2.0", &h, String::new()).unwrap_err();
        assert_eq!(err, Error::MissingFromTag);
    }

    #[test]
    fn rejects_cseq_method_mismatch() {
        let h = headers(&[
            ("Via", "SIP/2.0/TCP h:5060;branch=z9hG4bK1"),
            ("From", "<sip:a@b>;tag=1"),
            ("To", "<sip:a@b>"),
            ("Call-ID", "1"),
            ("CSeq", "1 INVITE"),
        ]);
        let err = parse("REGISTER sip:b SIP/2.0", &h, String::new()).unwrap_err();
        assert!(matches!(err, Error::BadCSeq(_)));
    }

    #[test]
    fn rejects_to_uri_mismatch_on_non_register() {
        let h = headers(&[
            ("Via", "SIP/2.0/TCP h:5060;branch=z9hG4bK1"),
            ("From", "<sip:a@b>;tag=1"),
            ("To", "<sip:other@b>"),
            ("Call-ID", "1"),
            ("CSeq", "1 BYE"),
        ]);
        let err = parse("BYE sip:a@b SIP/2.0", &h, String::new()).unwrap_err();
        assert_eq!(err, Error::ToUriMismatch);
    }

    #[test]
    fn round_trips_parse_serialize_parse() {
        let h = headers(&[
            ("Via", "SIP/2.0/TCP 3402000000:5060;branch=z9hG4bK1234567"),
            ("From", "<sip:34020000001320000001@3402000000>;tag=307202390"),
            ("To", "<sip:34020000001320000001@3402000000>"),
            ("Call-ID", "123456789"),
            ("CSeq", "1 REGISTER"),
            ("Expires", "3600"),
        ]);
        let msg = parse("REGISTER sip:3402000000 SIP/2.0", &h, String::new()).unwrap();
        let wire = serialize(&msg);

        let mut lines = wire.split("\r\n");
        let start_line = lines.next().unwrap();
        let mut hdrs = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (k, v) = line.split_once(':').unwrap();
            hdrs.push((k.trim().to_string(), v.trim().to_string()));
        }
        let reparsed = parse(start_line, &hdrs, String::new()).unwrap();
        assert_eq!(reparsed, msg);
    }
}
