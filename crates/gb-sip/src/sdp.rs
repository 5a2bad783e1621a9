//! The minimal SDP offer shape this gateway needs, including the
//! non-standard GB28181 `y=<ssrc>` extension line, which must round-trip
//! losslessly.

use crate::error::{Error, Result};

/// Our outbound SDP offer: one session, one recvonly video media line
/// carrying PS over TCP/RTP/AVP payload type 96, plus the `y=` SSRC line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpOffer {
    pub username: String,
    pub candidate: String,
    pub media_port: u16,
    pub ssrc_decimal: String,
}

pub const PS_PAYLOAD_TYPE: u8 = 96;

/// Encode the offer:
///
/// ```text
/// v=0
/// o=<user> 0 0 IN IP4 <pip>
/// s=Play
/// c=IN IP4 <pip>
/// t=0 0
/// m=video <port> TCP/RTP/AVP 96
/// a=recvonly
/// a=rtpmap:96 PS/90000
/// y=<ssrc>
/// ```
pub fn encode_offer(offer: &SdpOffer) -> String {
    format!(
        "v=0\r\n\
         o={user} 0 0 IN IP4 {pip}\r\n\
         s=Play\r\n\
         c=IN IP4 {pip}\r\n\
         t=0 0\r\n\
         m=video {port} TCP/RTP/AVP {pt}\r\n\
         a=recvonly\r\n\
         a=rtpmap:{pt} PS/90000\r\n\
         y={ssrc}\r\n",
        user = offer.username,
        pip = offer.candidate,
        port = offer.media_port,
        pt = PS_PAYLOAD_TYPE,
        ssrc = offer.ssrc_decimal,
    )
}

/// Decode an SDP offer of the shape [`encode_offer`] produces. Lenient
/// about line endings (`\r\n` or bare `\n`), strict about the presence of
/// `m=video`, `c=IN IP4`, and `y=`.
pub fn decode_offer(text: &str) -> Result<SdpOffer> {
    let mut username = None;
    let mut candidate = None;
    let mut media_port = None;
    let mut ssrc_decimal = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("o=") {
            username = rest.split_whitespace().next().map(|s| s.to_string());
        } else if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            candidate = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("m=video ") {
            let port_tok = rest.split_whitespace().next().ok_or_else(|| Error::BadAddress(line.to_string()))?;
            media_port = Some(port_tok.parse::<u16>().map_err(|_| Error::BadAddress(line.to_string()))?);
        } else if let Some(rest) = line.strip_prefix("y=") {
            ssrc_decimal = Some(rest.trim().to_string());
        }
    }

    Ok(SdpOffer {
        username: username.ok_or_else(|| Error::BadAddress("missing o= line".to_string()))?,
        candidate: candidate.ok_or_else(|| Error::BadAddress("missing c= line".to_string()))?,
        media_port: media_port.ok_or_else(|| Error::BadAddress("missing m=video line".to_string()))?,
        ssrc_decimal: ssrc_decimal.ok_or_else(|| Error::BadAddress("missing y= line".to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_round_trips_including_y_line() {
        let offer = SdpOffer {
            username: "34020000001320000001".to_string(),
            candidate: "10.0.0.5".to_string(),
            media_port: 10000,
            ssrc_decimal: "0101234567".to_string(),
        };
        let text = encode_offer(&offer);
        assert!(text.contains("m=video 10000 TCP/RTP/AVP 96"));
        assert!(text.contains("a=recvonly"));
        assert!(text.contains("a=rtpmap:96 PS/90000"));
        assert!(text.contains("y=0101234567"));
        let decoded = decode_offer(&text).unwrap();
        assert_eq!(decoded, offer);
    }
}
