//! UDP discovery and time-probe messages
//!
//! ```text
//! query:       LSL:shortinfo\r\n<query>\r\n<return-port> <query-id>\r\n
//! reply:       <query-id>\r\n<shortinfo xml>
//!
//! time probe:  LSL:timedata\r\n<wave-id> <t0>\r\n
//! time reply:   <wave-id> <t0> <t1> <t2>
//! ```
//!
//! Query replies go to the sender's address at `<return-port>`; time replies go
//! straight back to the sending socket.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const SHORTINFO: &str = "LSL:shortinfo";
const TIMEDATA: &str = "LSL:timedata";

fn malformed(what: impl Into<String>) -> Error {
    Error::internal(format!("malformed datagram: {}", what.into()))
}

fn parse_num<T: std::str::FromStr>(s: Option<&str>, what: &str) -> Result<T> {
    let s = s.ok_or_else(|| malformed(format!("missing {}", what)))?;
    s.trim()
        .parse()
        .map_err(|_| malformed(format!("invalid {} '{}'", what, s)))
}

/// Request datagram received by responders and outlet service sockets
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    ShortInfoQuery {
        query: String,
        return_port: u16,
        query_id: u64,
    },
    TimeProbe {
        wave_id: u32,
        t0: f64,
    },
}

impl Datagram {
    pub fn encode(&self) -> Bytes {
        let text = match self {
            Datagram::ShortInfoQuery {
                query,
                return_port,
                query_id,
            } => format!("{}\r\n{}\r\n{} {}\r\n", SHORTINFO, query, return_port, query_id),
            Datagram::TimeProbe { wave_id, t0 } => {
                format!("{}\r\n{} {}\r\n", TIMEDATA, wave_id, t0)
            }
        };
        Bytes::from(text)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| malformed("not UTF-8"))?;
        let mut lines = text.split("\r\n");
        match lines.next() {
            Some(SHORTINFO) => {
                let query = lines.next().ok_or_else(|| malformed("missing query"))?;
                let mut tail = lines.next().unwrap_or_default().split_whitespace();
                Ok(Datagram::ShortInfoQuery {
                    query: query.to_string(),
                    return_port: parse_num(tail.next(), "return port")?,
                    query_id: parse_num(tail.next(), "query id")?,
                })
            }
            Some(TIMEDATA) => {
                let mut tail = lines.next().unwrap_or_default().split_whitespace();
                Ok(Datagram::TimeProbe {
                    wave_id: parse_num(tail.next(), "wave id")?,
                    t0: parse_num(tail.next(), "t0")?,
                })
            }
            Some(other) => Err(malformed(format!("unknown method '{}'", other))),
            None => Err(malformed("empty")),
        }
    }
}

/// Answer to a shortinfo query
#[derive(Debug, Clone, PartialEq)]
pub struct ShortInfoReply {
    pub query_id: u64,
    pub xml: String,
}

impl ShortInfoReply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.xml.len() + 24);
        buf.put_slice(format!("{}\r\n", self.query_id).as_bytes());
        buf.put_slice(self.xml.as_bytes());
        buf.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| malformed("not UTF-8"))?;
        let (id, xml) = text
            .split_once("\r\n")
            .ok_or_else(|| malformed("missing query id line"))?;
        Ok(Self {
            query_id: parse_num(Some(id), "query id")?,
            xml: xml.to_string(),
        })
    }
}

/// Answer to a time probe: t1 = receive time, t2 = send time, both on the
/// responder's clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeReply {
    pub wave_id: u32,
    pub t0: f64,
    pub t1: f64,
    pub t2: f64,
}

impl TimeReply {
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            " {} {} {} {}",
            self.wave_id, self.t0, self.t1, self.t2
        ))
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| malformed("not UTF-8"))?;
        let mut parts = text.split_whitespace();
        Ok(Self {
            wave_id: parse_num(parts.next(), "wave id")?,
            t0: parse_num(parts.next(), "t0")?,
            t1: parse_num(parts.next(), "t1")?,
            t2: parse_num(parts.next(), "t2")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_datagram() {
        let q = Datagram::ShortInfoQuery {
            query: "session_id='default' and (name='x')".into(),
            return_port: 40000,
            query_id: 1234567890123,
        };
        let wire = q.encode();
        assert!(wire.starts_with(b"LSL:shortinfo\r\n"));
        assert_eq!(Datagram::parse(&wire).unwrap(), q);
    }

    #[test]
    fn test_time_probe() {
        let p = Datagram::TimeProbe {
            wave_id: 7,
            t0: 1234.000125,
        };
        assert_eq!(Datagram::parse(&p.encode()).unwrap(), p);

        let reply = TimeReply {
            wave_id: 7,
            t0: 1234.000125,
            t1: 99.5,
            t2: 99.50001,
        };
        let wire = reply.encode();
        assert!(wire.starts_with(b" 7 "));
        assert_eq!(TimeReply::parse(&wire).unwrap(), reply);
    }

    #[test]
    fn test_shortinfo_reply_keeps_xml_verbatim() {
        let reply = ShortInfoReply {
            query_id: 42,
            xml: "<?xml version=\"1.0\"?><info><name>a\r\nb</name></info>".into(),
        };
        assert_eq!(ShortInfoReply::parse(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn test_malformed() {
        assert!(Datagram::parse(b"").is_err());
        assert!(Datagram::parse(b"LSL:other\r\n").is_err());
        assert!(Datagram::parse(b"LSL:shortinfo\r\nname='x'\r\nabc 1\r\n").is_err());
        assert!(Datagram::parse(b"LSL:timedata\r\n1\r\n").is_err());
        assert!(TimeReply::parse(b" 1 2 3").is_err());
        assert!(ShortInfoReply::parse(b"no-newline").is_err());
        assert!(Datagram::parse(&[0xff, 0xfe]).is_err());
    }
}
