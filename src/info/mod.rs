//! Stream descriptors
//!
//! A [`StreamInfo`] describes the identity and shape of a stream: name, content
//! type, channel count, nominal rate, value format and source id. Once an
//! outlet is created from it, the outlet's copy is *bound*: it receives a
//! unique id, session id, host name, creation time and the ports the stream is
//! served on. Resolvers hand out the short form of a bound descriptor (empty
//! `desc`); the full form is fetched from an inlet.
//!
//! The XML form has a fixed element order:
//!
//! ```text
//! <info>
//!   <name/> <type/> <channel_count/> <channel_format/> <source_id/>
//!   <nominal_srate/> <version/> <created_at/> <uid/> <session_id/>
//!   <hostname/> <v4address/> <v4data_port/> <v4service_port/> <desc/>
//! </info>
//! ```

pub mod format;

pub use format::ChannelFormat;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::protocol::constants::{IRREGULAR_SAMPLES_PER_SECOND, PROTOCOL_VERSION};
use crate::query::Query;
use crate::xml::codec::{parse_document, write_document};
use crate::xml::{NodeId, NodeKind, XmlDocument, XmlElement, XmlError};

/// Descriptor of a stream
pub struct StreamInfo {
    name: String,
    stream_type: String,
    channel_count: u32,
    nominal_srate: f64,
    channel_format: ChannelFormat,
    source_id: String,
    version: i32,
    created_at: f64,
    uid: String,
    session_id: String,
    hostname: String,
    v4address: String,
    v4data_port: u16,
    v4service_port: u16,
    desc: Arc<Mutex<XmlDocument>>,
}

impl StreamInfo {
    /// Create an unbound descriptor
    ///
    /// `name` must be non-empty, `channel_count` at least 1 and
    /// `nominal_srate` a finite non-negative number
    /// ([`IRREGULAR_RATE`](crate::IRREGULAR_RATE) for irregular streams).
    pub fn new(
        name: &str,
        stream_type: &str,
        channel_count: u32,
        nominal_srate: f64,
        channel_format: ChannelFormat,
        source_id: &str,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::argument("stream name must not be empty"));
        }
        if channel_count == 0 {
            return Err(Error::argument("channel count must be at least 1"));
        }
        if !nominal_srate.is_finite() || nominal_srate < 0.0 {
            return Err(Error::argument(format!(
                "nominal rate must be finite and non-negative, got {}",
                nominal_srate
            )));
        }

        Ok(Self {
            name: name.to_string(),
            stream_type: stream_type.to_string(),
            channel_count,
            nominal_srate,
            channel_format,
            source_id: source_id.to_string(),
            version: PROTOCOL_VERSION,
            created_at: 0.0,
            uid: String::new(),
            session_id: String::new(),
            hostname: String::new(),
            v4address: String::new(),
            v4data_port: 0,
            v4service_port: 0,
            desc: Arc::new(Mutex::new(XmlDocument::new("desc"))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content type (e.g. "EEG", "Markers")
    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn nominal_srate(&self) -> f64 {
        self.nominal_srate
    }

    pub fn channel_format(&self) -> ChannelFormat {
        self.channel_format
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Protocol version of the producing library (110 = 1.10)
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Creation time of the outlet on its own clock
    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Unique id assigned when the stream was bound
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Address the stream was discovered at
    pub fn v4address(&self) -> &str {
        &self.v4address
    }

    pub fn v4data_port(&self) -> u16 {
        self.v4data_port
    }

    pub fn v4service_port(&self) -> u16 {
        self.v4service_port
    }

    /// Whether network fields have been assigned
    pub fn is_bound(&self) -> bool {
        !self.uid.is_empty() && self.v4data_port != 0
    }

    /// Whether the nominal rate is irregular
    pub fn is_irregular(&self) -> bool {
        self.nominal_srate <= 0.0
    }

    /// Root of the extended description tree
    pub fn desc(&self) -> XmlElement {
        XmlElement::root_of(Arc::clone(&self.desc))
    }

    /// Bytes per channel value (0 for variable-length formats)
    pub fn channel_bytes(&self) -> usize {
        self.channel_format.value_size()
    }

    /// Bytes per sample (0 for variable-length formats)
    pub fn sample_bytes(&self) -> usize {
        self.channel_bytes() * self.channel_count as usize
    }

    /// Convert a duration in seconds to a sample count for this stream
    pub(crate) fn seconds_to_samples(&self, seconds: f64) -> usize {
        let rate = if self.is_irregular() {
            IRREGULAR_SAMPLES_PER_SECOND
        } else {
            self.nominal_srate
        };
        ((seconds * rate).ceil() as usize).max(1)
    }

    /// Whether this stream matches a parsed query
    pub fn matches(&self, query: &Query) -> bool {
        query.matches_document(&self.to_document(true))
    }

    pub(crate) fn bind(
        &mut self,
        uid: String,
        session_id: &str,
        hostname: &str,
        created_at: f64,
        data_port: u16,
        service_port: u16,
    ) {
        self.uid = uid;
        self.session_id = session_id.to_string();
        self.hostname = hostname.to_string();
        self.created_at = created_at;
        self.version = PROTOCOL_VERSION;
        self.v4data_port = data_port;
        self.v4service_port = service_port;
    }

    pub(crate) fn set_v4address(&mut self, address: impl Into<String>) {
        self.v4address = address.into();
    }

    /// Take over the network identity of a re-discovered stream
    pub(crate) fn rebind_from(&mut self, other: &StreamInfo) {
        self.uid = other.uid.clone();
        self.session_id = other.session_id.clone();
        self.hostname = other.hostname.clone();
        self.created_at = other.created_at;
        self.version = other.version;
        self.v4address = other.v4address.clone();
        self.v4data_port = other.v4data_port;
        self.v4service_port = other.v4service_port;
    }

    fn fields(&self) -> [(&'static str, String); 14] {
        [
            ("name", self.name.clone()),
            ("type", self.stream_type.clone()),
            ("channel_count", self.channel_count.to_string()),
            ("channel_format", self.channel_format.as_str().to_string()),
            ("source_id", self.source_id.clone()),
            ("nominal_srate", self.nominal_srate.to_string()),
            ("version", format!("{:.2}", self.version as f64 / 100.0)),
            ("created_at", self.created_at.to_string()),
            ("uid", self.uid.clone()),
            ("session_id", self.session_id.clone()),
            ("hostname", self.hostname.clone()),
            ("v4address", self.v4address.clone()),
            ("v4data_port", self.v4data_port.to_string()),
            ("v4service_port", self.v4service_port.to_string()),
        ]
    }

    /// Render the descriptor as a document rooted at `info`
    ///
    /// With `include_desc == false` the `desc` element is present but empty
    /// (short form).
    pub fn to_document(&self, include_desc: bool) -> XmlDocument {
        let mut doc = XmlDocument::new("info");
        let root = doc.root();
        for (field, value) in self.fields() {
            if let Some(el) = doc.insert(root, NodeKind::Element, field, "", true) {
                if !value.is_empty() {
                    doc.insert(el, NodeKind::Text, "", &value, true);
                }
            }
        }

        let snapshot = if include_desc {
            let desc = self.desc.lock();
            desc.snapshot(desc.root())
        } else {
            None
        };
        match snapshot {
            Some(snap) => {
                doc.insert_snapshot(root, &snap, true);
            }
            None => {
                doc.insert(root, NodeKind::Element, "desc", "", true);
            }
        }
        doc
    }

    /// Full XML form including the description tree
    pub fn to_xml(&self) -> Result<String> {
        let doc = self.to_document(true);
        Ok(write_document(&doc, doc.root())?)
    }

    /// Short XML form (empty description)
    pub fn to_shortinfo_xml(&self) -> Result<String> {
        let doc = self.to_document(false);
        Ok(write_document(&doc, doc.root())?)
    }

    /// Reconstruct a descriptor from its XML form
    ///
    /// Network fields present in the document are kept, so a parsed short
    /// info is as usable for opening an inlet as a resolved one.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = parse_document(xml)?;
        let root = doc.root();
        let root_name = doc.name(root).unwrap_or_default();
        if root_name != "info" {
            return Err(XmlError::UnexpectedRoot(root_name.to_string()).into());
        }

        let text = |field: &str| -> String {
            doc.child(root, field)
                .map(|c| doc.text_content(c).trim().to_string())
                .unwrap_or_default()
        };

        let name = text("name");
        if name.is_empty() {
            return Err(XmlError::InvalidField {
                field: "name",
                value: name,
            }
            .into());
        }
        let channel_count: u32 = parse_field(&doc, root, "channel_count", 0)?;
        if channel_count == 0 {
            return Err(XmlError::InvalidField {
                field: "channel_count",
                value: text("channel_count"),
            }
            .into());
        }
        let channel_format = match text("channel_format") {
            f if f.is_empty() => ChannelFormat::Undefined,
            f => ChannelFormat::from_str(&f).map_err(|_| XmlError::InvalidField {
                field: "channel_format",
                value: f.clone(),
            })?,
        };
        let version: f64 = parse_field(&doc, root, "version", PROTOCOL_VERSION as f64 / 100.0)?;

        let desc = match doc.child(root, "desc").and_then(|d| doc.snapshot(d)) {
            Some(snap) => XmlDocument::from_snapshot(&snap),
            None => XmlDocument::new("desc"),
        };

        Ok(Self {
            name,
            stream_type: text("type"),
            channel_count,
            nominal_srate: parse_field(&doc, root, "nominal_srate", 0.0)?,
            channel_format,
            source_id: text("source_id"),
            version: (version * 100.0).round() as i32,
            created_at: parse_field(&doc, root, "created_at", 0.0)?,
            uid: text("uid"),
            session_id: text("session_id"),
            hostname: text("hostname"),
            v4address: text("v4address"),
            v4data_port: parse_field(&doc, root, "v4data_port", 0)?,
            v4service_port: parse_field(&doc, root, "v4service_port", 0)?,
            desc: Arc::new(Mutex::new(desc)),
        })
    }
}

fn parse_field<T: FromStr>(
    doc: &XmlDocument,
    root: NodeId,
    field: &'static str,
    default: T,
) -> std::result::Result<T, XmlError> {
    let value = doc
        .child(root, field)
        .map(|c| doc.text_content(c).trim().to_string())
        .unwrap_or_default();
    if value.is_empty() {
        return Ok(default);
    }
    value
        .parse()
        .map_err(|_| XmlError::InvalidField { field, value })
}

impl Clone for StreamInfo {
    /// Deep copy, including the description tree (compacted)
    fn clone(&self) -> Self {
        let desc = self.desc.lock().compacted();
        Self {
            name: self.name.clone(),
            stream_type: self.stream_type.clone(),
            channel_count: self.channel_count,
            nominal_srate: self.nominal_srate,
            channel_format: self.channel_format,
            source_id: self.source_id.clone(),
            version: self.version,
            created_at: self.created_at,
            uid: self.uid.clone(),
            session_id: self.session_id.clone(),
            hostname: self.hostname.clone(),
            v4address: self.v4address.clone(),
            v4data_port: self.v4data_port,
            v4service_port: self.v4service_port,
            desc: Arc::new(Mutex::new(desc)),
        }
    }
}

impl fmt::Debug for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("name", &self.name)
            .field("type", &self.stream_type)
            .field("channel_count", &self.channel_count)
            .field("nominal_srate", &self.nominal_srate)
            .field("channel_format", &self.channel_format)
            .field("source_id", &self.source_id)
            .field("uid", &self.uid)
            .field("hostname", &self.hostname)
            .field("v4address", &self.v4address)
            .field("v4data_port", &self.v4data_port)
            .finish()
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.stream_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::IRREGULAR_RATE;

    fn eeg() -> StreamInfo {
        let info = StreamInfo::new("BioSemi", "EEG", 8, 100.0, ChannelFormat::Float32, "myuid")
            .unwrap();
        let channels = info.desc().append_child("channels");
        for label in ["C3", "C4", "Cz", "FPz", "POz", "CPz", "O1", "O2"] {
            channels
                .append_child("channel")
                .append_child_value("label", label)
                .append_child_value("unit", "microvolts")
                .append_child_value("type", "EEG");
        }
        info.desc().append_child_value("manufacturer", "SCCN");
        info
    }

    #[test]
    fn test_validation() {
        assert!(StreamInfo::new("", "EEG", 8, 100.0, ChannelFormat::Float32, "").is_err());
        assert!(StreamInfo::new("a", "EEG", 0, 100.0, ChannelFormat::Float32, "").is_err());
        assert!(StreamInfo::new("a", "EEG", 1, -1.0, ChannelFormat::Float32, "").is_err());
        assert!(StreamInfo::new("a", "EEG", 1, f64::NAN, ChannelFormat::Float32, "").is_err());
        assert!(StreamInfo::new("a", "", 1, IRREGULAR_RATE, ChannelFormat::String, "").is_ok());
    }

    #[test]
    fn test_full_xml_roundtrip() {
        let mut info = eeg();
        info.bind("abc-123".into(), "default", "lab-pc", 12345.5, 16572, 16573);

        let xml = info.to_xml().unwrap();
        let parsed = StreamInfo::from_xml(&xml).unwrap();

        assert_eq!(parsed.name(), "BioSemi");
        assert_eq!(parsed.stream_type(), "EEG");
        assert_eq!(parsed.channel_count(), 8);
        assert_eq!(parsed.nominal_srate(), 100.0);
        assert_eq!(parsed.channel_format(), ChannelFormat::Float32);
        assert_eq!(parsed.source_id(), "myuid");
        assert_eq!(parsed.version(), PROTOCOL_VERSION);
        assert_eq!(parsed.created_at(), 12345.5);
        assert_eq!(parsed.uid(), "abc-123");
        assert_eq!(parsed.hostname(), "lab-pc");
        assert_eq!(parsed.v4data_port(), 16572);
        assert_eq!(parsed.v4service_port(), 16573);
        assert!(parsed.is_bound());

        // Description tree is identical, including sibling order
        let a = info.desc.lock().snapshot(0);
        let b = parsed.desc.lock().snapshot(0);
        assert_eq!(a, b);
        let labels: Vec<String> = parsed
            .desc()
            .child("channels")
            .children()
            .iter()
            .map(|c| c.child_value_named("label"))
            .collect();
        assert_eq!(labels, vec!["C3", "C4", "Cz", "FPz", "POz", "CPz", "O1", "O2"]);
    }

    #[test]
    fn test_shortinfo_drops_desc() {
        let info = eeg();
        let short = StreamInfo::from_xml(&info.to_shortinfo_xml().unwrap()).unwrap();
        assert!(short.desc().first_child().is_empty());
        assert_eq!(short.name(), info.name());
    }

    #[test]
    fn test_clone_is_deep() {
        let info = eeg();
        let copy = info.clone();
        copy.desc().append_child_value("extra", "1");
        assert!(info.desc().child("extra").is_empty());
        assert_eq!(copy.desc().child_value_named("extra"), "1");
    }

    #[test]
    fn test_clone_after_edits_keeps_live_tree() {
        let info = eeg();
        for _ in 0..10 {
            info.desc().append_child_value("scratch", "x");
            assert!(info.desc().remove_child_named("scratch"));
        }
        let copy = info.clone();
        assert_eq!(copy.desc.lock().len(), info.desc.lock().len());
        assert_eq!(copy.desc.lock().snapshot(0), info.desc.lock().snapshot(0));
    }

    #[test]
    fn test_from_xml_errors() {
        assert!(StreamInfo::from_xml("<other/>").is_err());
        assert!(StreamInfo::from_xml("<info><name>x</name></info>").is_err());
        assert!(StreamInfo::from_xml(
            "<info><name>x</name><channel_count>abc</channel_count></info>"
        )
        .is_err());
        assert!(StreamInfo::from_xml(
            "<info><name>x</name><channel_count>2</channel_count><channel_format>float128</channel_format></info>"
        )
        .is_err());
    }

    #[test]
    fn test_seconds_to_samples() {
        let info = eeg();
        assert_eq!(info.seconds_to_samples(2.0), 200);
        let markers =
            StreamInfo::new("m", "Markers", 1, IRREGULAR_RATE, ChannelFormat::String, "").unwrap();
        assert_eq!(markers.seconds_to_samples(3.0), 300);
        assert_eq!(markers.seconds_to_samples(0.0), 1);
    }

    #[test]
    fn test_sizes() {
        let info = eeg();
        assert_eq!(info.channel_bytes(), 4);
        assert_eq!(info.sample_bytes(), 32);
    }
}
