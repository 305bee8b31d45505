use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Namespace that identifies an Atom 1.0 document.
pub const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";
/// Namespace of RSS 1.0 channel elements inside an `rdf:RDF` root.
pub const RSS1_NAMESPACE: &str = "http://purl.org/rss/1.0/";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Structural markers of a document's root element.
///
/// Produced by [`sniff_root`]. Holds only what is visible on the root start
/// tag; nothing past it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootElement {
    local_name: String,
    prefix: Option<String>,
    attributes: Vec<(String, String)>,
}

impl RootElement {
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Value of the attribute with the exact qualified name `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Namespace the root element itself lives in: `xmlns:<prefix>` when the
    /// element is prefixed, the default `xmlns` otherwise.
    pub fn namespace(&self) -> Option<&str> {
        match &self.prefix {
            Some(prefix) => self.attribute(&format!("xmlns:{prefix}")),
            None => self.attribute("xmlns"),
        }
    }

    /// True if any namespace declared on the root equals `uri`.
    pub fn declares_namespace(&self, uri: &str) -> bool {
        self.attributes
            .iter()
            .any(|(k, v)| (k == "xmlns" || k.starts_with("xmlns:")) && v == uri)
    }
}

/// Reads just far enough into `payload` to find the root element.
///
/// Skips a UTF-8 byte order mark, the XML declaration, comments, processing
/// instructions, doctype and whitespace. Returns `None` if the payload ends or
/// becomes unreadable before a root start tag appears. Content after the root
/// start tag is never inspected, so documents that are malformed further in
/// still yield their root.
pub fn sniff_root(payload: &[u8]) -> Option<RootElement> {
    let payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
    let mut reader = Reader::from_reader(payload);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => return Some(root_from_start(&e)),
            Ok(Event::Eof) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "Payload unreadable before root element");
                return None;
            }
            Ok(_) => {}
        }
        buf.clear();
    }
}

fn root_from_start(e: &BytesStart<'_>) -> RootElement {
    let name = e.name();
    let local_name = String::from_utf8_lossy(name.local_name().as_ref()).into_owned();
    let prefix = name
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(err) => {
                // Keep what parsed so far; a broken attribute later on the tag
                // should not hide the namespace declared before it.
                tracing::debug!(error = %err, "Stopping at malformed root attribute");
                break;
            }
        };
        attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            String::from_utf8_lossy(attr.value.as_ref()).into_owned(),
        ));
    }

    RootElement {
        local_name,
        prefix,
        attributes,
    }
}

/// `<rss ...>` (RSS 0.9x/2.0) or `<rdf:RDF>` declaring the RSS 1.0 namespace.
pub fn is_rss(root: &RootElement) -> bool {
    match root.local_name() {
        "rss" => true,
        "RDF" => root.declares_namespace(RSS1_NAMESPACE),
        _ => false,
    }
}

/// `<feed>` in the Atom namespace, prefixed or not.
pub fn is_atom(root: &RootElement) -> bool {
    root.local_name() == "feed" && root.namespace() == Some(ATOM_NAMESPACE)
}
