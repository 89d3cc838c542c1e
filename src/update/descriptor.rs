//! Remote update descriptor.
//!
//! The server publishes a small XML document:
//!
//! ```xml
//! <item>
//!   <version>2.0.0.0</version>
//!   <url>https://example.com/app-2.0.zip</url>
//!   <beta>0</beta>
//!   <changelog><![CDATA[Fixes & improvements]]></changelog>
//!   <mandatory>false</mandatory>
//! </item>
//! ```
//!
//! `version` and `url` are required. The remaining children default to empty
//! strings / `false`. Unknown children are ignored.

use crate::error::{Result, UpdateError};
use crate::update::version::AppVersion;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;

/// Name of the document's root element.
pub const ROOT_ELEMENT: &str = "item";

/// A parsed update descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    /// Dotted version of the published release.
    pub version: String,
    /// Download location of the update archive.
    pub url: String,
    /// Beta marker, passed through verbatim.
    pub beta: String,
    /// Free-text release notes.
    pub changelog: String,
    /// Whether the publisher flags this update as required. Displayed only.
    pub mandatory: bool,
}

impl UpdateDescriptor {
    /// Parse a descriptor document.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Descriptor`] if the XML is malformed, the root
    /// element is not `<item>`, or `version` / `url` are missing or empty.
    pub fn parse(xml: &str) -> Result<Self> {
        let fields = read_root_children(xml)?;

        let required = |name: &str| -> Result<String> {
            fields
                .get(name)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| UpdateError::Descriptor(format!("missing <{name}> element")))
        };
        let optional = |name: &str| fields.get(name).cloned().unwrap_or_default();

        Ok(Self {
            version: required("version")?,
            url: required("url")?,
            beta: optional("beta"),
            changelog: optional("changelog"),
            mandatory: parse_flag(&optional("mandatory")),
        })
    }

    /// The advertised version, parsed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Version`] if `version` is not a dotted number.
    pub fn app_version(&self) -> Result<AppVersion> {
        AppVersion::parse(&self.version)
    }
}

/// `true`/`True`/` TRUE ` are true; everything else is false.
fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Collect the text of each direct child of the root element.
///
/// Only the first occurrence of a child name is kept.
fn read_root_children(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut root_seen = false;
    let mut depth = 0usize;
    let mut current: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                depth += 1;
                match depth {
                    1 => {
                        check_root(&name, root_seen)?;
                        root_seen = true;
                    }
                    2 => {
                        current = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 => {
                        check_root(&name, root_seen)?;
                        root_seen = true;
                    }
                    1 => {
                        fields.entry(name).or_insert_with(String::new);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if depth == 2 {
                    let decoded = e
                        .unescape()
                        .map_err(|err| UpdateError::Descriptor(format!("bad text: {err}")))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::CData(e)) => {
                if depth == 2 {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some(name) = current.take() {
                        fields
                            .entry(name)
                            .or_insert_with(|| text.trim().to_owned());
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(UpdateError::Descriptor(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(UpdateError::Descriptor("truncated document".to_owned()));
    }
    if !root_seen {
        return Err(UpdateError::Descriptor(format!(
            "missing <{ROOT_ELEMENT}> root element"
        )));
    }
    Ok(fields)
}

fn check_root(name: &str, root_seen: bool) -> Result<()> {
    if root_seen {
        return Err(UpdateError::Descriptor("multiple root elements".to_owned()));
    }
    if name != ROOT_ELEMENT {
        return Err(UpdateError::Descriptor(format!(
            "missing <{ROOT_ELEMENT}> root element (found <{name}>)"
        )));
    }
    Ok(())
}
