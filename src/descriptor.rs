//! Storage volume descriptor sent to the backend on creation.

use std::fmt::Write as _;

/// Format every ignition volume is created with.
pub const RAW_FORMAT: &str = "raw";

/// File mode applied to created volumes.
const VOLUME_MODE: &str = "0644";

/// Parameters of the volume to create. Only lives long enough to be
/// serialised and handed to the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeDescriptor {
    /// Volume name inside the pool.
    pub name: String,
    /// Capacity in bytes; equals the exact size of the payload.
    pub capacity_bytes: u64,
    /// Target format, always [`RAW_FORMAT`].
    pub format: &'static str,
}

impl VolumeDescriptor {
    /// Creates a raw-format descriptor.
    #[must_use]
    pub fn raw(name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            capacity_bytes,
            format: RAW_FORMAT,
        }
    }

    /// Renders the descriptor as libvirt storage volume XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<volume>");
        xml.push_str("<name>");
        xml.push_str(&escape_xml(&self.name));
        xml.push_str("</name>");
        // Writing into a String cannot fail.
        write!(
            xml,
            "<capacity unit=\"bytes\">{}</capacity>",
            self.capacity_bytes
        )
        .ok();
        write!(
            xml,
            "<target><format type=\"{}\"/><permissions><mode>{VOLUME_MODE}</mode></permissions></target>",
            self.format
        )
        .ok();
        xml.push_str("</volume>");
        xml
    }
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn raw_descriptor_uses_raw_format() {
        let descriptor = VolumeDescriptor::raw("boot.ign", 42);
        assert_eq!(descriptor.format, "raw");
        assert_eq!(descriptor.capacity_bytes, 42);
    }

    #[test]
    fn xml_carries_name_capacity_and_format() {
        let xml = VolumeDescriptor::raw("worker-0.ign", 1024).to_xml();
        assert_eq!(
            xml,
            concat!(
                "<volume><name>worker-0.ign</name>",
                "<capacity unit=\"bytes\">1024</capacity>",
                "<target><format type=\"raw\"/>",
                "<permissions><mode>0644</mode></permissions></target>",
                "</volume>"
            )
        );
    }

    #[rstest]
    #[case("a&b", "a&amp;b")]
    #[case("<x>", "&lt;x&gt;")]
    #[case("it's \"q\"", "it&apos;s &quot;q&quot;")]
    #[case("plain", "plain")]
    fn escape_xml_handles_markup(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_xml(input), expected);
    }
}
