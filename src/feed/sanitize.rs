//! Pre-parse repair of feed XML.
//!
//! Real-world feeds routinely carry HTML named entities (`&nbsp;`,
//! `&eacute;`) and bare ampersands, both fatal to a strict XML parser.
//! [`sanitize_xml`] rewrites known named entities to numeric character
//! references and escapes every ampersand that does not start a valid XML
//! reference. CDATA sections are passed through untouched.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Entities predefined by XML itself.
const XML_ENTITIES: &[&str] = &["amp", "lt", "gt", "quot", "apos"];

/// HTML named entities rewritten to numeric references.
const HTML_ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("iexcl", 161),
    ("cent", 162),
    ("pound", 163),
    ("curren", 164),
    ("yen", 165),
    ("brvbar", 166),
    ("sect", 167),
    ("uml", 168),
    ("copy", 169),
    ("ordf", 170),
    ("laquo", 171),
    ("not", 172),
    ("shy", 173),
    ("reg", 174),
    ("macr", 175),
    ("deg", 176),
    ("plusmn", 177),
    ("sup2", 178),
    ("sup3", 179),
    ("acute", 180),
    ("micro", 181),
    ("para", 182),
    ("middot", 183),
    ("cedil", 184),
    ("sup1", 185),
    ("ordm", 186),
    ("raquo", 187),
    ("frac14", 188),
    ("frac12", 189),
    ("frac34", 190),
    ("iquest", 191),
    ("Agrave", 192),
    ("Aacute", 193),
    ("Acirc", 194),
    ("Atilde", 195),
    ("Auml", 196),
    ("Aring", 197),
    ("AElig", 198),
    ("Ccedil", 199),
    ("Egrave", 200),
    ("Eacute", 201),
    ("Ecirc", 202),
    ("Euml", 203),
    ("Igrave", 204),
    ("Iacute", 205),
    ("Icirc", 206),
    ("Iuml", 207),
    ("ETH", 208),
    ("Ntilde", 209),
    ("Ograve", 210),
    ("Oacute", 211),
    ("Ocirc", 212),
    ("Otilde", 213),
    ("Ouml", 214),
    ("times", 215),
    ("Oslash", 216),
    ("Ugrave", 217),
    ("Uacute", 218),
    ("Ucirc", 219),
    ("Uuml", 220),
    ("Yacute", 221),
    ("THORN", 222),
    ("szlig", 223),
    ("agrave", 224),
    ("aacute", 225),
    ("acirc", 226),
    ("atilde", 227),
    ("auml", 228),
    ("aring", 229),
    ("aelig", 230),
    ("ccedil", 231),
    ("egrave", 232),
    ("eacute", 233),
    ("ecirc", 234),
    ("euml", 235),
    ("igrave", 236),
    ("iacute", 237),
    ("icirc", 238),
    ("iuml", 239),
    ("eth", 240),
    ("ntilde", 241),
    ("ograve", 242),
    ("oacute", 243),
    ("ocirc", 244),
    ("otilde", 245),
    ("ouml", 246),
    ("divide", 247),
    ("oslash", 248),
    ("ugrave", 249),
    ("uacute", 250),
    ("ucirc", 251),
    ("uuml", 252),
    ("yacute", 253),
    ("thorn", 254),
    ("yuml", 255),
    ("OElig", 338),
    ("oelig", 339),
    ("Scaron", 352),
    ("scaron", 353),
    ("Yuml", 376),
    ("fnof", 402),
    ("circ", 710),
    ("tilde", 732),
    ("ensp", 8194),
    ("emsp", 8195),
    ("thinsp", 8201),
    ("zwnj", 8204),
    ("zwj", 8205),
    ("lrm", 8206),
    ("rlm", 8207),
    ("ndash", 8211),
    ("mdash", 8212),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("sbquo", 8218),
    ("ldquo", 8220),
    ("rdquo", 8221),
    ("bdquo", 8222),
    ("dagger", 8224),
    ("Dagger", 8225),
    ("bull", 8226),
    ("hellip", 8230),
    ("permil", 8240),
    ("prime", 8242),
    ("Prime", 8243),
    ("lsaquo", 8249),
    ("rsaquo", 8250),
    ("euro", 8364),
    ("trade", 8482),
    ("larr", 8592),
    ("uarr", 8593),
    ("rarr", 8594),
    ("darr", 8595),
    ("harr", 8596),
    ("minus", 8722),
    ("le", 8804),
    ("ge", 8805),
    ("ne", 8800),
    ("infin", 8734),
];

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?")
            .expect("entity regex is valid")
    })
}

/// Look up the code point of an HTML named entity.
pub fn named_entity(name: &str) -> Option<u32> {
    HTML_ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .map(|(_, code)| *code)
}

/// Whether a numeric reference body (`#65`, `#x41`) is a legal XML character.
fn is_valid_char_ref(body: &str) -> bool {
    let code = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        body.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
    };
    match code.and_then(char::from_u32) {
        Some(c) => !c.is_control() || matches!(c, '\t' | '\n' | '\r'),
        None => false,
    }
}

fn rewrite_reference(caps: &Captures<'_>) -> String {
    let Some(reference) = caps.get(1).map(|m| m.as_str()) else {
        return "&amp;".to_string();
    };
    let body = &reference[..reference.len() - 1];

    if body.starts_with('#') {
        if is_valid_char_ref(body) {
            return format!("&{reference}");
        }
        return format!("&amp;{reference}");
    }
    if XML_ENTITIES.contains(&body) {
        return format!("&{reference}");
    }
    match named_entity(body) {
        Some(code) => format!("&#{code};"),
        None => format!("&amp;{reference}"),
    }
}

fn sanitize_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains('&') {
        return Cow::Borrowed(segment);
    }
    reference_regex().replace_all(segment, rewrite_reference)
}

/// Repair entity usage in feed XML so a strict parser accepts it.
pub fn sanitize_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() + 64);
    let mut rest = xml;

    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&sanitize_segment(&rest[..start]));
        let cdata = &rest[start..];
        match cdata.find(CDATA_CLOSE) {
            Some(end) => {
                let end = end + CDATA_CLOSE.len();
                out.push_str(&cdata[..end]);
                rest = &cdata[end..];
            }
            None => {
                // Unterminated CDATA: leave it for the parser to reject.
                out.push_str(cdata);
                rest = "";
            }
        }
    }
    out.push_str(&sanitize_segment(rest));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_entities_become_numeric() {
        assert_eq!(sanitize_xml("A&nbsp;B"), "A&#160;B");
        assert_eq!(sanitize_xml("caf&eacute;"), "caf&#233;");
        assert_eq!(sanitize_xml("&mdash;&hellip;"), "&#8212;&#8230;");
    }

    #[test]
    fn test_bare_ampersand_is_escaped() {
        assert_eq!(sanitize_xml("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(sanitize_xml("a=1&b=2"), "a=1&amp;b=2");
        assert_eq!(sanitize_xml("trailing &"), "trailing &amp;");
    }

    #[test]
    fn test_valid_references_untouched() {
        let valid = "&amp; &lt; &gt; &quot; &apos; &#65; &#x41; &#X3042;";
        assert_eq!(sanitize_xml(valid), valid);
    }

    #[test]
    fn test_unknown_named_entity_is_escaped() {
        assert_eq!(sanitize_xml("&bogus;"), "&amp;bogus;");
    }

    #[test]
    fn test_invalid_numeric_reference_is_escaped() {
        assert_eq!(sanitize_xml("&#0;"), "&amp;#0;");
        assert_eq!(sanitize_xml("&#xD800;"), "&amp;#xD800;");
    }

    #[test]
    fn test_sanitize_is_stable() {
        let once = sanitize_xml("Tom & Jerry&nbsp;&amp; friends");
        assert_eq!(sanitize_xml(&once), once);
    }

    #[test]
    fn test_cdata_is_left_alone() {
        let xml = "<d><![CDATA[a & b &nbsp; c]]></d> & <e>&eacute;</e>";
        assert_eq!(
            sanitize_xml(xml),
            "<d><![CDATA[a & b &nbsp; c]]></d> &amp; <e>&#233;</e>"
        );
    }

    #[test]
    fn test_named_entity_lookup_is_case_sensitive() {
        assert_eq!(named_entity("Eacute"), Some(201));
        assert_eq!(named_entity("eacute"), Some(233));
        assert_eq!(named_entity("EACUTE"), None);
    }
}
