use crate::core::error::ClientError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;

/// An XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Base64(Vec<u8>),
    DateTime(String),
    Array(Vec<XmlRpcValue>),
    Struct(Vec<(String, XmlRpcValue)>),
    Nil,
}

impl XmlRpcValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::String(s) | XmlRpcValue::DateTime(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            XmlRpcValue::Int(n) => Some(*n),
            XmlRpcValue::Bool(b) => Some(*b as i64),
            XmlRpcValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            XmlRpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&XmlRpcValue> {
        match self {
            XmlRpcValue::Struct(members) => members.iter().find(|(key, _)| key == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn write(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            XmlRpcValue::String(s) => {
                out.push_str("<string>");
                out.push_str(&escape(s.as_str()));
                out.push_str("</string>");
            }
            XmlRpcValue::Int(n) => {
                // i4 only holds 32 bits; rTorrent accepts i8 for the rest
                let tag = if i32::try_from(*n).is_ok() { "i4" } else { "i8" };
                out.push_str(&format!("<{tag}>{n}</{tag}>"));
            }
            XmlRpcValue::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
            XmlRpcValue::Bool(b) => out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" }),
            XmlRpcValue::Base64(bytes) => {
                out.push_str("<base64>");
                out.push_str(&BASE64.encode(bytes));
                out.push_str("</base64>");
            }
            XmlRpcValue::DateTime(s) => {
                out.push_str("<dateTime.iso8601>");
                out.push_str(&escape(s.as_str()));
                out.push_str("</dateTime.iso8601>");
            }
            XmlRpcValue::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write(out);
                }
                out.push_str("</data></array>");
            }
            XmlRpcValue::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str("<member><name>");
                    out.push_str(&escape(name.as_str()));
                    out.push_str("</name>");
                    value.write(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            XmlRpcValue::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

impl From<&str> for XmlRpcValue {
    fn from(s: &str) -> Self {
        XmlRpcValue::String(s.to_string())
    }
}

impl From<String> for XmlRpcValue {
    fn from(s: String) -> Self {
        XmlRpcValue::String(s)
    }
}

impl From<i64> for XmlRpcValue {
    fn from(n: i64) -> Self {
        XmlRpcValue::Int(n)
    }
}

impl From<bool> for XmlRpcValue {
    fn from(b: bool) -> Self {
        XmlRpcValue::Bool(b)
    }
}

/// Serialize a `<methodCall>` document
pub fn method_call(method: &str, params: &[XmlRpcValue]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        param.write(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn invalid(reason: impl Into<String>) -> ClientError {
    ClientError::Validation(format!("Malformed XML-RPC response: {}", reason.into()))
}

/// Parse a `<methodResponse>` document
///
/// A `<fault>` becomes `ClientError::Fault`; a normal reply yields the first
/// `<param>` value (or `Nil` for an empty `<params/>`).
pub fn parse_response(xml: &str) -> Result<XmlRpcValue, ClientError> {
    let mut parser = Parser::new(xml);

    parser.expect_start("methodResponse")?;
    match parser.next_tag()? {
        Tag::Start(name) if name == "params" => {
            let value = match parser.next_tag()? {
                Tag::Start(name) if name == "param" => {
                    parser.expect_start("value")?;
                    let value = parser.value_body()?;
                    parser.expect_end("param")?;
                    value
                }
                Tag::End(name) if name == "params" => return Ok(XmlRpcValue::Nil),
                other => return Err(invalid(format!("unexpected {:?} in <params>", other))),
            };
            Ok(value)
        }
        Tag::Empty(name) if name == "params" => Ok(XmlRpcValue::Nil),
        Tag::Start(name) if name == "fault" => {
            parser.expect_start("value")?;
            let fault = parser.value_body()?;
            let code = fault.member("faultCode").and_then(XmlRpcValue::as_i64).unwrap_or(0);
            let message = fault
                .member("faultString")
                .and_then(XmlRpcValue::as_str)
                .unwrap_or("")
                .to_string();
            Err(ClientError::Fault { code, message })
        }
        other => Err(invalid(format!("unexpected {:?} after <methodResponse>", other))),
    }
}

#[derive(Debug, PartialEq)]
enum Tag {
    Start(String),
    End(String),
    Empty(String),
    Text(String),
    Eof,
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
    peeked: Option<Tag>,
}

impl<'a> Parser<'a> {
    fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
            peeked: None,
        }
    }

    /// Next raw token; adjacent text, CDATA and entity refs are merged
    fn next_raw(&mut self) -> Result<Tag, ClientError> {
        if let Some(tag) = self.peeked.take() {
            return Ok(tag);
        }

        let mut text: Option<String> = None;
        loop {
            let event = self.reader.read_event().map_err(|e| invalid(e.to_string()))?;
            let tag = match event {
                Event::Start(e) => Tag::Start(tag_name(e.name().as_ref())?),
                Event::End(e) => Tag::End(tag_name(e.name().as_ref())?),
                Event::Empty(e) => Tag::Empty(tag_name(e.name().as_ref())?),
                Event::Text(t) => {
                    let raw = std::str::from_utf8(&t).map_err(|e| invalid(e.to_string()))?;
                    let decoded = unescape(raw).map_err(|e| invalid(e.to_string()))?;
                    text.get_or_insert_with(String::new).push_str(&decoded);
                    continue;
                }
                Event::CData(c) => {
                    let raw = std::str::from_utf8(&c).map_err(|e| invalid(e.to_string()))?;
                    text.get_or_insert_with(String::new).push_str(raw);
                    continue;
                }
                Event::GeneralRef(r) => {
                    let name = std::str::from_utf8(&r).map_err(|e| invalid(e.to_string()))?;
                    let entity = format!("&{};", name);
                    let decoded = unescape(&entity).map_err(|e| invalid(e.to_string()))?;
                    text.get_or_insert_with(String::new).push_str(&decoded);
                    continue;
                }
                Event::Eof => Tag::Eof,
                // declarations, comments, processing instructions
                _ => continue,
            };

            return Ok(match text.take() {
                Some(collected) => {
                    self.peeked = Some(tag);
                    Tag::Text(collected)
                }
                None => tag,
            });
        }
    }

    /// Next structural token, skipping whitespace between elements
    fn next_tag(&mut self) -> Result<Tag, ClientError> {
        loop {
            match self.next_raw()? {
                Tag::Text(t) if t.trim().is_empty() => continue,
                tag => return Ok(tag),
            }
        }
    }

    fn expect_start(&mut self, expected: &str) -> Result<(), ClientError> {
        match self.next_tag()? {
            Tag::Start(name) if name == expected => Ok(()),
            other => Err(invalid(format!("expected <{}>, found {:?}", expected, other))),
        }
    }

    fn expect_end(&mut self, expected: &str) -> Result<(), ClientError> {
        match self.next_tag()? {
            Tag::End(name) if name == expected => Ok(()),
            other => Err(invalid(format!("expected </{}>, found {:?}", expected, other))),
        }
    }

    /// Text content up to the closing `</name>`; empty when there is none
    fn text_until_end(&mut self, name: &str) -> Result<String, ClientError> {
        match self.next_raw()? {
            Tag::Text(text) => {
                self.expect_end(name)?;
                Ok(text)
            }
            Tag::End(end) if end == name => Ok(String::new()),
            other => Err(invalid(format!("expected text in <{}>, found {:?}", name, other))),
        }
    }

    /// Parse what follows an opened `<value>`, consuming its `</value>`
    fn value_body(&mut self) -> Result<XmlRpcValue, ClientError> {
        match self.next_raw()? {
            // untyped value defaults to string
            Tag::End(name) if name == "value" => Ok(XmlRpcValue::String(String::new())),
            Tag::Text(text) => match self.next_raw()? {
                Tag::End(name) if name == "value" => Ok(XmlRpcValue::String(text)),
                Tag::Start(name) if text.trim().is_empty() => self.typed_value(&name),
                Tag::Empty(name) if text.trim().is_empty() => self.empty_value(&name),
                other => Err(invalid(format!("unexpected {:?} in <value>", other))),
            },
            Tag::Start(name) => self.typed_value(&name),
            Tag::Empty(name) => self.empty_value(&name),
            other => Err(invalid(format!("unexpected {:?} in <value>", other))),
        }
    }

    fn empty_value(&mut self, name: &str) -> Result<XmlRpcValue, ClientError> {
        let value = match name {
            "nil" => XmlRpcValue::Nil,
            "string" => XmlRpcValue::String(String::new()),
            "array" => XmlRpcValue::Array(Vec::new()),
            "struct" => XmlRpcValue::Struct(Vec::new()),
            "base64" => XmlRpcValue::Base64(Vec::new()),
            other => return Err(invalid(format!("empty <{}/> has no value", other))),
        };
        self.expect_end("value")?;
        Ok(value)
    }

    fn typed_value(&mut self, name: &str) -> Result<XmlRpcValue, ClientError> {
        let value = match name {
            "string" => XmlRpcValue::String(self.text_until_end(name)?),
            "i4" | "int" | "i8" => {
                let text = self.text_until_end(name)?;
                let n = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(format!("bad integer {:?}", text)))?;
                XmlRpcValue::Int(n)
            }
            "double" => {
                let text = self.text_until_end(name)?;
                let d = text
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("bad double {:?}", text)))?;
                XmlRpcValue::Double(d)
            }
            "boolean" => {
                let text = self.text_until_end(name)?;
                match text.trim() {
                    "1" => XmlRpcValue::Bool(true),
                    "0" => XmlRpcValue::Bool(false),
                    other => return Err(invalid(format!("bad boolean {:?}", other))),
                }
            }
            "base64" => {
                let text = self.text_until_end(name)?;
                let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = BASE64
                    .decode(cleaned.as_bytes())
                    .map_err(|e| invalid(format!("bad base64: {}", e)))?;
                XmlRpcValue::Base64(bytes)
            }
            "dateTime.iso8601" => XmlRpcValue::DateTime(self.text_until_end(name)?),
            "array" => {
                let mut items = Vec::new();
                match self.next_tag()? {
                    Tag::Start(data) if data == "data" => loop {
                        match self.next_tag()? {
                            Tag::Start(v) if v == "value" => items.push(self.value_body()?),
                            Tag::End(data) if data == "data" => break,
                            other => return Err(invalid(format!("unexpected {:?} in <data>", other))),
                        }
                    },
                    Tag::Empty(data) if data == "data" => {}
                    other => return Err(invalid(format!("expected <data>, found {:?}", other))),
                }
                self.expect_end("array")?;
                XmlRpcValue::Array(items)
            }
            "struct" => {
                let mut members = Vec::new();
                loop {
                    match self.next_tag()? {
                        Tag::Start(m) if m == "member" => {
                            self.expect_start("name")?;
                            let member_name = self.text_until_end("name")?;
                            self.expect_start("value")?;
                            let value = self.value_body()?;
                            self.expect_end("member")?;
                            members.push((member_name, value));
                        }
                        Tag::End(s) if s == "struct" => break,
                        other => return Err(invalid(format!("unexpected {:?} in <struct>", other))),
                    }
                }
                XmlRpcValue::Struct(members)
            }
            other => return Err(invalid(format!("unknown value type <{}>", other))),
        };
        self.expect_end("value")?;
        Ok(value)
    }
}

fn tag_name(raw: &[u8]) -> Result<String, ClientError> {
    std::str::from_utf8(raw)
        .map(String::from)
        .map_err(|e| invalid(e.to_string()))
}
