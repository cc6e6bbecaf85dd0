use crate::counter;
use crate::event::{ErrorRecord, Event};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fmt;

/// Title used for payloads which could not be decoded
pub static RAW_TITLE: &str = "Production error";

/// Issue title without occurrence counter. This is the identity key for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalTitle(String);

impl CanonicalTitle {
    /// Trims whitespace and removes any trailing counter suffixes so that the result can never
    /// be mistaken for an already counted title.
    pub fn new(s: &str) -> Self {
        let mut t = s.trim();
        while let Some(stripped) = counter::strip_suffix(t) {
            t = stripped.trim_end();
        }
        Self(t.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Abstract issue representation derived from a single event.
///
/// This will be picked up by the issuer to create or bump a concrete issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub title: CanonicalTitle,
    pub body: String,
    /// Service label of the originating event, if any
    pub service: Option<String>,
}

impl Ticket {
    /// Messages which differ only by a trailing `(N)` get the same title and thus share an issue.
    pub fn new(event: &Event, env_tag: &str) -> Self {
        match event {
            Event::Error(rec) => Self::from_record(rec, env_tag),
            Event::Raw(raw) => Self {
                title: CanonicalTitle::new(RAW_TITLE),
                body: raw.text.clone(),
                service: None,
            },
        }
    }

    fn from_record(rec: &ErrorRecord, env_tag: &str) -> Self {
        Self {
            title: CanonicalTitle::new(&format!("{} err: {}", env_tag, rec.message.trim())),
            body: render_body(&rec.stack_trace, &rec.context),
            service: rec.service_id.clone(),
        }
    }
}

impl fmt::Display for Ticket {
    /// Normal Display: only ticket body
    /// Alternate Display: headline + body
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "{}\n", self.title)?;
        }
        write!(f, "{}", self.body)
    }
}

/// Indented JSON, one space per level
fn pretty<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b" "));
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Stack trace and local variables as markdown. Falls back to the `Debug` representation of the
/// locals if they cannot be serialized.
pub fn render_body<C: Serialize + fmt::Debug>(stack: &str, locals: &C) -> String {
    let locals = match pretty(locals) {
        Ok(json) => format!("```json\n{}\n```", json),
        Err(e) => {
            warn!("Cannot serialize locals, using fallback rendering: {}", e);
            format!("(Couldn't serialize locals properly...)\n```\n{:?}\n```", locals)
        }
    };
    format!("## Stack:\n```\n{}\n```\n## Locals:\n{}\n", stack.trim_end(), locals)
}

// === Tests ===

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::RawRecord;
    use maplit::{btreemap, hashmap};
    use serde_json::json;

    fn record(message: &str) -> ErrorRecord {
        ErrorRecord {
            message: message.to_owned(),
            stack_trace: "main.go:12\nhandler.go:40\n".to_owned(),
            context: btreemap! {
                "user".to_owned() => json!(42),
                "cart".to_owned() => json!({"items": ["a"]}),
            },
            service_id: Some("billing".to_owned()),
            ..ErrorRecord::default()
        }
    }

    #[test]
    fn title_from_record() {
        let tkt = Ticket::new(&Event::Error(record("boom")), "prod");
        assert_eq!(tkt.title.as_str(), "prod err: boom");
        assert_eq!(tkt.service.as_deref(), Some("billing"));
        let tkt = Ticket::new(&Event::Error(record("  boom\n")), "staging");
        assert_eq!(tkt.title.as_str(), "staging err: boom");
    }

    #[test]
    fn rendered_ticket() {
        let tkt = Ticket::new(&Event::Error(record("boom")), "prod");
        let out = format!("{:#}", tkt);
        println!("{}", out);
        assert_eq!(
            out,
            "\
prod err: boom\n\
\n\
## Stack:\n\
```\n\
main.go:12\n\
handler.go:40\n\
```\n\
## Locals:\n\
```json\n\
{\n \"cart\": {\n  \"items\": [\n   \"a\"\n  ]\n },\n \"user\": 42\n}\n\
```\n"
        );
        assert_eq!(tkt.to_string(), tkt.body);
    }

    #[test]
    fn raw_record() {
        let raw = Event::Raw(RawRecord {
            text: "panic: oh no\n".to_owned(),
        });
        let tkt = Ticket::new(&raw, "prod");
        assert_eq!(tkt.title.as_str(), "Production error");
        assert_eq!(tkt.body, "panic: oh no\n");
        assert_eq!(tkt.service, None);
    }

    #[test]
    fn unserializable_locals_fall_back() {
        // JSON object keys must be strings
        let locals = hashmap! { (1, 2) => "pair" };
        let body = render_body("main.go:12", &locals);
        assert!(body.starts_with("## Stack:\n```\nmain.go:12\n```\n## Locals:\n"));
        assert!(body.contains("(Couldn't serialize locals properly...)"));
        assert!(body.contains("{(1, 2): \"pair\"}"), "body: {}", body);
    }

    #[test]
    fn empty_locals() {
        let locals: std::collections::BTreeMap<String, u8> = Default::default();
        let body = render_body("", &locals);
        assert!(body.ends_with("## Locals:\n```json\n{}\n```\n"), "body: {}", body);
    }

    #[test]
    fn title_never_carries_counter() {
        assert_eq!(CanonicalTitle::new("prod err: boom (3)").as_str(), "prod err: boom");
        assert_eq!(
            CanonicalTitle::new("prod err: boom (3) (4) ").as_str(),
            "prod err: boom"
        );
        assert_eq!(
            CanonicalTitle::new("prod err: f(x) (len 2)").as_str(),
            "prod err: f(x) (len 2)"
        );
        let tkt = Ticket::new(&Event::Error(record("retry failed (2)")), "prod");
        assert_eq!(tkt.title.as_str(), "prod err: retry failed");
    }
}
