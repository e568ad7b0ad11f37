//! Response-control documents (TwiML) returned to the telephony platform.
//!
//! Handlers build a [`VoiceResponse`] from verbs and return it directly; it
//! renders as `text/xml`. Text and attribute values are escaped, so prompt
//! wording and completion output can be passed through unchanged. Characters
//! XML forbids become spaces. Attributes are always double-quoted, so
//! apostrophes are left as they are.

use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use std::fmt::Write;

/// `<Record>` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Recording-complete callback target.
    pub action: String,
    pub max_length: u32,
    pub finish_on_key: String,
    /// Seconds of silence that end the recording.
    pub timeout: u32,
    /// Asynchronous transcript callback; `None` disables platform transcription.
    pub transcribe_callback: Option<String>,
}

/// `<Gather>` parameters with the prompt spoken while waiting for input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    pub action: String,
    pub num_digits: u32,
    pub timeout: u32,
    pub prompt: Option<Say>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Say {
    pub text: String,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(Say),
    Pause { length: u32 },
    Record(Record),
    Redirect { url: String },
    Gather(Gather),
    Hangup,
}

/// An ordered list of verbs executed by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>, voice: Option<&str>) -> Self {
        self.verbs.push(Verb::Say(Say {
            text: text.into(),
            voice: voice.filter(|v| !v.is_empty()).map(str::to_string),
        }));
        self
    }

    pub fn pause(mut self, length: u32) -> Self {
        if length > 0 {
            self.verbs.push(Verb::Pause { length });
        }
        self
    }

    pub fn record(mut self, record: Record) -> Self {
        self.verbs.push(Verb::Record(record));
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect { url: url.into() });
        self
    }

    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(gather));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Returns `true` if the document ends the call.
    pub fn hangs_up(&self) -> bool {
        self.verbs.iter().any(|verb| matches!(verb, Verb::Hangup))
    }

    /// Texts of all top-level `<Say>` verbs, in order.
    pub fn spoken(&self) -> Vec<&str> {
        self.verbs
            .iter()
            .filter_map(|verb| match verb {
                Verb::Say(say) => Some(say.text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        if self.verbs.is_empty() {
            out.push_str("<Response/>");
            return out;
        }
        out.push_str("<Response>");
        for verb in &self.verbs {
            render_verb(&mut out, verb);
        }
        out.push_str("</Response>");
        out
    }
}

impl IntoResponse for VoiceResponse {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.render()).into_response()
    }
}

fn render_say(out: &mut String, say: &Say) {
    match &say.voice {
        Some(voice) => {
            let _ = write!(out, r#"<Say voice="{}">"#, escape(voice));
        }
        None => out.push_str("<Say>"),
    }
    out.push_str(&escape(&say.text));
    out.push_str("</Say>");
}

fn render_verb(out: &mut String, verb: &Verb) {
    match verb {
        Verb::Say(say) => render_say(out, say),
        Verb::Pause { length } => {
            let _ = write!(out, r#"<Pause length="{}"/>"#, length);
        }
        Verb::Record(record) => {
            let _ = write!(
                out,
                r#"<Record action="{}" method="POST" maxLength="{}" finishOnKey="{}" timeout="{}""#,
                escape(&record.action),
                record.max_length,
                escape(&record.finish_on_key),
                record.timeout
            );
            if let Some(callback) = &record.transcribe_callback {
                let _ = write!(
                    out,
                    r#" transcribe="true" transcribeCallback="{}""#,
                    escape(callback)
                );
            }
            out.push_str("/>");
        }
        Verb::Redirect { url } => {
            let _ = write!(out, r#"<Redirect method="POST">{}</Redirect>"#, escape(url));
        }
        Verb::Gather(gather) => {
            let _ = write!(
                out,
                r#"<Gather action="{}" method="POST" numDigits="{}" timeout="{}">"#,
                escape(&gather.action),
                gather.num_digits,
                gather.timeout
            );
            if let Some(prompt) = &gather.prompt {
                render_say(out, prompt);
            }
            out.push_str("</Gather>");
        }
        Verb::Hangup => out.push_str("<Hangup/>"),
    }
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\t' | '\n' | '\r' => escaped.push(c),
            // Not allowed anywhere in an XML 1.0 document.
            c if c < ' ' || c == '\u{FFFE}' || c == '\u{FFFF}' => escaped.push(' '),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_self_closing() {
        assert_eq!(
            VoiceResponse::new().render(),
            r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#
        );
    }

    #[test]
    fn renders_record_with_transcription() {
        let doc = VoiceResponse::new()
            .say("Leave a message.", None)
            .record(Record {
                action: "https://calls.example.com/process".into(),
                max_length: 60,
                finish_on_key: "#".into(),
                timeout: 5,
                transcribe_callback: Some("https://calls.example.com/transcription".into()),
            })
            .render();

        assert!(doc.contains("<Say>Leave a message.</Say>"));
        assert!(doc.contains(
            r##"<Record action="https://calls.example.com/process" method="POST" maxLength="60" finishOnKey="#" timeout="5" transcribe="true" transcribeCallback="https://calls.example.com/transcription"/>"##
        ));
    }

    #[test]
    fn record_without_callback_omits_transcribe() {
        let doc = VoiceResponse::new()
            .record(Record {
                action: "/process".into(),
                max_length: 30,
                finish_on_key: "#".into(),
                timeout: 5,
                transcribe_callback: None,
            })
            .render();
        assert!(!doc.contains("transcribe"));
    }

    #[test]
    fn replaces_characters_xml_forbids() {
        let doc = VoiceResponse::new()
            .say("bad\u{1}\u{b}char\u{FFFF}\tend\nline", None)
            .render();
        assert!(
            doc.contains("<Say>bad  char \tend\nline</Say>"),
            "{doc:?}"
        );
        assert!(!doc.chars().any(|c| c < ' ' && !matches!(c, '\t' | '\n' | '\r')));
    }

    #[test]
    fn escapes_text_and_attributes() {
        let doc = VoiceResponse::new()
            .say("Tom & Jerry <3 \"quotes\"", Some("alice"))
            .redirect("/wait-for-processing?attempt=2&call_id=CA1")
            .render();
        assert!(doc.contains(
            r#"<Say voice="alice">Tom &amp; Jerry &lt;3 &quot;quotes&quot;</Say>"#
        ));
        assert!(doc.contains(
            r#"<Redirect method="POST">/wait-for-processing?attempt=2&amp;call_id=CA1</Redirect>"#
        ));

        let doc = VoiceResponse::new().say("I'm here", None).render();
        assert!(doc.contains("<Say>I'm here</Say>"));
    }

    #[test]
    fn gather_nests_its_prompt() {
        let doc = VoiceResponse::new()
            .gather(Gather {
                action: "/handle-additional-input?turn=1".into(),
                num_digits: 1,
                timeout: 5,
                prompt: Some(Say {
                    text: "Press 1.".into(),
                    voice: None,
                }),
            })
            .say("Goodbye.", None)
            .hangup()
            .render();
        assert!(doc.contains(
            r#"<Gather action="/handle-additional-input?turn=1" method="POST" numDigits="1" timeout="5"><Say>Press 1.</Say></Gather><Say>Goodbye.</Say><Hangup/>"#
        ));
    }

    #[test]
    fn zero_pause_is_dropped_and_helpers_report_content() {
        let doc = VoiceResponse::new().say("a", Some("")).pause(0).say("b", None).hangup();
        assert_eq!(doc.verbs().len(), 3);
        assert_eq!(doc.spoken(), vec!["a", "b"]);
        assert!(doc.hangs_up());
        assert!(doc.render().contains("<Say>a</Say>"));
    }
}
