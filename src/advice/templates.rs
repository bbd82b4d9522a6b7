//! Message and name templates for synthesized advices.
//!
//! Templates are parsed once at synthesis time and evaluated lazily against
//! the live invocation, only if the owning hook actually runs. Placeholders:
//! `{{methodName}}`, `{{className}}`, `{{this}}`, `{{returnValue}}` and
//! `{{argN}}`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9]+)\s*\}\}").expect("placeholder regex"));

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unknown template placeholder {placeholder:?} in template {template:?}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    MethodName,
    ClassName,
    This,
    ReturnValue,
    Arg(usize),
}

/// A parsed message/name template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

/// The live values a template renders against. All fields are borrowed; the
/// template clones nothing until rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateContext<'a> {
    pub method_name: &'a str,
    pub class_name: &'a str,
    pub receiver: Option<&'a Value>,
    pub arguments: &'a [Value],
    pub return_value: Option<&'a Value>,
}

impl MessageTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut last_end = 0;

        for capture in PLACEHOLDER.captures_iter(text) {
            let whole = capture.get(0).expect("capture 0 always present");
            let name = &capture[1];

            if whole.start() > last_end {
                segments.push(Segment::Text(text[last_end..whole.start()].to_string()));
            }

            let segment = match name {
                "methodName" => Segment::MethodName,
                "className" => Segment::ClassName,
                "this" => Segment::This,
                "returnValue" => Segment::ReturnValue,
                other => {
                    if let Some(index) = other
                        .strip_prefix("arg")
                        .and_then(|n| n.parse::<usize>().ok())
                    {
                        Segment::Arg(index)
                    } else {
                        return Err(TemplateError::UnknownPlaceholder {
                            template: text.to_string(),
                            placeholder: other.to_string(),
                        });
                    }
                }
            };
            segments.push(segment);
            last_end = whole.end();
        }

        if last_end < text.len() {
            segments.push(Segment::Text(text[last_end..].to_string()));
        }

        Ok(Self {
            source: text.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &TemplateContext<'_>) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::MethodName => out.push_str(ctx.method_name),
                Segment::ClassName => out.push_str(ctx.class_name),
                Segment::This => push_value(&mut out, ctx.receiver),
                Segment::ReturnValue => push_value(&mut out, ctx.return_value),
                Segment::Arg(index) => push_value(&mut out, ctx.arguments.get(*index)),
            }
        }
        out
    }
}

fn push_value(out: &mut String, value: Option<&Value>) {
    match value {
        None | Some(Value::Null) => out.push_str("<none>"),
        Some(Value::String(s)) => out.push_str(s),
        Some(other) => out.push_str(&other.to_string()),
    }
}
