//! CLI tool for PDF text extraction and field redaction

use pdf_redactor::{
    extract_text, list_form_fields, redact_by_geometry, redact_field_with, redact_form_field,
    redact_pdf, FieldKind, FormField, RedactConfig, Redaction, Strategy, COMMON_FIELDS,
};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::process;
use std::time::Instant;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <pdf_file> text [field] [--json]", program);
    eprintln!("       {} <pdf_file> form|geometry|auto <field> <output.pdf> [--json]", program);
    eprintln!("       {} <pdf_file> fields [--json]", program);
    eprintln!();
    eprintln!("text      print reconstructed text, masking <field> when given");
    eprintln!("form      mask matching AcroForm fields and flatten the form");
    eprintln!("geometry  cover values after '<field>:' labels with black boxes");
    eprintln!("auto      form first, geometry when no form field matches");
    eprintln!("fields    list form fields");
    eprintln!();
    eprintln!("Common fields: {}", COMMON_FIELDS.join(", "));
    process::exit(1);
}

fn text_json(text: &str) -> Value {
    json!({
        "length": text.chars().count(),
        "text": text,
    })
}

fn field_json(field: &FormField) -> Value {
    json!({
        "name": field.name,
        "kind": kind_label(&field.kind),
        "value": field.value.as_deref().unwrap_or(""),
        "aliases": field.aliases,
    })
}

fn fail(e: impl std::fmt::Display, json_output: bool) -> ! {
    if json_output {
        println!("{}", json!({ "error": e.to_string() }));
    } else {
        eprintln!("Error: {}", e);
    }
    process::exit(1);
}

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let json_output = args.iter().any(|a| a == "--json");
    args.retain(|a| a != "--json");

    if args.len() < 3 {
        usage(&args[0]);
    }

    let pdf_path = &args[1];
    let command = args[2].as_str();
    let config = RedactConfig::default();

    match command {
        "text" => {
            let text = extract_text(pdf_path).unwrap_or_else(|e| fail(e, json_output));
            let text = match args.get(3) {
                Some(field) => redact_field_with(&text, field, &config.text_mask_policy()),
                None => text,
            };
            if json_output {
                println!("{}", text_json(&text));
            } else {
                println!("{}", text);
            }
        }
        "fields" => {
            let buffer = fs::read(pdf_path).unwrap_or_else(|e| fail(e, json_output));
            let fields = list_form_fields(&buffer).unwrap_or_else(|e| fail(e, json_output));
            if json_output {
                let items: Vec<Value> = fields.iter().map(field_json).collect();
                println!("{}", Value::Array(items));
            } else if fields.is_empty() {
                println!("No form fields");
            } else {
                for f in &fields {
                    println!(
                        "{:<30} {:<8} {:?}",
                        f.name,
                        kind_label(&f.kind),
                        f.value.as_deref().unwrap_or("")
                    );
                    for alias in &f.aliases {
                        println!("{:<30} alias: {}", "", alias);
                    }
                }
            }
        }
        "form" | "geometry" | "auto" => {
            let (Some(field), Some(output)) = (args.get(3), args.get(4)) else {
                usage(&args[0]);
            };
            let start = Instant::now();
            let (result, strategy) = match command {
                "form" => (
                    redact_form_field(pdf_path, field, &config),
                    Some(Strategy::Form),
                ),
                "geometry" => (
                    redact_by_geometry(pdf_path, field, &config),
                    Some(Strategy::Geometry),
                ),
                _ => match redact_pdf(pdf_path, field, &config) {
                    Ok((redaction, strategy)) => (Ok(redaction), strategy),
                    Err(e) => (Err(e), None),
                },
            };
            let redaction: Redaction = result.unwrap_or_else(|e| fail(e, json_output));
            fs::write(output, &redaction.bytes).unwrap_or_else(|e| fail(e, json_output));

            let strategy = if redaction.found {
                match strategy {
                    Some(Strategy::Form) => "form",
                    Some(Strategy::Geometry) => "geometry",
                    None => "none",
                }
            } else {
                "none"
            };
            let elapsed = start.elapsed().as_millis() as u64;

            if json_output {
                let summary = json!({
                    "found": redaction.found,
                    "strategy": strategy,
                    "output": output,
                    "bytes": redaction.bytes.len(),
                    "processing_time_ms": elapsed,
                });
                println!("{}", summary);
            } else {
                println!("PDF Redaction");
                println!("=============");
                println!("File: {}", pdf_path);
                println!("Field: {}", field);
                println!(
                    "Result: {}",
                    if redaction.found {
                        "MASKED"
                    } else {
                        "NOT FOUND (output unchanged)"
                    }
                );
                println!("Strategy: {}", strategy);
                println!("Written to: {} ({} bytes)", output, redaction.bytes.len());
                println!("Processing time: {}ms", elapsed);
            }
            if !redaction.found {
                process::exit(2);
            }
        }
        _ => usage(&args[0]),
    }
}

fn kind_label(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Choice { combo: true, .. } => "combo",
        FieldKind::Choice { .. } => "list",
        FieldKind::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_json_escapes_control_characters() {
        let value = text_json("Page\u{c}Break\u{1}");
        let line = value.to_string();
        assert!(!line.chars().any(|c| c.is_control()));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["text"], "Page\u{c}Break\u{1}");
        assert_eq!(parsed["length"], 11);
    }
}
