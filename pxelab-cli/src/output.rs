//! Output formatting abstraction for text vs JSON rendering
//!
//! All subcommand output flows through [`OutputWriter`], which keeps format
//! switching out of command handlers.

use std::io::Write;

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Writes CLI payloads in the selected format.
///
/// Payloads implement both `Serialize` (for JSON) and [`Render`] (for text).
pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render a payload to stdout.
    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<(), CliError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        self.write_to(&mut handle, payload)
    }

    /// Render a payload to an arbitrary writer.
    pub fn write_to<T: Render + Serialize>(
        &self,
        w: &mut dyn Write,
        payload: &T,
    ) -> Result<(), CliError> {
        match self.format {
            OutputFormat::Text => payload.render_text(w)?,
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut *w, payload)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Human-readable text rendering.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestPayload {
        name: String,
        count: u32,
    }

    impl Render for TestPayload {
        fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
            writeln!(w, "Name:  {}", self.name)?;
            writeln!(w, "Count: {}", self.count)
        }
    }

    fn payload() -> TestPayload {
        TestPayload {
            name: "lab".to_owned(),
            count: 3,
        }
    }

    #[test]
    fn test_text_format_uses_render() {
        let writer = OutputWriter::new(OutputFormat::Text);
        let mut buffer = Vec::new();
        writer.write_to(&mut buffer, &payload()).expect("render");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.contains("Name:  lab"));
        assert!(output.contains("Count: 3"));
    }

    #[test]
    fn test_json_format_is_pretty_and_newline_terminated() {
        let writer = OutputWriter::new(OutputFormat::Json);
        let mut buffer = Vec::new();
        writer.write_to(&mut buffer, &payload()).expect("render");

        let output = String::from_utf8(buffer).expect("valid UTF-8");
        assert!(output.ends_with('\n'));
        assert!(output.contains("  \"name\""), "pretty JSON should be indented");
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid JSON");
        assert_eq!(parsed["count"].as_u64(), Some(3));
    }
}
