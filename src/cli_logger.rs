use anyhow::Result;
use perfassess::AssessmentSummary;
use serde::Serialize;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    pub fn print_summary(&self, summary: &AssessmentSummary) -> Result<()> {
        if self.json {
            return self.print_serialized(summary);
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("perfassess", "36;1"),
            self.style(&summary.function, "37;1"),
            self.style("OK", "32;1")
        ));
        for chart in &summary.charts {
            out.push_str(&format!(
                "{} rows={} metrics={}\n",
                self.style(&chart.name, "90"),
                chart.rows,
                chart.metrics.join(", ")
            ));
            if let Some(path) = &chart.path {
                out.push_str(&format!("  {} {path}\n", self.style("wrote", "90")));
            }
        }
        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}
