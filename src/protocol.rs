//! Wire-level details of the instrument service's text protocol.
//!
//! The protocol is line oriented: every command is CRLF-terminated, carries a
//! server-side retry budget (`-d<secs>`), and is answered with a single
//! buffered read. The literal response `"0"` is the universal failure
//! sentinel; legend and data responses may contain several CRLF-separated
//! rows in one read.

use tracing::{debug, warn};

/// Protocol line terminator.
pub const TERMINATOR: &str = "\r\n";

/// Universal in-band failure response.
pub const FAILURE_SENTINEL: &str = "0";

/// Highest channel index addressable at the sink.
pub const MAX_CHANNELS: usize = 10;

/// Default mode switch for starting an experiment.
pub const DEFAULT_RUN_MODE: &str = "-Odt";

/// Query the filename currently associated with a session.
pub const FILENAME: &str = "-xFilename";

/// Abort the running experiment.
pub const ABORT: &str = "-xAbort";

/// Close the experiment file.
pub const CLOSE: &str = "-xClose";

/// Open (associate) an experiment file on the receiving session.
pub fn open_file(path: &str) -> String {
    format!("-f\"{path}\"")
}

/// Start the experiment with the given mode switch.
pub fn run(mode: &str) -> String {
    format!("-xGo {mode}")
}

/// Request the column legend of a view.
pub fn legends(view: u32) -> String {
    format!("-lLegends -v{view}")
}

/// Arm the push-style status feed of a view.
pub fn status_link(view: u32) -> String {
    format!("-lStatus -v{view}")
}

/// Poll one data frame of a view.
pub fn data(view: u32) -> String {
    format!("-lData -v{view}")
}

/// Join an experiment file name onto the service-side root directory.
///
/// The control service runs on Windows, so paths are joined with a backslash
/// regardless of the gateway's host platform. Names that are already absolute
/// on the remote side (drive letter, rooted, or an `%ENV%` macro the service
/// expands itself) pass through unchanged.
pub fn join_remote_path(root: &str, name: &str) -> String {
    let absolute = name.starts_with('\\')
        || name.starts_with('%')
        || (name.len() >= 2 && name.as_bytes()[1] == b':');
    if absolute {
        name.to_string()
    } else {
        format!("{}\\{}", root.trim_end_matches('\\'), name)
    }
}

/// Ordered column legend of a view, as returned by a legend query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLegend {
    entries: Vec<String>,
}

impl ChannelLegend {
    /// Parse a raw legend response. Entries arrive joined by CRLF and/or
    /// tabs depending on the view layout.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .replace(TERMINATOR, "\t")
            .split('\t')
            .map(str::to_string)
            .collect();
        Self { entries }
    }

    /// Legend entries in column order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Mass values derived from the entries tagged "mass", in column order.
    ///
    /// The length of this list defines the expected column count of
    /// subsequent data rows for the run.
    pub fn mass_values(&self) -> Vec<f64> {
        self.entries
            .iter()
            .filter(|entry| entry.contains("mass"))
            .filter_map(|entry| {
                let token = entry.split_whitespace().last()?;
                match token.parse::<f64>() {
                    Ok(mass) => Some(mass),
                    Err(_) => {
                        warn!(entry = %entry, "unparsable mass legend entry ignored");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Extract accepted data rows from one `-lData` response.
///
/// Each CRLF-separated line is a candidate row. A line equal to the failure
/// sentinel is discarded — even though a genuine row whose index field is `0`
/// would be indistinguishable, the service's own convention wins here. The
/// first two whitespace-delimited tokens (row index and a timestamp-like
/// field) are dropped; the remainder is accepted only when its length equals
/// `expected`, the mass-channel count established at legend time. Short or
/// long rows are partial frames and are skipped silently.
pub fn parse_data_rows(raw: &str, expected: usize) -> Vec<Vec<f64>> {
    let mut rows = Vec::new();
    if expected == 0 {
        return rows;
    }
    for line in raw.trim().split(TERMINATOR) {
        if line.trim() == FAILURE_SENTINEL {
            continue;
        }
        let values: Vec<&str> = line.split_whitespace().skip(2).collect();
        if values.len() != expected {
            debug!(
                line = %line.trim(),
                expected,
                got = values.len(),
                "data row skipped"
            );
            continue;
        }
        let parsed: Result<Vec<f64>, _> = values.iter().map(|v| v.parse::<f64>()).collect();
        match parsed {
            Ok(row) => rows.push(row),
            Err(_) => debug!(line = %line.trim(), "non-numeric data row skipped"),
        }
    }
    rows
}
