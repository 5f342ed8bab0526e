use colored::*;
use rcat_common::config::Transport;
use rcat_common::network::services::service_label;
use rcat_core::{ScanResult, ScanStatus};
use tracing::info;

use crate::terminal::logging::PRINT_TARGET;

pub fn print(msg: &str) {
    info!(target: PRINT_TARGET, raw_msg = msg);
}

/// One line per probed port, in the wording netcat users grep for.
pub fn scan_result(host: &str, transport: Transport, numeric: bool, result: &ScanResult) {
    let line: String = match result.status {
        ScanStatus::Open => format!(
            "{} {} {} port [{}/{}] {}",
            "Connection to".green(),
            host,
            result.port.to_string().bold(),
            transport,
            service_label(result.port, transport, numeric),
            "succeeded!".green().bold()
        ),
        ScanStatus::Closed => format!(
            "{} {} port {} ({}) {}",
            "connect to".red(),
            host,
            result.port,
            transport,
            "failed: Connection refused".red()
        ),
        ScanStatus::Filtered => format!(
            "{} {} port {} ({}) {} {}",
            "connect to".bright_black(),
            host,
            result.port,
            transport,
            "failed: no response".bright_black(),
            format!("after {:.1}s", result.elapsed.as_secs_f64()).dimmed()
        ),
    };

    print(&line);
}

pub fn scan_summary(open: usize, total: usize) {
    let summary: ColoredString = match open {
        0 => "no open ports".yellow(),
        _ => format!("{open} open").green().bold(),
    };
    print(&format!("{} {} of {} ports probed", "⟦ scan ⟧".bright_black(), summary, total));
}
